//! Country fallback tables.
//!
//! When geolocation only yields a country code (or the operator configures one
//! directly), timezone, GPS and locale are derived from these tables. Values
//! are representative, not exhaustive: the capital's timezone and a centroid
//! coordinate near it.

/// IANA timezone for an ISO 3166-1 alpha-2 country code
pub fn country_timezone(code: &str) -> Option<&'static str> {
    let tz = match code.to_ascii_lowercase().as_str() {
        "us" => "America/New_York",
        "ca" => "America/Toronto",
        "mx" => "America/Mexico_City",
        "br" => "America/Sao_Paulo",
        "ar" => "America/Argentina/Buenos_Aires",
        "gb" | "uk" => "Europe/London",
        "ie" => "Europe/Dublin",
        "fr" => "Europe/Paris",
        "de" => "Europe/Berlin",
        "es" => "Europe/Madrid",
        "pt" => "Europe/Lisbon",
        "it" => "Europe/Rome",
        "nl" => "Europe/Amsterdam",
        "be" => "Europe/Brussels",
        "ch" => "Europe/Zurich",
        "at" => "Europe/Vienna",
        "se" => "Europe/Stockholm",
        "no" => "Europe/Oslo",
        "dk" => "Europe/Copenhagen",
        "fi" => "Europe/Helsinki",
        "pl" => "Europe/Warsaw",
        "cz" => "Europe/Prague",
        "ro" => "Europe/Bucharest",
        "gr" => "Europe/Athens",
        "ua" => "Europe/Kyiv",
        "ru" => "Europe/Moscow",
        "tr" => "Europe/Istanbul",
        "sa" => "Asia/Riyadh",
        "ae" => "Asia/Dubai",
        "eg" => "Africa/Cairo",
        "ma" => "Africa/Casablanca",
        "ng" => "Africa/Lagos",
        "za" => "Africa/Johannesburg",
        "il" => "Asia/Jerusalem",
        "in" => "Asia/Kolkata",
        "pk" => "Asia/Karachi",
        "bd" => "Asia/Dhaka",
        "th" => "Asia/Bangkok",
        "vn" => "Asia/Ho_Chi_Minh",
        "id" => "Asia/Jakarta",
        "my" => "Asia/Kuala_Lumpur",
        "sg" => "Asia/Singapore",
        "ph" => "Asia/Manila",
        "cn" => "Asia/Shanghai",
        "hk" => "Asia/Hong_Kong",
        "tw" => "Asia/Taipei",
        "jp" => "Asia/Tokyo",
        "kr" => "Asia/Seoul",
        "au" => "Australia/Sydney",
        "nz" => "Pacific/Auckland",
        _ => return None,
    };
    Some(tz)
}

/// Representative coordinate for a country (capital-area centroid)
pub fn country_centroid(code: &str) -> Option<(f64, f64)> {
    let coords = match code.to_ascii_lowercase().as_str() {
        "us" => (40.7128, -74.0060),
        "ca" => (43.6532, -79.3832),
        "mx" => (19.4326, -99.1332),
        "br" => (-23.5505, -46.6333),
        "ar" => (-34.6037, -58.3816),
        "gb" | "uk" => (51.5074, -0.1278),
        "ie" => (53.3498, -6.2603),
        "fr" => (48.8566, 2.3522),
        "de" => (52.5200, 13.4050),
        "es" => (40.4168, -3.7038),
        "pt" => (38.7223, -9.1393),
        "it" => (41.9028, 12.4964),
        "nl" => (52.3676, 4.9041),
        "be" => (50.8503, 4.3517),
        "ch" => (47.3769, 8.5417),
        "at" => (48.2082, 16.3738),
        "se" => (59.3293, 18.0686),
        "no" => (59.9139, 10.7522),
        "dk" => (55.6761, 12.5683),
        "fi" => (60.1699, 24.9384),
        "pl" => (52.2297, 21.0122),
        "cz" => (50.0755, 14.4378),
        "ro" => (44.4268, 26.1025),
        "gr" => (37.9838, 23.7275),
        "ua" => (50.4501, 30.5234),
        "ru" => (55.7558, 37.6173),
        "tr" => (41.0082, 28.9784),
        "sa" => (24.7136, 46.6753),
        "ae" => (25.2048, 55.2708),
        "eg" => (30.0444, 31.2357),
        "ma" => (33.5731, -7.5898),
        "ng" => (6.5244, 3.3792),
        "za" => (-26.2041, 28.0473),
        "il" => (32.0853, 34.7818),
        "in" => (28.6139, 77.2090),
        "pk" => (24.8607, 67.0011),
        "bd" => (23.8103, 90.4125),
        "th" => (13.7563, 100.5018),
        "vn" => (10.8231, 106.6297),
        "id" => (-6.2088, 106.8456),
        "my" => (3.1390, 101.6869),
        "sg" => (1.3521, 103.8198),
        "ph" => (14.5995, 120.9842),
        "cn" => (31.2304, 121.4737),
        "hk" => (22.3193, 114.1694),
        "tw" => (25.0330, 121.5654),
        "jp" => (35.6762, 139.6503),
        "kr" => (37.5665, 126.9780),
        "au" => (-33.8688, 151.2093),
        "nz" => (-36.8509, 174.7645),
        _ => return None,
    };
    Some(coords)
}

/// BCP-47 locale for a country (primary language of the country)
pub fn country_locale(code: &str) -> Option<&'static str> {
    let locale = match code.to_ascii_lowercase().as_str() {
        "us" => "en-US",
        "ca" => "en-CA",
        "mx" => "es-MX",
        "br" => "pt-BR",
        "ar" => "es-AR",
        "gb" | "uk" => "en-GB",
        "ie" => "en-IE",
        "fr" => "fr-FR",
        "de" => "de-DE",
        "es" => "es-ES",
        "pt" => "pt-PT",
        "it" => "it-IT",
        "nl" => "nl-NL",
        "be" => "nl-BE",
        "ch" => "de-CH",
        "at" => "de-AT",
        "se" => "sv-SE",
        "no" => "nb-NO",
        "dk" => "da-DK",
        "fi" => "fi-FI",
        "pl" => "pl-PL",
        "cz" => "cs-CZ",
        "ro" => "ro-RO",
        "gr" => "el-GR",
        "ua" => "uk-UA",
        "ru" => "ru-RU",
        "tr" => "tr-TR",
        "sa" => "ar-SA",
        "ae" => "ar-AE",
        "eg" => "ar-EG",
        "ma" => "ar-MA",
        "ng" => "en-NG",
        "za" => "en-ZA",
        "il" => "he-IL",
        "in" => "en-IN",
        "pk" => "ur-PK",
        "bd" => "bn-BD",
        "th" => "th-TH",
        "vn" => "vi-VN",
        "id" => "id-ID",
        "my" => "ms-MY",
        "sg" => "en-SG",
        "ph" => "en-PH",
        "cn" => "zh-CN",
        "hk" => "zh-HK",
        "tw" => "zh-TW",
        "jp" => "ja-JP",
        "kr" => "ko-KR",
        "au" => "en-AU",
        "nz" => "en-NZ",
        _ => return None,
    };
    Some(locale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_cover_the_same_countries() {
        for code in ["us", "fr", "sa", "jp", "br", "za"] {
            assert!(country_timezone(code).is_some(), "timezone missing for {}", code);
            assert!(country_centroid(code).is_some(), "centroid missing for {}", code);
            assert!(country_locale(code).is_some(), "locale missing for {}", code);
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(country_timezone("FR"), country_timezone("fr"));
        assert_eq!(country_locale("SA"), Some("ar-SA"));
    }

    #[test]
    fn uk_aliases_gb() {
        assert_eq!(country_timezone("uk"), country_timezone("gb"));
    }

    #[test]
    fn unknown_countries_yield_none() {
        assert!(country_timezone("zz").is_none());
        assert!(country_centroid("zz").is_none());
        assert!(country_locale("zz").is_none());
    }
}
