//! Ad redirect-URL parsing and domain filtering.
//!
//! Ad networks wrap the advertiser's destination in a click-through redirect
//! (`.../aclk?...&adurl=<dest>`); the parameter name and encoding depth vary by
//! network, so parsing prefers the Google Ads parameter and falls back through
//! a list of generic redirect keys.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Redirect query parameters, ad-network-specific first
const REDIRECT_PARAMS: &[&str] = &[
    "adurl",
    "dest_url",
    "redirect",
    "redirect_url",
    "goto",
    "target",
    "destination",
    "landing_url",
    "clickurl",
    "url",
];

/// Substrings identifying a URL as belonging to an ad network
const AD_NETWORK_MARKERS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "/pagead/",
    "adservice.google",
    "googleads.g.doubleclick",
    "/aclk?",
    "/aclk;",
];

/// Domains excluded from the domain-level output even when their URLs are
/// accepted upstream as ad-URL candidates
const AD_SERVING_DOMAIN_MARKERS: &[&str] = &[
    "doubleclick",
    "googlesyndication",
    "googleadservices",
    "pagead",
    "adservice",
];

/// Fallback for link fragments that are not parseable as absolute URLs
static RAW_REDIRECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"[?&](?:adurl|dest_url|redirect(?:_url)?|goto|target|destination|landing_url|clickurl|url)=([^&\s"'<>]+)"#,
    )
    .expect("redirect regex")
});

/// Extract the advertiser destination from a redirect-style ad link.
///
/// Returns `None` when the link carries no recognized redirect parameter or
/// the parameter value is not an absolute http(s) URL.
pub fn parse_ad_redirect(link: &str) -> Option<String> {
    if let Ok(url) = Url::parse(link) {
        for param in REDIRECT_PARAMS {
            let value = url
                .query_pairs()
                .find(|(key, _)| key == param)
                .map(|(_, value)| value.into_owned());
            if let Some(value) = value {
                if let Some(dest) = decode_destination(&value) {
                    return Some(dest);
                }
            }
        }
        return None;
    }

    // Relative fragments / raw attribute values
    RAW_REDIRECT_RE
        .captures(link)
        .and_then(|caps| caps.get(1))
        .and_then(|m| {
            let decoded = urlencoding::decode(m.as_str()).ok()?.into_owned();
            decode_destination(&decoded)
        })
}

/// Accept an already-decoded value as a destination URL, unwrapping one extra
/// level of percent-encoding when the network double-encodes.
fn decode_destination(value: &str) -> Option<String> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("http%3A") || value.starts_with("https%3A") {
        let decoded = urlencoding::decode(value).ok()?.into_owned();
        if decoded.starts_with("http://") || decoded.starts_with("https://") {
            return Some(decoded);
        }
    }
    None
}

/// True when the raw link string already identifies an ad network
pub fn is_ad_network_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    AD_NETWORK_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// True when a domain belongs to a known ad-serving host
pub fn is_ad_serving_domain(domain: &str) -> bool {
    AD_SERVING_DOMAIN_MARKERS.iter().any(|marker| domain.contains(marker))
}

/// Lowercased host of a URL, if it parses
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Strip a single leading `www.`
pub fn strip_www(domain: &str) -> String {
    domain.strip_prefix("www.").unwrap_or(domain).to_string()
}

/// Self-referential filter: a candidate pointing back at the current site is
/// noise, not an ad destination. Matches exact domains, substring containment
/// in either direction, and the exact current URL.
pub fn is_same_site(candidate: &str, page_domain: &str, page_url: &str) -> bool {
    if !page_url.is_empty() && candidate == page_url {
        return true;
    }

    let candidate_domain = match domain_of(candidate) {
        Some(d) => d,
        // Unparseable candidates are never genuine destinations
        None => return true,
    };

    if page_domain.is_empty() {
        return false;
    }

    candidate_domain == page_domain
        || candidate_domain.contains(page_domain)
        || page_domain.contains(candidate_domain.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_google_adurl_parameter() {
        let link = "https://www.googleadservices.com/pagead/aclk?sa=L&ai=xyz&adurl=https%3A%2F%2Fshop.test%2Fproduct";
        assert_eq!(
            parse_ad_redirect(link).as_deref(),
            Some("https://shop.test/product")
        );
    }

    #[test]
    fn adurl_takes_precedence_over_generic_params() {
        let link = "https://ads.net/click?redirect=https%3A%2F%2Fwrong.test&adurl=https%3A%2F%2Fright.test";
        assert_eq!(parse_ad_redirect(link).as_deref(), Some("https://right.test"));
    }

    #[test]
    fn parses_generic_redirect_params() {
        let link = "http://tracker.example/go?goto=http%3A%2F%2Fdest.test%2Flanding";
        assert_eq!(
            parse_ad_redirect(link).as_deref(),
            Some("http://dest.test/landing")
        );
    }

    #[test]
    fn unwraps_double_encoded_destinations() {
        let link = "https://ads.net/c?adurl=http%253A%252F%252Fshop.test%252Fp";
        assert_eq!(parse_ad_redirect(link).as_deref(), Some("http://shop.test/p"));
    }

    #[test]
    fn rejects_non_url_parameter_values() {
        assert_eq!(parse_ad_redirect("https://ads.net/c?adurl=12345"), None);
        assert_eq!(parse_ad_redirect("https://news.test/article?id=7"), None);
    }

    #[test]
    fn regex_fallback_handles_relative_fragments() {
        let link = "/aclk?sa=l&adurl=https%3A%2F%2Fshop.test%2Fsale&ved=abc";
        assert_eq!(parse_ad_redirect(link).as_deref(), Some("https://shop.test/sale"));
    }

    #[test]
    fn detects_ad_network_urls() {
        assert!(is_ad_network_url("https://googleads.g.doubleclick.net/pcs/click?x=1"));
        assert!(is_ad_network_url("https://tpc.googlesyndication.com/simgad/123"));
        assert!(is_ad_network_url("https://www.google.com/aclk?sa=l&adurl=x"));
        assert!(!is_ad_network_url("https://news.test/story"));
    }

    #[test]
    fn ad_serving_domains_are_flagged() {
        assert!(is_ad_serving_domain("googleads.g.doubleclick.net"));
        assert!(is_ad_serving_domain("adservice.google.com"));
        assert!(!is_ad_serving_domain("shop.test"));
    }

    #[test]
    fn same_site_matches_exact_and_contains() {
        assert!(is_same_site("http://shop.test/p", "shop.test", "http://shop.test/"));
        assert!(is_same_site("http://www.shop.test/p", "shop.test", ""));
        assert!(is_same_site("http://shop.test/p", "www.shop.test", ""));
        assert!(!is_same_site("http://other.test/p", "shop.test", "http://shop.test/"));
    }

    #[test]
    fn same_site_matches_current_url_exactly() {
        assert!(is_same_site(
            "http://cdn.example/page",
            "shop.test",
            "http://cdn.example/page"
        ));
    }

    #[test]
    fn unparseable_candidates_are_excluded() {
        assert!(is_same_site("not a url", "shop.test", ""));
    }

    #[test]
    fn strips_leading_www_only() {
        assert_eq!(strip_www("www.shop.test"), "shop.test");
        assert_eq!(strip_www("shop.www.test"), "shop.www.test");
    }
}
