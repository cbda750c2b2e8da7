//! IP geolocation with provider fallbacks.
//!
//! Free geolocation endpoints rate-limit and go down routinely, so providers
//! are tried in order until one answers. Lookups can be routed through the
//! active egress proxy so the reported location matches the proxy's public IP
//! rather than the device's. Results are cached for the session.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use moka::future::Cache;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::proxy::ProxySpec;

/// Geolocation of one public IP; ephemeral, held only during an application pass
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub ip: String,
    pub country_code: String,
    pub city: Option<String>,
    pub timezone: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Provider-fallback geolocation client
pub struct GeoLookup {
    cache: Cache<String, GeoLocation>,
    timeout: Duration,
}

impl GeoLookup {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(64)
                .time_to_live(Duration::from_secs(15 * 60))
                .build(),
            timeout: Duration::from_secs(8),
        }
    }

    /// Geolocate `ip`, or the caller's public IP when `ip` is `None`.
    ///
    /// With a proxy the request egresses through it, so a `None` ip resolves
    /// to the proxy's public address — exactly what the correlator wants.
    pub async fn lookup(&self, ip: Option<&str>, proxy: Option<&ProxySpec>) -> Result<GeoLocation> {
        let cache_key = match (ip, proxy) {
            (Some(ip), _) => ip.to_string(),
            (None, Some(p)) => format!("egress:{}", p.address()),
            (None, None) => "self".to_string(),
        };

        if let Some(hit) = self.cache.get(&cache_key).await {
            debug!("Geolocation cache hit for {}", cache_key);
            return Ok(hit);
        }

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(spec) = proxy {
            builder = builder.proxy(spec.reqwest_proxy().map_err(|e| anyhow!("{}", e))?);
        }
        let client = builder.build().context("failed to build geolocation client")?;

        let providers: [(&str, fn(&Value) -> Result<GeoLocation>); 3] = [
            ("ip-api.com", parse_ip_api),
            ("ipapi.co", parse_ipapi_co),
            ("ipwho.is", parse_ipwho),
        ];

        let mut last_error = None;
        for (name, parse) in providers {
            match self.fetch(&client, name, ip).await.and_then(|body| parse(&body)) {
                Ok(geo) => {
                    info!(
                        "Geolocation via {}: {} -> {} / {:?}",
                        name, geo.ip, geo.country_code, geo.timezone
                    );
                    self.cache.insert(cache_key, geo.clone()).await;
                    return Ok(geo);
                }
                Err(e) => {
                    warn!("Geolocation provider {} failed: {}", name, e);
                    last_error = Some(e);
                }
            }
        }

        bail!(
            "all geolocation providers failed (last: {})",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )
    }

    async fn fetch(&self, client: &reqwest::Client, provider: &str, ip: Option<&str>) -> Result<Value> {
        let url = match (provider, ip) {
            ("ip-api.com", Some(ip)) => format!("http://ip-api.com/json/{}", ip),
            ("ip-api.com", None) => "http://ip-api.com/json/".to_string(),
            ("ipapi.co", Some(ip)) => format!("https://ipapi.co/{}/json/", ip),
            ("ipapi.co", None) => "https://ipapi.co/json/".to_string(),
            ("ipwho.is", Some(ip)) => format!("https://ipwho.is/{}", ip),
            ("ipwho.is", None) => "https://ipwho.is/".to_string(),
            _ => bail!("unknown provider: {}", provider),
        };

        let response = client
            .get(&url)
            .header("User-Agent", "droid-agent/0.1")
            .send()
            .await
            .with_context(|| format!("request to {} failed", provider))?;

        if !response.status().is_success() {
            bail!("{} returned HTTP {}", provider, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("invalid JSON from {}", provider))
    }
}

impl Default for GeoLookup {
    fn default() -> Self {
        Self::new()
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_ip_api(body: &Value) -> Result<GeoLocation> {
    if str_field(body, "status").as_deref() != Some("success") {
        bail!(
            "lookup failed: {}",
            str_field(body, "message").unwrap_or_else(|| "unknown".into())
        );
    }
    Ok(GeoLocation {
        ip: str_field(body, "query").unwrap_or_default(),
        country_code: str_field(body, "countryCode")
            .ok_or_else(|| anyhow!("missing countryCode"))?
            .to_lowercase(),
        city: str_field(body, "city"),
        timezone: str_field(body, "timezone"),
        lat: body.get("lat").and_then(|v| v.as_f64()),
        lon: body.get("lon").and_then(|v| v.as_f64()),
    })
}

fn parse_ipapi_co(body: &Value) -> Result<GeoLocation> {
    if body.get("error").and_then(|v| v.as_bool()).unwrap_or(false) {
        bail!(
            "lookup failed: {}",
            str_field(body, "reason").unwrap_or_else(|| "unknown".into())
        );
    }
    Ok(GeoLocation {
        ip: str_field(body, "ip").unwrap_or_default(),
        country_code: str_field(body, "country_code")
            .ok_or_else(|| anyhow!("missing country_code"))?
            .to_lowercase(),
        city: str_field(body, "city"),
        timezone: str_field(body, "timezone"),
        lat: body.get("latitude").and_then(|v| v.as_f64()),
        lon: body.get("longitude").and_then(|v| v.as_f64()),
    })
}

fn parse_ipwho(body: &Value) -> Result<GeoLocation> {
    if !body.get("success").and_then(|v| v.as_bool()).unwrap_or(false) {
        bail!(
            "lookup failed: {}",
            str_field(body, "message").unwrap_or_else(|| "unknown".into())
        );
    }
    Ok(GeoLocation {
        ip: str_field(body, "ip").unwrap_or_default(),
        country_code: str_field(body, "country_code")
            .ok_or_else(|| anyhow!("missing country_code"))?
            .to_lowercase(),
        city: str_field(body, "city"),
        timezone: body
            .get("timezone")
            .and_then(|tz| tz.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        lat: body.get("latitude").and_then(|v| v.as_f64()),
        lon: body.get("longitude").and_then(|v| v.as_f64()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ip_api_payload() {
        let body = json!({
            "status": "success",
            "query": "203.0.113.9",
            "countryCode": "FR",
            "city": "Paris",
            "timezone": "Europe/Paris",
            "lat": 48.8566,
            "lon": 2.3522
        });
        let geo = parse_ip_api(&body).unwrap();
        assert_eq!(geo.country_code, "fr");
        assert_eq!(geo.timezone.as_deref(), Some("Europe/Paris"));
        assert_eq!(geo.lat, Some(48.8566));
    }

    #[test]
    fn ip_api_failure_status_is_an_error() {
        let body = json!({ "status": "fail", "message": "private range" });
        assert!(parse_ip_api(&body).is_err());
    }

    #[test]
    fn parses_ipapi_co_payload() {
        let body = json!({
            "ip": "203.0.113.9",
            "country_code": "SA",
            "city": "Riyadh",
            "timezone": "Asia/Riyadh",
            "latitude": 24.7136,
            "longitude": 46.6753
        });
        let geo = parse_ipapi_co(&body).unwrap();
        assert_eq!(geo.country_code, "sa");
        assert_eq!(geo.city.as_deref(), Some("Riyadh"));
    }

    #[test]
    fn parses_ipwho_nested_timezone() {
        let body = json!({
            "success": true,
            "ip": "203.0.113.9",
            "country_code": "DE",
            "city": "Berlin",
            "timezone": { "id": "Europe/Berlin" },
            "latitude": 52.52,
            "longitude": 13.405
        });
        let geo = parse_ipwho(&body).unwrap();
        assert_eq!(geo.timezone.as_deref(), Some("Europe/Berlin"));
    }

    #[test]
    fn missing_country_code_is_an_error() {
        let body = json!({ "status": "success", "query": "203.0.113.9" });
        assert!(parse_ip_api(&body).is_err());
    }
}
