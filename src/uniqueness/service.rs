//! The uniqueness orchestrator.
//!
//! Applies a configured batch of device-identity mutations. Mutations are
//! independent: one failing operation never blocks the rest of the batch, and
//! the aggregated `success` covers only what was actually attempted.

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{random_user_agent, SharedFingerprint};
use crate::geo::GeoLookup;
use crate::proxy::ProxyManager;
use crate::shell::Shell;

use super::country::{country_centroid, country_locale, country_timezone};
use super::location::{LocaleChanger, LocationChanger};
use super::timezone::TimezoneChanger;
use super::types::{Outcome, UniquenessConfig, UniquenessResult, ValueSource};

pub struct UniquenessService {
    shell: Arc<dyn Shell>,
    geo: Arc<GeoLookup>,
    proxies: Arc<ProxyManager>,
    fingerprint: SharedFingerprint,
    /// Package whose cookie/cache storage gets cleared
    browser_package: String,
}

impl UniquenessService {
    pub fn new(
        shell: Arc<dyn Shell>,
        geo: Arc<GeoLookup>,
        proxies: Arc<ProxyManager>,
        fingerprint: SharedFingerprint,
        browser_package: String,
    ) -> Self {
        Self { shell, geo, proxies, fingerprint, browser_package }
    }

    /// Apply every mutation the config selects.
    pub async fn apply(&self, config: &UniquenessConfig) -> UniquenessResult {
        let start = Instant::now();

        // Environment check comes first: without privileged access nothing is
        // attempted at all, leaving no partial state behind
        if !self.shell.has_root().await {
            warn!("Uniqueness rejected: privileged shell access unavailable");
            return UniquenessResult::rejected(start.elapsed().as_millis() as u64);
        }

        if config.is_empty() {
            debug!("Uniqueness config selects no operations");
        }

        let mut result = UniquenessResult::new();

        if config.new_device_id {
            result.record("deviceId", self.regenerate_device_id().await);
        }

        if config.new_advertising_id {
            result.record("advertisingId", self.regenerate_advertising_id().await);
        }

        if config.clear_browser_data {
            result.record("browserData", self.clear_browser_data().await);
        }

        if config.user_agent.is_some() || config.random_user_agent {
            result.record("userAgent", self.change_user_agent(config));
        }

        if let Some(source) = &config.timezone {
            result.record("timezone", self.change_timezone(source).await);
        }

        if let Some(source) = &config.location {
            result.record("location", self.change_location(source).await);
        }

        if let Some(code) = &config.locale_country {
            result.record("locale", self.change_locale(code).await);
        }

        if !config.build_props.is_empty() {
            result.record("buildProps", self.apply_build_props(config).await);
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Uniqueness applied: success={} ({} operations, {}ms)",
            result.success,
            result.attempted(),
            result.duration_ms
        );
        result
    }

    async fn regenerate_device_id(&self) -> Outcome {
        let new_id: String = {
            let mut rng = rand::thread_rng();
            (0..16)
                .map(|_| format!("{:x}", rng.gen_range(0..16u8)))
                .collect()
        };

        match self.shell.settings_put("secure", "android_id", &new_id).await {
            Ok(()) => Outcome::ok_with(new_id),
            Err(e) => Outcome::failed(format!("android_id write failed: {}", e)),
        }
    }

    async fn regenerate_advertising_id(&self) -> Outcome {
        let new_id = Uuid::new_v4().to_string();

        // The GMS cache is best-effort: absent on devices without Play
        // services, and the settings value is what the agent reads back
        let gms_cache = "rm -f /data/data/com.google.android.gms/files/adid_settings";
        if let Err(e) = self.shell.execute(gms_cache).await {
            debug!("GMS adid cache removal failed: {}", e);
        }

        match self.shell.settings_put("secure", "advertising_id", &new_id).await {
            Ok(()) => Outcome::ok_with(new_id),
            Err(e) => Outcome::failed(format!("advertising_id write failed: {}", e)),
        }
    }

    /// Clears the two browser storage categories: cookies and cache
    async fn clear_browser_data(&self) -> Outcome {
        let pkg = &self.browser_package;

        // The browser holds its cookie database open while running
        if let Err(e) = self.shell.force_stop_app(pkg).await {
            debug!("Force-stopping {} failed: {}", pkg, e);
        }

        let cookies = format!(
            "rm -f /data/data/{}/app_webview/Default/Cookies /data/data/{}/app_webview/Default/Cookies-journal",
            pkg, pkg
        );
        let cache = format!("rm -rf /data/data/{}/cache/*", pkg);

        let mut failed = Vec::new();
        for (category, cmd) in [("cookies", cookies), ("cache", cache)] {
            match self.shell.execute(&cmd).await {
                Ok(out) if out.success => {}
                Ok(out) => {
                    warn!("Clearing {} failed: {}", category, out.error.trim());
                    failed.push(category);
                }
                Err(e) => {
                    warn!("Clearing {} failed: {}", category, e);
                    failed.push(category);
                }
            }
        }

        if failed.is_empty() {
            Outcome::ok()
        } else {
            Outcome::failed(format!("failed to clear: {}", failed.join(", ")))
        }
    }

    fn change_user_agent(&self, config: &UniquenessConfig) -> Outcome {
        let user_agent = match &config.user_agent {
            Some(ua) if !ua.is_empty() => ua.clone(),
            Some(_) => return Outcome::failed("empty user agent"),
            None => random_user_agent(),
        };

        self.fingerprint.set_user_agent(user_agent);
        Outcome::ok_with("applies at next browser launch")
    }

    async fn change_timezone(&self, source: &ValueSource) -> Outcome {
        let timezone = match self.resolve_timezone(source).await {
            Ok(tz) => tz,
            Err(detail) => return Outcome::failed(detail),
        };

        let outcome = TimezoneChanger::new(self.shell.clone()).change(&timezone).await;
        if outcome.ok {
            self.fingerprint.set_timezone(timezone);
        }
        outcome
    }

    async fn change_location(&self, source: &ValueSource) -> Outcome {
        let (lat, lon) = match self.resolve_location(source).await {
            Ok(coords) => coords,
            Err(detail) => return Outcome::failed(detail),
        };

        let outcome = LocationChanger::new(self.shell.clone()).set(lat, lon).await;
        if outcome.ok {
            self.fingerprint.set_geolocation(lat, lon);
        }
        outcome
    }

    async fn change_locale(&self, country: &str) -> Outcome {
        let locale = match country_locale(country) {
            Some(l) => l.to_string(),
            None => return Outcome::failed(format!("no locale known for country {:?}", country)),
        };

        let outcome = LocaleChanger::new(self.shell.clone()).set(&locale).await;
        if outcome.ok {
            self.fingerprint.set_locale(locale);
        }
        outcome
    }

    async fn apply_build_props(&self, config: &UniquenessConfig) -> Outcome {
        let mut props: Vec<(&String, &String)> = config.build_props.iter().collect();
        props.sort();

        let mut failed = Vec::new();
        for (key, value) in &props {
            if let Err(e) = self.shell.set_property(key, value).await {
                warn!("Build property {} write failed: {}", key, e);
                failed.push(key.as_str().to_string());
            }
        }

        if failed.is_empty() {
            Outcome::ok_with(format!("{} properties set", props.len()))
        } else {
            Outcome::failed(format!("failed properties: {}", failed.join(", ")))
        }
    }

    async fn resolve_timezone(&self, source: &ValueSource) -> Result<String, String> {
        match source {
            ValueSource::Explicit { value } => Ok(value.clone()),
            ValueSource::Country { code } => country_timezone(code)
                .map(str::to_string)
                .ok_or_else(|| format!("no timezone known for country {:?}", code)),
            ValueSource::Proxy => {
                let proxy = self.proxies.active();
                let geo = self
                    .geo
                    .lookup(None, proxy.as_ref())
                    .await
                    .map_err(|e| format!("proxy geolocation failed: {}", e))?;
                geo.timezone
                    .or_else(|| country_timezone(&geo.country_code).map(str::to_string))
                    .ok_or_else(|| format!("no timezone for country {:?}", geo.country_code))
            }
        }
    }

    async fn resolve_location(&self, source: &ValueSource) -> Result<(f64, f64), String> {
        match source {
            ValueSource::Explicit { value } => parse_coordinates(value)
                .ok_or_else(|| format!("invalid coordinates {:?} (expected \"lat,lon\")", value)),
            ValueSource::Country { code } => country_centroid(code)
                .ok_or_else(|| format!("no centroid known for country {:?}", code)),
            ValueSource::Proxy => {
                let proxy = self.proxies.active();
                let geo = self
                    .geo
                    .lookup(None, proxy.as_ref())
                    .await
                    .map_err(|e| format!("proxy geolocation failed: {}", e))?;
                match (geo.lat, geo.lon) {
                    (Some(lat), Some(lon)) => Ok((lat, lon)),
                    _ => country_centroid(&geo.country_code)
                        .ok_or_else(|| format!("no centroid for country {:?}", geo.country_code)),
                }
            }
        }
    }
}

fn parse_coordinates(value: &str) -> Option<(f64, f64)> {
    let mut parts = value.split(',');
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    let lon: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::MockShell;

    fn service(shell: Arc<MockShell>) -> UniquenessService {
        UniquenessService::new(
            shell,
            Arc::new(GeoLookup::new()),
            ProxyManager::new(),
            SharedFingerprint::new(),
            "com.android.chrome".to_string(),
        )
    }

    #[tokio::test]
    async fn without_root_nothing_is_attempted() {
        let shell = Arc::new(MockShell::unrooted());
        let svc = service(shell.clone());

        let config = UniquenessConfig {
            new_device_id: true,
            new_advertising_id: true,
            ..Default::default()
        };
        let result = svc.apply(&config).await;

        assert!(!result.success);
        assert_eq!(result.attempted(), 0);
        assert!(shell.command_log().is_empty());
    }

    #[tokio::test]
    async fn unselected_operations_are_absent_from_the_map() {
        let shell = Arc::new(MockShell::rooted());
        let svc = service(shell);

        let config = UniquenessConfig { new_device_id: true, ..Default::default() };
        let result = svc.apply(&config).await;

        assert!(result.success);
        assert_eq!(result.attempted(), 1);
        assert!(result.operations.contains_key("deviceId"));
        assert!(!result.operations.contains_key("advertisingId"));
    }

    #[tokio::test]
    async fn one_failing_operation_does_not_block_the_rest() {
        let shell = Arc::new(MockShell::rooted().fail_matching("android_id"));
        let svc = service(shell.clone());

        let config = UniquenessConfig {
            new_device_id: true,
            new_advertising_id: true,
            clear_browser_data: true,
            ..Default::default()
        };
        let result = svc.apply(&config).await;

        assert!(!result.success);
        assert_eq!(result.attempted(), 3);
        assert!(!result.operations["deviceId"].ok);
        assert!(result.operations["advertisingId"].ok);
        assert!(result.operations["browserData"].ok);
    }

    #[tokio::test]
    async fn device_id_is_sixteen_hex_chars() {
        let shell = Arc::new(MockShell::rooted());
        let svc = service(shell);

        let config = UniquenessConfig { new_device_id: true, ..Default::default() };
        let result = svc.apply(&config).await;

        let id = result.operations["deviceId"].detail.as_ref().unwrap();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn explicit_timezone_goes_through_the_state_machine() {
        let shell = Arc::new(MockShell::rooted());
        let svc = service(shell.clone());

        let config = UniquenessConfig {
            timezone: Some(ValueSource::Explicit { value: "Europe/Paris".into() }),
            ..Default::default()
        };
        let result = svc.apply(&config).await;

        assert!(result.success);
        assert_eq!(
            shell.get_property("persist.sys.timezone").await.unwrap(),
            "Europe/Paris"
        );
    }

    #[tokio::test]
    async fn country_location_uses_centroid_table() {
        let shell = Arc::new(MockShell::rooted());
        let svc = service(shell.clone());

        let config = UniquenessConfig {
            location: Some(ValueSource::Country { code: "fr".into() }),
            ..Default::default()
        };
        let result = svc.apply(&config).await;

        assert!(result.success);
        let fix = shell.get_property("persist.sys.mock.location").await.unwrap();
        assert!(fix.starts_with("48.8566"));
    }

    #[tokio::test]
    async fn unknown_country_locale_fails_that_operation_only() {
        let shell = Arc::new(MockShell::rooted());
        let svc = service(shell);

        let config = UniquenessConfig {
            locale_country: Some("zz".into()),
            new_device_id: true,
            ..Default::default()
        };
        let result = svc.apply(&config).await;

        assert!(!result.success);
        assert!(!result.operations["locale"].ok);
        assert!(result.operations["deviceId"].ok);
    }

    #[tokio::test]
    async fn build_props_report_partial_failures() {
        let shell = Arc::new(MockShell::rooted().fail_matching("ro.product.model"));
        let svc = service(shell);

        let mut build_props = std::collections::HashMap::new();
        build_props.insert("ro.product.model".to_string(), "Pixel 7".to_string());
        build_props.insert("ro.product.brand".to_string(), "google".to_string());

        let config = UniquenessConfig { build_props, ..Default::default() };
        let result = svc.apply(&config).await;

        let outcome = &result.operations["buildProps"];
        assert!(!outcome.ok);
        assert!(outcome.detail.as_ref().unwrap().contains("ro.product.model"));
    }

    #[test]
    fn coordinate_parsing() {
        assert_eq!(parse_coordinates("48.85, 2.35"), Some((48.85, 2.35)));
        assert_eq!(parse_coordinates("48.85"), None);
        assert_eq!(parse_coordinates("a,b"), None);
        assert_eq!(parse_coordinates("1,2,3"), None);
    }
}
