//! Device fingerprint overrides applied at browser launch.
//!
//! The uniqueness orchestrator and the proxy-geo correlator write the desired
//! identity here; every new browser session reads a snapshot and applies it via
//! CDP emulation overrides (engine level, invisible to page scripts).

use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::debug;

/// User agents rotated when no explicit override is configured.
/// Recent Chrome-on-Android builds; versions kept plausible rather than exact.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.82 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8 Pro) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.6422.113 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 13; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.6312.99 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 12; SM-A525F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.6261.64 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 14; 2312DRA50G) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.6422.53 Mobile Safari/537.36",
];

/// Pick a random user agent from the rotation pool
pub fn random_user_agent() -> String {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
        .to_string()
}

/// Identity attributes a browser session applies at launch
#[derive(Debug, Clone, Default)]
pub struct FingerprintOverrides {
    pub user_agent: Option<String>,
    pub timezone: Option<String>,
    /// Latitude / longitude for the geolocation override
    pub geolocation: Option<(f64, f64)>,
    /// BCP-47 locale, e.g. `fr-FR`
    pub locale: Option<String>,
}

impl FingerprintOverrides {
    /// Accept-Language header derived from the locale override
    pub fn accept_language(&self) -> Option<String> {
        self.locale.as_ref().map(|locale| {
            let lang = locale.split('-').next().unwrap_or(locale);
            format!("{},{};q=0.9,en-US;q=0.8,en;q=0.7", locale, lang)
        })
    }
}

/// Shared, mutable fingerprint state.
///
/// Writers are the uniqueness service and the correlator; the only reader is
/// the session factory, which takes a snapshot at launch time.
#[derive(Clone, Default)]
pub struct SharedFingerprint {
    inner: Arc<RwLock<FingerprintOverrides>>,
}

impl SharedFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> FingerprintOverrides {
        self.inner.read().clone()
    }

    pub fn set_user_agent(&self, user_agent: String) {
        debug!("Fingerprint user agent set: {}", user_agent);
        self.inner.write().user_agent = Some(user_agent);
    }

    pub fn set_timezone(&self, timezone: String) {
        debug!("Fingerprint timezone set: {}", timezone);
        self.inner.write().timezone = Some(timezone);
    }

    pub fn set_geolocation(&self, lat: f64, lon: f64) {
        debug!("Fingerprint geolocation set: {:.4},{:.4}", lat, lon);
        self.inner.write().geolocation = Some((lat, lon));
    }

    pub fn set_locale(&self, locale: String) {
        debug!("Fingerprint locale set: {}", locale);
        self.inner.write().locale = Some(locale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_language_derived_from_locale() {
        let overrides = FingerprintOverrides {
            locale: Some("fr-FR".to_string()),
            ..Default::default()
        };
        assert_eq!(
            overrides.accept_language().unwrap(),
            "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"
        );
    }

    #[test]
    fn snapshot_reflects_writes() {
        let shared = SharedFingerprint::new();
        shared.set_timezone("Asia/Riyadh".to_string());
        shared.set_geolocation(24.7136, 46.6753);

        let snap = shared.snapshot();
        assert_eq!(snap.timezone.as_deref(), Some("Asia/Riyadh"));
        assert_eq!(snap.geolocation, Some((24.7136, 46.6753)));
        assert!(snap.user_agent.is_none());
    }

    #[test]
    fn random_user_agent_comes_from_pool() {
        let ua = random_user_agent();
        assert!(ua.contains("Chrome/"));
        assert!(ua.contains("Android"));
    }
}
