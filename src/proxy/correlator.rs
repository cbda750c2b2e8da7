//! Proxy-geo correlation.
//!
//! Installing a new egress proxy changes the public IP the device browses
//! from; a fingerprint whose timezone or GPS disagrees with that IP is an
//! immediate correlation signal. The correlator closes the gap: it resolves
//! the proxy's geolocation and cascades timezone, mock GPS and locale from it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::browser::SharedFingerprint;
use crate::geo::GeoLookup;
use crate::shell::Shell;
use crate::uniqueness::{
    country_centroid, country_locale, country_timezone, LocaleChanger, LocationChanger,
    TimezoneChanger,
};

use super::{ProxyError, ProxyManager, ProxySpec};

/// Delay after installing the proxy before trusting the egress IP
const PROXY_SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct ProxyGeoCorrelator {
    shell: Arc<dyn Shell>,
    geo: Arc<GeoLookup>,
    proxies: Arc<ProxyManager>,
    fingerprint: SharedFingerprint,
    /// Country used when geolocation fails entirely
    default_country: String,
}

impl ProxyGeoCorrelator {
    pub fn new(
        shell: Arc<dyn Shell>,
        geo: Arc<GeoLookup>,
        proxies: Arc<ProxyManager>,
        fingerprint: SharedFingerprint,
        default_country: String,
    ) -> Self {
        Self { shell, geo, proxies, fingerprint, default_country }
    }

    /// Install a proxy and cascade timezone / GPS / locale from its public IP.
    ///
    /// Best-effort and side-effecting: individual cascade failures are logged,
    /// not propagated. Only an unparseable spec is an error.
    pub async fn apply_from_proxy(&self, proxy_spec: &str) -> Result<(), ProxyError> {
        let spec = ProxySpec::parse(proxy_spec)?;
        info!("Correlating identity to proxy {}", spec);

        self.install(&spec).await;
        self.proxies.set_active(spec.clone());

        // The global proxy takes a moment to apply; an early lookup would
        // still observe the old egress
        tokio::time::sleep(PROXY_SETTLE_DELAY).await;

        match self.geo.lookup(None, Some(&spec)).await {
            Ok(geo) => {
                info!(
                    "Proxy egress resolved: {} -> {} ({})",
                    geo.ip,
                    geo.country_code,
                    geo.city.as_deref().unwrap_or("unknown city")
                );
                self.cascade(
                    &geo.country_code,
                    geo.timezone.as_deref(),
                    geo.lat.zip(geo.lon),
                )
                .await;
            }
            Err(e) => {
                // Identity must never stay unset: fall back to the configured
                // default country rather than leaving the old values behind
                warn!(
                    "Proxy geolocation failed ({}); falling back to country {:?}",
                    e, self.default_country
                );
                let country = self.default_country.clone();
                self.cascade(&country, None, None).await;
            }
        }

        Ok(())
    }

    /// Remove the global egress proxy
    pub async fn clear_proxy(&self) {
        if let Err(e) = self.shell.settings_delete("global", "http_proxy").await {
            warn!("Failed to clear global proxy: {}", e);
        }
        self.proxies.clear();
    }

    /// Install the proxy as the device's global egress
    async fn install(&self, spec: &ProxySpec) {
        if let Err(e) = self
            .shell
            .settings_put("global", "http_proxy", &spec.address())
            .await
        {
            warn!("Failed to install global proxy {}: {}", spec, e);
        }
    }

    /// Cascade timezone, GPS and locale from a geolocation result.
    ///
    /// Each target falls back to the country tables when the lookup did not
    /// carry the corresponding field.
    async fn cascade(&self, country: &str, timezone: Option<&str>, coords: Option<(f64, f64)>) {
        let timezone = timezone
            .map(str::to_string)
            .or_else(|| country_timezone(country).map(str::to_string));
        match timezone {
            Some(tz) => {
                let outcome = TimezoneChanger::new(self.shell.clone()).change(&tz).await;
                if outcome.ok {
                    self.fingerprint.set_timezone(tz);
                } else {
                    warn!("Timezone cascade failed: {:?}", outcome.detail);
                }
            }
            None => warn!("No timezone available for country {:?}", country),
        }

        let coords = coords.or_else(|| country_centroid(country));
        match coords {
            Some((lat, lon)) => {
                let outcome = LocationChanger::new(self.shell.clone()).set(lat, lon).await;
                if outcome.ok {
                    self.fingerprint.set_geolocation(lat, lon);
                } else {
                    warn!("Location cascade failed: {:?}", outcome.detail);
                }
            }
            None => warn!("No centroid available for country {:?}", country),
        }

        match country_locale(country) {
            Some(locale) => {
                let outcome = LocaleChanger::new(self.shell.clone()).set(locale).await;
                if outcome.ok {
                    self.fingerprint.set_locale(locale.to_string());
                } else {
                    warn!("Locale cascade failed: {:?}", outcome.detail);
                }
            }
            None => warn!("No locale available for country {:?}", country),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::MockShell;

    fn correlator(shell: Arc<MockShell>) -> ProxyGeoCorrelator {
        ProxyGeoCorrelator::new(
            shell,
            Arc::new(GeoLookup::new()),
            ProxyManager::new(),
            SharedFingerprint::new(),
            "fr".to_string(),
        )
    }

    #[tokio::test]
    async fn cascade_applies_all_three_targets() {
        let shell = Arc::new(MockShell::rooted());
        let c = correlator(shell.clone());

        c.cascade("sa", Some("Asia/Riyadh"), Some((24.7136, 46.6753))).await;

        assert_eq!(
            shell.get_property("persist.sys.timezone").await.unwrap(),
            "Asia/Riyadh"
        );
        assert!(shell
            .get_property("persist.sys.mock.location")
            .await
            .unwrap()
            .starts_with("24.7136"));
        assert_eq!(shell.get_property("persist.sys.locale").await.unwrap(), "ar-SA");
    }

    #[tokio::test]
    async fn cascade_falls_back_to_country_tables() {
        let shell = Arc::new(MockShell::rooted());
        let c = correlator(shell.clone());

        // No timezone/coords from the lookup: everything derives from "de"
        c.cascade("de", None, None).await;

        assert_eq!(
            shell.get_property("persist.sys.timezone").await.unwrap(),
            "Europe/Berlin"
        );
        assert_eq!(shell.get_property("persist.sys.locale").await.unwrap(), "de-DE");
    }

    #[tokio::test]
    async fn cascade_updates_fingerprint_on_success() {
        let shell = Arc::new(MockShell::rooted());
        let fingerprint = SharedFingerprint::new();
        let c = ProxyGeoCorrelator::new(
            shell,
            Arc::new(GeoLookup::new()),
            ProxyManager::new(),
            fingerprint.clone(),
            "us".to_string(),
        );

        c.cascade("fr", Some("Europe/Paris"), Some((48.85, 2.35))).await;

        let snap = fingerprint.snapshot();
        assert_eq!(snap.timezone.as_deref(), Some("Europe/Paris"));
        assert_eq!(snap.geolocation, Some((48.85, 2.35)));
        assert_eq!(snap.locale.as_deref(), Some("fr-FR"));
    }

    #[tokio::test]
    async fn invalid_spec_is_the_only_hard_error() {
        let shell = Arc::new(MockShell::rooted());
        let c = correlator(shell);
        assert!(c.apply_from_proxy("ftp://nope:21").await.is_err());
    }

    #[tokio::test]
    async fn clear_proxy_deletes_the_global_setting() {
        let shell = Arc::new(MockShell::rooted());
        let c = correlator(shell.clone());
        c.proxies.set_active(ProxySpec::parse("gate.test:8080").unwrap());

        c.clear_proxy().await;

        assert!(c.proxies.active().is_none());
        assert!(shell
            .command_log()
            .iter()
            .any(|cmd| cmd.contains("settings delete global http_proxy")));
    }

    #[tokio::test]
    async fn install_writes_global_http_proxy() {
        let shell = Arc::new(MockShell::rooted());
        let c = correlator(shell.clone());

        c.install(&ProxySpec::parse("socks5://gate.test:7777").unwrap()).await;

        assert!(shell
            .command_log()
            .iter()
            .any(|cmd| cmd.contains("settings put global http_proxy gate.test:7777")));
    }
}
