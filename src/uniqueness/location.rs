//! Mock GPS location and system locale.

use std::sync::Arc;

use tracing::{debug, info};

use crate::shell::Shell;

use super::types::Outcome;

/// Package whose mock-location provider receives the injected fixes
const MOCK_PROVIDER_PACKAGE: &str = "com.droid.agent";

/// Property holding the last injected fix, used as the read-back
const MOCK_LOCATION_PROPERTY: &str = "persist.sys.mock.location";

pub struct LocationChanger {
    shell: Arc<dyn Shell>,
}

impl LocationChanger {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        Self { shell }
    }

    /// Point the mock GPS provider at the given coordinates.
    pub async fn set(&self, lat: f64, lon: f64) -> Outcome {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Outcome::failed(format!("coordinates out of range: {},{}", lat, lon));
        }

        info!("Setting mock GPS location to {:.4},{:.4}", lat, lon);

        // Legacy toggle; ignored on newer builds where appops is authoritative
        if let Err(e) = self.shell.settings_put("secure", "mock_location", "1").await {
            debug!("mock_location setting write failed: {}", e);
        }

        let appops = format!(
            "appops set {} android:mock_location allow",
            MOCK_PROVIDER_PACKAGE
        );
        if let Err(e) = self.shell.execute(&appops).await.and_then(|o| o.require_success().map(|_| ())) {
            return Outcome::failed(format!("appops grant failed: {}", e));
        }

        let fix = format!("{:.6},{:.6}", lat, lon);
        if let Err(e) = self.shell.set_property(MOCK_LOCATION_PROPERTY, &fix).await {
            return Outcome::failed(format!("fix property write failed: {}", e));
        }

        let broadcast = format!(
            "am broadcast -a {}.SET_LOCATION --ef lat {:.6} --ef lon {:.6}",
            MOCK_PROVIDER_PACKAGE, lat, lon
        );
        match self.shell.execute(&broadcast).await {
            Ok(out) if out.success => Outcome::ok(),
            Ok(out) => Outcome::failed(format!("provider broadcast rejected: {}", out.error.trim())),
            Err(e) => Outcome::failed(format!("provider broadcast failed: {}", e)),
        }
    }
}

pub struct LocaleChanger {
    shell: Arc<dyn Shell>,
}

impl LocaleChanger {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        Self { shell }
    }

    /// Switch the system locale (e.g. `fr-FR`).
    pub async fn set(&self, locale: &str) -> Outcome {
        if locale.is_empty() {
            return Outcome::failed("empty locale");
        }

        info!("Changing system locale to {}", locale);

        if let Err(e) = self.shell.set_property("persist.sys.locale", locale).await {
            return Outcome::failed(format!("locale property write failed: {}", e));
        }

        // Running apps pick the change up from the broadcast; failure here is
        // non-fatal since the property applies at next app start anyway
        let broadcast = "am broadcast -a android.intent.action.LOCALE_CHANGED";
        match self.shell.execute(broadcast).await {
            Ok(out) if out.success => Outcome::ok(),
            Ok(_) | Err(_) => Outcome::ok_with("broadcast skipped; applies at next app start"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::MockShell;

    #[tokio::test]
    async fn set_location_grants_appops_and_stores_fix() {
        let shell = Arc::new(MockShell::rooted());
        let changer = LocationChanger::new(shell.clone());

        let outcome = changer.set(48.8566, 2.3522).await;
        assert!(outcome.ok);

        let log = shell.command_log();
        assert!(log.iter().any(|c| c.contains("android:mock_location allow")));
        assert!(log.iter().any(|c| c.contains("SET_LOCATION")));
        assert_eq!(
            shell.get_property(MOCK_LOCATION_PROPERTY).await.unwrap(),
            "48.856600,2.352200"
        );
    }

    #[tokio::test]
    async fn out_of_range_coordinates_are_rejected_without_shell_calls() {
        let shell = Arc::new(MockShell::rooted());
        let changer = LocationChanger::new(shell.clone());

        let outcome = changer.set(123.0, 0.0).await;
        assert!(!outcome.ok);
        assert!(shell.command_log().is_empty());
    }

    #[tokio::test]
    async fn appops_failure_fails_the_operation() {
        let shell = Arc::new(MockShell::rooted().fail_matching("appops"));
        let outcome = LocationChanger::new(shell).set(1.0, 1.0).await;
        assert!(!outcome.ok);
    }

    #[tokio::test]
    async fn set_locale_writes_property_and_broadcasts() {
        let shell = Arc::new(MockShell::rooted());
        let outcome = LocaleChanger::new(shell.clone()).set("ar-SA").await;
        assert!(outcome.ok);
        assert_eq!(
            shell.get_property("persist.sys.locale").await.unwrap(),
            "ar-SA"
        );
        assert!(shell
            .command_log()
            .iter()
            .any(|c| c.contains("LOCALE_CHANGED")));
    }

    #[tokio::test]
    async fn locale_broadcast_failure_is_tolerated() {
        let shell = Arc::new(MockShell::rooted().fail_matching("LOCALE_CHANGED"));
        let outcome = LocaleChanger::new(shell).set("fr-FR").await;
        assert!(outcome.ok);
        assert!(outcome.detail.is_some());
    }
}
