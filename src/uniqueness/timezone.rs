//! System timezone forcing.
//!
//! No single mechanism sets the timezone on every Android version — property
//! writes, settings writes, the alarm service and the broadcast each work on
//! some builds and silently no-op on others. All of them are fired, and the
//! only success criterion is the read-back matching the requested value.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::shell::Shell;

use super::types::Outcome;

/// Property used for the authoritative read-back
const TIMEZONE_PROPERTY: &str = "persist.sys.timezone";

pub struct TimezoneChanger {
    shell: Arc<dyn Shell>,
}

impl TimezoneChanger {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        Self { shell }
    }

    /// Force the system timezone to `timezone` and verify by read-back.
    pub async fn change(&self, timezone: &str) -> Outcome {
        if timezone.is_empty() {
            return Outcome::failed("empty timezone value");
        }

        info!("Changing system timezone to {}", timezone);

        // Automatic timezone must go first, or the system reverts the value
        // on the next network time sync
        if let Err(e) = self.shell.settings_put("global", "auto_time_zone", "0").await {
            warn!("Failed to disable automatic timezone: {}", e);
        }

        let mechanisms: Vec<String> = vec![
            format!("setprop {} {}", TIMEZONE_PROPERTY, timezone),
            format!("settings put global time_zone {}", timezone),
            format!("settings put system time_zone {}", timezone),
            format!("service call alarm 3 s16 {}", timezone),
            format!(
                "am broadcast -a android.intent.action.TIMEZONE_CHANGED --es time-zone {}",
                timezone
            ),
            format!(
                "content insert --uri content://settings/global --bind name:s:time_zone --bind value:s:{}",
                timezone
            ),
        ];

        let mut fired = 0usize;
        for cmd in &mechanisms {
            match self.shell.execute(cmd).await {
                Ok(out) if out.success => fired += 1,
                Ok(out) => debug!("Timezone mechanism no-op ({}): {}", cmd, out.error.trim()),
                Err(e) => debug!("Timezone mechanism failed ({}): {}", cmd, e),
            }
        }

        // Any individual mechanism may have silently no-opped; the read-back
        // is the only trustworthy signal
        match self.shell.get_property(TIMEZONE_PROPERTY).await {
            Ok(current) if current == timezone => {
                info!("Timezone verified: {} ({}/{} mechanisms applied)", current, fired, mechanisms.len());
                Outcome::ok_with(format!("{} mechanisms applied", fired))
            }
            Ok(current) => {
                warn!(
                    "Timezone read-back mismatch: wanted {}, device reports {:?}",
                    timezone, current
                );
                Outcome::failed(format!("read-back returned {:?}", current))
            }
            Err(e) => Outcome::failed(format!("read-back failed: {}", e)),
        }
    }
}
