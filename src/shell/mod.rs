//! Privileged shell access.
//!
//! All device-identity mutations go through `su -c`, so the agent degrades
//! cleanly on devices without root: `has_root()` is probed once up front and
//! callers fail fast instead of attempting half of a mutation batch.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Shell-related errors
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Failed to spawn shell: {0}")]
    SpawnFailed(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result of one shell command
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
    pub error: String,
}

impl CommandOutput {
    /// Trimmed stdout, or an error if the command reported failure
    pub fn require_success(self) -> Result<String, ShellError> {
        if self.success {
            Ok(self.output.trim().to_string())
        } else {
            let detail = if self.error.is_empty() { self.output } else { self.error };
            Err(ShellError::CommandFailed(detail.trim().to_string()))
        }
    }
}

/// Privileged command surface consumed by the uniqueness and proxy modules.
///
/// `execute` is the only primitive; the property/settings helpers are thin
/// wrappers so mutation code reads as intent rather than command strings.
#[async_trait]
pub trait Shell: Send + Sync {
    /// Run a command with root privileges
    async fn execute(&self, cmd: &str) -> Result<CommandOutput, ShellError>;

    /// Check whether privileged access is available
    async fn has_root(&self) -> bool;

    /// `setprop key value`
    async fn set_property(&self, key: &str, value: &str) -> Result<(), ShellError> {
        self.execute(&format!("setprop {} {}", quote(key), quote(value)))
            .await?
            .require_success()
            .map(|_| ())
    }

    /// `getprop key`
    async fn get_property(&self, key: &str) -> Result<String, ShellError> {
        self.execute(&format!("getprop {}", quote(key)))
            .await?
            .require_success()
    }

    /// `settings get <namespace> <key>`
    async fn settings_get(&self, namespace: &str, key: &str) -> Result<String, ShellError> {
        self.execute(&format!("settings get {} {}", namespace, quote(key)))
            .await?
            .require_success()
    }

    /// `settings put <namespace> <key> <value>`
    async fn settings_put(&self, namespace: &str, key: &str, value: &str) -> Result<(), ShellError> {
        self.execute(&format!("settings put {} {} {}", namespace, quote(key), quote(value)))
            .await?
            .require_success()
            .map(|_| ())
    }

    /// `settings delete <namespace> <key>`
    async fn settings_delete(&self, namespace: &str, key: &str) -> Result<(), ShellError> {
        self.execute(&format!("settings delete {} {}", namespace, quote(key)))
            .await?
            .require_success()
            .map(|_| ())
    }

    /// `pm clear <package>`
    async fn clear_app_data(&self, package: &str) -> Result<(), ShellError> {
        self.execute(&format!("pm clear {}", quote(package)))
            .await?
            .require_success()
            .map(|_| ())
    }

    /// `am force-stop <package>`
    async fn force_stop_app(&self, package: &str) -> Result<(), ShellError> {
        self.execute(&format!("am force-stop {}", quote(package)))
            .await?
            .require_success()
            .map(|_| ())
    }
}

/// Quote a shell argument (single quotes, with embedded quotes escaped)
fn quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | ','))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Root shell backed by the `su` binary
pub struct RootShell {
    su_path: String,
}

impl RootShell {
    pub fn new() -> Self {
        Self { su_path: "su".to_string() }
    }

    /// Use a non-default su binary (e.g. /sbin/su on some ROMs)
    pub fn with_su_path(su_path: &str) -> Self {
        Self { su_path: su_path.to_string() }
    }
}

impl Default for RootShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Shell for RootShell {
    async fn execute(&self, cmd: &str) -> Result<CommandOutput, ShellError> {
        debug!("Executing privileged command: {}", cmd);

        let output = Command::new(&self.su_path)
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|e| ShellError::SpawnFailed(e.to_string()))?;

        let result = CommandOutput {
            success: output.status.success(),
            output: String::from_utf8_lossy(&output.stdout).to_string(),
            error: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.success {
            debug!(
                "Command exited with {:?}: {}",
                output.status.code(),
                result.error.trim()
            );
        }

        Ok(result)
    }

    async fn has_root(&self) -> bool {
        match self.execute("id -u").await {
            Ok(out) => out.success && out.output.trim() == "0",
            Err(e) => {
                warn!("Root probe failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory shell used by the uniqueness and correlator tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    pub struct MockShell {
        pub rooted: bool,
        /// Every command string passed to `execute`, in order
        pub commands: Mutex<Vec<String>>,
        /// Properties returned by `getprop` (via the command surface)
        pub properties: Mutex<HashMap<String, String>>,
        /// Commands containing any of these substrings report failure
        pub fail_on: Mutex<Vec<String>>,
        /// When true, property writes do not stick (silent no-op mechanisms)
        pub drop_writes: bool,
    }

    impl MockShell {
        pub fn rooted() -> Self {
            Self {
                rooted: true,
                commands: Mutex::new(Vec::new()),
                properties: Mutex::new(HashMap::new()),
                fail_on: Mutex::new(Vec::new()),
                drop_writes: false,
            }
        }

        pub fn unrooted() -> Self {
            Self { rooted: false, ..Self::rooted() }
        }

        /// A rooted shell where every write mechanism silently no-ops
        pub fn read_only() -> Self {
            Self { drop_writes: true, ..Self::rooted() }
        }

        pub fn fail_matching(self, needle: &str) -> Self {
            self.fail_on.lock().push(needle.to_string());
            self
        }

        pub fn set_prop(&self, key: &str, value: &str) {
            self.properties.lock().insert(key.to_string(), value.to_string());
        }

        pub fn command_log(&self) -> Vec<String> {
            self.commands.lock().clone()
        }
    }

    #[async_trait]
    impl Shell for MockShell {
        async fn execute(&self, cmd: &str) -> Result<CommandOutput, ShellError> {
            self.commands.lock().push(cmd.to_string());

            if self.fail_on.lock().iter().any(|needle| cmd.contains(needle)) {
                return Ok(CommandOutput {
                    success: false,
                    output: String::new(),
                    error: format!("mock failure for: {}", cmd),
                });
            }

            if let Some(rest) = cmd.strip_prefix("getprop ") {
                let key = rest.trim().trim_matches('\'');
                let value = self.properties.lock().get(key).cloned().unwrap_or_default();
                return Ok(CommandOutput { success: true, output: value, error: String::new() });
            }

            if let Some(rest) = cmd.strip_prefix("setprop ") {
                if !self.drop_writes {
                    let mut parts = rest.splitn(2, ' ');
                    let key = parts.next().unwrap_or_default().trim_matches('\'').to_string();
                    let value = parts.next().unwrap_or_default().trim_matches('\'').to_string();
                    self.properties.lock().insert(key, value);
                }
                return Ok(CommandOutput { success: true, output: String::new(), error: String::new() });
            }

            Ok(CommandOutput { success: true, output: String::new(), error: String::new() })
        }

        async fn has_root(&self) -> bool {
            self.rooted
        }
    }

    #[tokio::test]
    async fn mock_shell_records_and_replays_properties() {
        let shell = MockShell::rooted();
        shell.set_property("persist.sys.timezone", "Europe/Paris").await.unwrap();
        assert_eq!(shell.get_property("persist.sys.timezone").await.unwrap(), "Europe/Paris");
        assert_eq!(shell.command_log().len(), 2);
    }

    #[tokio::test]
    async fn read_only_shell_drops_property_writes() {
        let shell = MockShell::read_only();
        shell.set_prop("persist.sys.timezone", "America/New_York");
        shell.set_property("persist.sys.timezone", "Europe/Paris").await.unwrap();
        assert_eq!(shell.get_property("persist.sys.timezone").await.unwrap(), "America/New_York");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_passes_plain_arguments_through() {
        assert_eq!(quote("persist.sys.timezone"), "persist.sys.timezone");
        assert_eq!(quote("Europe/Paris"), "Europe/Paris");
    }

    #[test]
    fn quote_wraps_arguments_with_spaces() {
        assert_eq!(quote("hello world"), "'hello world'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn quote_escapes_embedded_single_quotes() {
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn require_success_surfaces_stderr() {
        let out = CommandOutput {
            success: false,
            output: String::new(),
            error: "permission denied\n".to_string(),
        };
        let err = out.require_success().unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }
}
