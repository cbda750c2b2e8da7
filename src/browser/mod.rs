//! Browser automation.
//!
//! The task executor talks to the [`BrowserDriver`] trait; `ChromeSession`
//! implements it over CDP for both the headless "webview" kind and headful
//! external Chrome.

mod driver;
mod errors;
mod fingerprint;
mod session;

pub use driver::{BrowserDriver, BrowserKind};
pub use errors::BrowserError;
pub use fingerprint::{random_user_agent, FingerprintOverrides, SharedFingerprint};
pub use session::{ChromeSession, SessionConfig};

use std::sync::Arc;

/// Launch a driver for the requested browser kind with the current
/// fingerprint overrides applied.
pub async fn launch_driver(
    kind: BrowserKind,
    config: SessionConfig,
    fingerprint: &FingerprintOverrides,
) -> Result<Arc<dyn BrowserDriver>, BrowserError> {
    let session = ChromeSession::launch(kind, config, fingerprint).await?;
    Ok(Arc::new(session))
}

#[cfg(test)]
pub(crate) use driver::testing;
