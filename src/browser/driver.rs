//! The browser driver contract.
//!
//! Everything the task executor needs from a browser is expressed through this
//! trait, so the step interpreter and the extraction pipeline never touch CDP
//! directly. The production implementation is [`ChromeSession`]; tests drive the
//! same code paths through a scripted mock.
//!
//! [`ChromeSession`]: crate::browser::ChromeSession

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::BrowserError;

/// Which browser engine a task wants.
///
/// `webview` maps to a headless Chromium shell (the embedded-WebView
/// equivalent), `chrome` to a headful external Chrome window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Webview,
    Chrome,
}

impl Default for BrowserKind {
    fn default() -> Self {
        BrowserKind::Webview
    }
}

impl BrowserKind {
    pub fn is_headless(&self) -> bool {
        matches!(self, BrowserKind::Webview)
    }
}

/// Primitive browser operations consumed by the step executor.
///
/// Boolean returns report whether the operation took effect on the page (e.g.
/// the element was found and clicked); `Err` means the driver itself failed
/// (disconnected, protocol error). A closed driver fails every call fast, which
/// is how task cancellation propagates into an in-flight step.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn click(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<bool, BrowserError>;

    async fn scroll_into_view(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn input_text(&self, selector: &str, text: &str) -> Result<bool, BrowserError>;

    async fn clear_field(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn focus(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn submit(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Evaluate JavaScript in the page, returning its JSON result
    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn page_source(&self) -> Result<String, BrowserError>;

    /// PNG screenshot of the current viewport
    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;

    /// Poll until `document.readyState == "complete"` or the timeout elapses
    async fn wait_for_page_load(&self, timeout: Duration) -> Result<bool, BrowserError>;

    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Result<bool, BrowserError>;

    /// Ad-serving request URLs passively captured since the last clear
    fn intercepted_ad_urls(&self) -> Vec<String>;

    fn clear_intercepted_urls(&self);

    async fn close(&self) -> Result<(), BrowserError>;

    fn is_alive(&self) -> bool;
}
