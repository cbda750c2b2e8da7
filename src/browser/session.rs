//! Chrome/Chromium session over CDP.
//!
//! One session per task: the orchestrator launches it at task start and closes
//! it in cleanup, always. Fingerprint overrides (user agent, timezone,
//! geolocation, accept-language) are applied through CDP emulation at the
//! engine level, so page scripts cannot observe the override machinery.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetGeolocationOverrideParams, SetTimezoneOverrideParams, SetUserAgentOverrideParams,
    UserAgentBrandVersion, UserAgentMetadata,
};
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use dashmap::DashSet;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::extract::adurl::is_ad_network_url;
use crate::extract::dom::js_quote;
use crate::proxy::ProxySpec;

use super::fingerprint::{random_user_agent, FingerprintOverrides};
use super::{BrowserDriver, BrowserError, BrowserKind};

/// Sequential session naming (Session-1, Session-2, ...)
static SESSION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Find a Chrome/Chromium executable on the system
fn find_chrome() -> Option<std::path::PathBuf> {
    let candidates = [
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/opt/chromium/chrome",
        "/system/bin/chromium",
    ];

    candidates
        .iter()
        .map(std::path::PathBuf::from)
        .find(|p| p.exists())
}

/// Detect the installed Chrome major version for a consistent fingerprint.
/// Returns (major, full version string), e.g. (124, "124.0.6367.82").
fn detect_chrome_version(chrome_path: &std::path::Path) -> Option<(u32, String)> {
    let output = std::process::Command::new(chrome_path)
        .arg("--version")
        .output()
        .ok()?;
    let version_str = String::from_utf8_lossy(&output.stdout);
    let full = version_str
        .split_whitespace()
        .find(|s| s.contains('.'))?
        .trim()
        .to_string();
    let major: u32 = full.split('.').next()?.parse().ok()?;
    Some((major, full))
}

/// Configuration for one browser session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Explicit Chrome executable; auto-detected when unset
    pub chrome_path: Option<String>,
    /// User data directory; a throwaway temp dir when unset
    pub user_data_dir: Option<String>,
    /// Proxy spec to route the session through
    pub proxy: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
    /// Poll interval for the wait loops
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            user_data_dir: None,
            proxy: None,
            window_width: 1280,
            window_height: 800,
            poll_interval_ms: 250,
        }
    }
}

impl SessionConfig {
    /// Config with a per-task data directory under the system temp dir
    pub fn for_task(task_id: &str) -> Self {
        let dir = std::env::temp_dir()
            .join("droid-agent")
            .join("browser_data")
            .join(task_id);

        Self {
            user_data_dir: Some(dir.to_string_lossy().to_string()),
            ..Default::default()
        }
    }

    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn chrome_path(mut self, path: Option<String>) -> Self {
        self.chrome_path = path;
        self
    }
}

/// A live browser session implementing the driver contract
pub struct ChromeSession {
    pub id: String,
    browser: Arc<RwLock<Option<Browser>>>,
    page: Arc<RwLock<Option<Page>>>,
    alive: Arc<AtomicBool>,
    /// Ad-serving request URLs observed during page loads
    intercepted: Arc<DashSet<String>>,
    poll_interval: Duration,
}

impl ChromeSession {
    /// Launch a browser and apply the fingerprint overrides.
    ///
    /// `webview` tasks run headless (the embedded-WebView equivalent),
    /// `chrome` tasks get a visible window.
    pub async fn launch(
        kind: BrowserKind,
        config: SessionConfig,
        fingerprint: &FingerprintOverrides,
    ) -> Result<Self, BrowserError> {
        let session_id = format!("Session-{}", SESSION_COUNTER.fetch_add(1, Ordering::Relaxed));

        let chrome_path = config
            .chrome_path
            .as_ref()
            .map(std::path::PathBuf::from)
            .or_else(find_chrome)
            .ok_or_else(|| {
                BrowserError::LaunchFailed(
                    "no Chrome/Chromium executable found on this device".to_string(),
                )
            })?;

        info!(
            "Launching browser session {} ({:?}, headless: {})",
            session_id,
            kind,
            kind.is_headless()
        );

        let mut builder = BrowserConfig::builder().chrome_executable(&chrome_path);

        if !kind.is_headless() {
            builder = builder.with_head();
        }

        if let Some(ref dir) = config.user_data_dir {
            let _ = std::fs::create_dir_all(dir);
            builder = builder.user_data_dir(dir);
        }

        // Anti-automation tells and UI noise; the rest of the stealth surface
        // is handled by the CDP overrides below
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-default-browser-check")
            .arg("--disable-notifications")
            .arg("--disable-session-crashed-bubble")
            .arg("--disable-translate")
            .arg("--disable-dev-shm-usage")
            // Required when running as root
            .arg("--no-sandbox");

        if let Some(ref proxy) = config.proxy {
            match ProxySpec::parse(proxy) {
                Ok(spec) => {
                    if spec.has_auth() {
                        // Chrome cannot consume inline proxy credentials; the
                        // egress installer handles authenticated upstreams
                        warn!(
                            "Session {} proxy {} has credentials Chrome will not use",
                            session_id, spec
                        );
                    }
                    builder = builder.arg(format!("--proxy-server={}", spec.chrome_arg()));
                }
                Err(e) => {
                    return Err(BrowserError::LaunchFailed(format!("bad proxy spec: {}", e)));
                }
            }
        }

        builder = builder.window_size(config.window_width, config.window_height);

        let browser_config = builder
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // When the handler stream ends, Chrome has disconnected or crashed
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let handler_session = session_id.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    debug!("Session {} handler event error: {:?}", handler_session, event);
                }
            }
            warn!("Session {} Chrome disconnected (handler ended)", handler_session);
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Take the tab Chrome opens with; close any extras
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            };

            for extra in pages {
                let _ = extra.close().await;
            }

            main_page
        };

        Self::apply_fingerprint(&page, fingerprint, &chrome_path).await?;

        // Passive ad-request capture: every request to a known ad-serving host
        // lands in the intercepted set for the fusion pipeline
        let intercepted = Arc::new(DashSet::new());
        match page.event_listener::<EventRequestWillBeSent>().await {
            Ok(mut events) => {
                let intercepted_sink = intercepted.clone();
                let capture_session = session_id.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.next().await {
                        let url = event.request.url.clone();
                        if is_ad_network_url(&url) {
                            debug!("Session {} intercepted ad request: {}", capture_session, url);
                            intercepted_sink.insert(url);
                        }
                    }
                });
            }
            Err(e) => warn!("Session {} request capture unavailable: {}", session_id, e),
        }

        info!("Browser session {} ready", session_id);

        Ok(Self {
            id: session_id,
            browser: Arc::new(RwLock::new(Some(browser))),
            page: Arc::new(RwLock::new(Some(page))),
            alive,
            intercepted,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(50)),
        })
    }

    /// Apply user agent, accept-language, timezone and geolocation overrides.
    ///
    /// Everything goes through CDP emulation so the values hold at the engine
    /// level; no JavaScript prototypes are touched.
    async fn apply_fingerprint(
        page: &Page,
        fingerprint: &FingerprintOverrides,
        chrome_path: &std::path::Path,
    ) -> Result<(), BrowserError> {
        let user_agent = fingerprint
            .user_agent
            .clone()
            .unwrap_or_else(random_user_agent);

        let major = detect_chrome_version(chrome_path)
            .map(|(major, _)| major.to_string())
            .unwrap_or_else(|| "124".to_string());

        let metadata = UserAgentMetadata::builder()
            .brands(vec![
                UserAgentBrandVersion::new("Google Chrome", &major),
                UserAgentBrandVersion::new("Chromium", &major),
                UserAgentBrandVersion::new("Not=A?Brand", "24"),
            ])
            .platform("Android")
            .platform_version("13.0.0")
            .architecture("arm")
            .model("")
            .mobile(true)
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        let mut ua_builder = SetUserAgentOverrideParams::builder()
            .user_agent(&user_agent)
            .platform("Android")
            .user_agent_metadata(metadata);
        if let Some(accept_language) = fingerprint.accept_language() {
            ua_builder = ua_builder.accept_language(accept_language);
        }
        let ua_params = ua_builder
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        page.execute(ua_params)
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("UA override failed: {}", e)))?;

        if let Some(ref timezone) = fingerprint.timezone {
            page.execute(SetTimezoneOverrideParams::new(timezone.clone()))
                .await
                .map_err(|e| BrowserError::LaunchFailed(format!("timezone override failed: {}", e)))?;
        }

        if let Some((lat, lon)) = fingerprint.geolocation {
            let geo_params = SetGeolocationOverrideParams::builder()
                .latitude(lat)
                .longitude(lon)
                .accuracy(10.0)
                .build();
            page.execute(geo_params)
                .await
                .map_err(|e| BrowserError::LaunchFailed(format!("geolocation override failed: {}", e)))?;
        }

        debug!(
            "Fingerprint applied: ua={}, tz={:?}, geo={:?}",
            user_agent, fingerprint.timezone, fingerprint.geolocation
        );
        Ok(())
    }

    fn ensure_alive(&self) -> Result<(), BrowserError> {
        if self.alive.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BrowserError::ConnectionLost("browser disconnected".into()))
        }
    }

    async fn page(&self) -> Result<Page, BrowserError> {
        self.ensure_alive()?;
        self.page
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| BrowserError::ConnectionLost("no active page".into()))
    }

    /// Evaluate a script that yields a boolean
    async fn evaluate_bool(&self, script: &str) -> Result<bool, BrowserError> {
        Ok(self.evaluate(script).await?.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl BrowserDriver for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page().await?;
        debug!("Session {} navigating to {}", self.id, url);
        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<bool, BrowserError> {
        let page = self.page().await?;
        match page.find_element(selector).await {
            Ok(element) => {
                element
                    .click()
                    .await
                    .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
                Ok(true)
            }
            Err(_) => {
                debug!("Session {} click target not found: {}", self.id, selector);
                Ok(false)
            }
        }
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<bool, BrowserError> {
        let script = format!(
            "(function() {{ window.scrollBy({}, {}); return true; }})()",
            dx, dy
        );
        self.evaluate_bool(&script).await
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<bool, BrowserError> {
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({});
                if (!el) return false;
                el.scrollIntoView({{ behavior: 'smooth', block: 'center' }});
                return true;
            }})()"#,
            js_quote(selector)
        );
        self.evaluate_bool(&script).await
    }

    async fn input_text(&self, selector: &str, text: &str) -> Result<bool, BrowserError> {
        let page = self.page().await?;

        // Native typing first; many widgets only commit on real key events
        if let Ok(element) = page.find_element(selector).await {
            let _ = element.click().await;
            if element.type_str(text).await.is_ok() {
                return Ok(true);
            }
            debug!("Session {} native typing failed, using DOM fallback", self.id);
        }

        // DOM fallback: set the value and fire the framework events
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.value = {text};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return el.value === {text};
            }})()"#,
            sel = js_quote(selector),
            text = js_quote(text)
        );
        self.evaluate_bool(&script).await
    }

    async fn clear_field(&self, selector: &str) -> Result<bool, BrowserError> {
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({});
                if (!el) return false;
                el.value = '';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                return true;
            }})()"#,
            js_quote(selector)
        );
        self.evaluate_bool(&script).await
    }

    async fn focus(&self, selector: &str) -> Result<bool, BrowserError> {
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({});
                if (!el) return false;
                el.focus();
                return document.activeElement === el;
            }})()"#,
            js_quote(selector)
        );
        self.evaluate_bool(&script).await
    }

    async fn submit(&self, selector: &str) -> Result<bool, BrowserError> {
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({});
                if (!el) return false;
                const form = el.tagName === 'FORM' ? el : (el.form || el.closest('form'));
                if (!form) return false;
                if (form.requestSubmit) form.requestSubmit(); else form.submit();
                return true;
            }})()"#,
            js_quote(selector)
        );
        self.evaluate_bool(&script).await
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        let page = self.page().await?;
        let result = page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let page = self.page().await?;
        page.url()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| BrowserError::ConnectionLost("no URL".into()))
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        let page = self.page().await?;
        page.content()
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let page = self.page().await?;
        page.screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .build(),
        )
        .await
        .map_err(|e| BrowserError::ScreenshotFailed(e.to_string()))
    }

    async fn wait_for_page_load(&self, timeout: Duration) -> Result<bool, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.evaluate("document.readyState").await {
                Ok(Value::String(state)) if state == "complete" => return Ok(true),
                Ok(_) => {}
                // Navigation can tear the context down mid-poll
                Err(BrowserError::JavaScriptError(_)) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Result<bool, BrowserError> {
        let script = format!(
            "!!document.querySelector({})",
            js_quote(selector)
        );
        let deadline = Instant::now() + timeout;
        loop {
            if self.evaluate_bool(&script).await.unwrap_or(false) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.ensure_alive()?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn intercepted_ad_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.intercepted.iter().map(|u| u.key().clone()).collect();
        urls.sort();
        urls
    }

    fn clear_intercepted_urls(&self) {
        self.intercepted.clear();
    }

    async fn close(&self) -> Result<(), BrowserError> {
        // Mark dead first so in-flight calls fail fast
        self.alive.store(false, Ordering::Relaxed);

        {
            let mut page = self.page.write().await;
            if let Some(p) = page.take() {
                let _ = p.close().await;
            }
        }

        {
            let mut browser = self.browser.write().await;
            if let Some(mut b) = browser.take() {
                // Graceful close, brief grace period, then force kill so no
                // Chrome child processes linger
                let _ = b.close().await;
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = b.kill().await;
            }
        }

        info!("Browser session {} closed", self.id);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}
