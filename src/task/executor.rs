//! Step execution with typed retry.
//!
//! One executor interprets one step at a time against the session passed in
//! through the context — no global browser state. Failed attempts back off
//! exponentially (doubling from a fixed base, no cap, no jitter) and the first
//! success short-circuits the remaining retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::browser::{BrowserDriver, BrowserError};
use crate::extract::dom::{css_extract_script, xpath_extract_script};
use crate::extract::AdUrlFusion;

use super::types::{merge_value, OnFalse, Predicate, Step, StepFlow, StepOutcome, StepResult};

/// Inner attempts for input steps (widget false negatives are common)
const INPUT_INNER_ATTEMPTS: u32 = 3;

/// Timing knobs for the interpreter
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Base backoff delay; doubles after every failed attempt
    pub retry_base_delay_ms: u64,
    /// How long navigate waits for the page to finish loading
    pub load_timeout: Duration,
    /// Fixed settle delay after a completed navigation
    pub settle_delay_ms: u64,
    /// How long element-dependent steps wait for their target
    pub element_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: 1000,
            load_timeout: Duration::from_secs(30),
            settle_delay_ms: 1500,
            element_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything a step handler needs, passed explicitly
pub struct StepContext {
    pub driver: Arc<dyn BrowserDriver>,
    pub backend: Option<Arc<BackendClient>>,
    pub task_id: String,
    pub device_id: String,
    pub max_retries: u32,
    /// Most recent screenshot, for upload steps
    pub last_screenshot: Option<Vec<u8>>,
}

impl StepContext {
    pub fn new(driver: Arc<dyn BrowserDriver>, task_id: &str, device_id: &str, max_retries: u32) -> Self {
        Self {
            driver,
            backend: None,
            task_id: task_id.to_string(),
            device_id: device_id.to_string(),
            max_retries: max_retries.max(1),
            last_screenshot: None,
        }
    }

    pub fn with_backend(mut self, backend: Option<Arc<BackendClient>>) -> Self {
        self.backend = backend;
        self
    }
}

/// Delay before retrying after `failed_attempt` attempts have failed.
/// Attempt k (k >= 2) is preceded by `base * 2^(k-2)`.
fn backoff_delay(base_ms: u64, failed_attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(failed_attempt.saturating_sub(1))))
}

pub struct StepExecutor {
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run one step with retry; only the final attempt surfaces upward.
    pub async fn run_with_retry(&self, step: &Step, ctx: &mut StepContext) -> StepOutcome {
        let attempts = ctx.max_retries.max(1);
        let mut last: Option<StepOutcome> = None;

        for attempt in 1..=attempts {
            let start = Instant::now();
            let mut outcome = match self.run_once(step, ctx).await {
                Ok(outcome) => outcome,
                // Faults are caught here at the retry boundary, never higher
                Err(e) => StepOutcome::of(StepResult::failed(e.to_string())),
            };
            outcome.result.execution_time_ms = start.elapsed().as_millis() as u64;

            if outcome.result.success {
                if attempt > 1 {
                    debug!("Step {} succeeded on attempt {}/{}", step.kind(), attempt, attempts);
                }
                return outcome;
            }

            warn!(
                "Step {} attempt {}/{} failed: {}",
                step.kind(),
                attempt,
                attempts,
                outcome.result.error.as_deref().unwrap_or("unknown")
            );
            last = Some(outcome);

            if attempt < attempts {
                tokio::time::sleep(backoff_delay(self.config.retry_base_delay_ms, attempt)).await;
            }
        }

        last.unwrap_or_else(|| StepOutcome::of(StepResult::failed("no attempts executed")))
    }

    async fn run_once(&self, step: &Step, ctx: &mut StepContext) -> Result<StepOutcome, BrowserError> {
        match step {
            Step::Navigate { url, .. } => self.navigate(url, ctx).await,
            Step::Wait { duration_ms, .. } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(StepOutcome::of(StepResult::ok(None)))
            }
            Step::Click { selector, .. } => self.click(selector, ctx).await,
            Step::Scroll { selector, amount, .. } => self.scroll(selector.as_deref(), *amount, ctx).await,
            Step::Input { selector, text, clear_first, .. } => {
                self.input(selector, text, *clear_first, ctx).await
            }
            Step::Submit { selector, .. } => {
                if ctx.driver.submit(selector).await? {
                    Ok(StepOutcome::of(StepResult::ok(None)))
                } else {
                    Ok(StepOutcome::of(StepResult::failed(format!(
                        "no form found for selector {:?}",
                        selector
                    ))))
                }
            }
            Step::Extract { selector, attribute, result_key, extract_ad_urls, xpath, pattern, .. } => {
                self.extract(
                    selector,
                    attribute.as_deref(),
                    result_key,
                    *extract_ad_urls,
                    *xpath,
                    pattern.as_deref(),
                    ctx,
                )
                .await
            }
            Step::Screenshot { filename, upload, .. } => {
                self.screenshot(filename.as_deref(), *upload, ctx).await
            }
            Step::Upload { filename, .. } => self.upload(filename.as_deref(), ctx).await,
            Step::Loop { steps, max_iterations, .. } => {
                self.run_loop(steps, *max_iterations, ctx).await
            }
            Step::Condition { predicate, on_false, .. } => {
                self.condition(predicate, *on_false, ctx).await
            }
        }
    }

    async fn navigate(&self, url: &str, ctx: &mut StepContext) -> Result<StepOutcome, BrowserError> {
        // Stale intercepted URLs from the previous page must not leak into
        // this page's extraction results
        ctx.driver.clear_intercepted_urls();

        ctx.driver.navigate(url).await?;

        let loaded = ctx.driver.wait_for_page_load(self.config.load_timeout).await?;
        if !loaded {
            warn!("Page load timed out for {}, continuing anyway", url);
        }

        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;

        Ok(StepOutcome::of(StepResult::ok(Some(json!({
            "url": url,
            "loaded": loaded,
        })))))
    }

    async fn click(&self, selector: &str, ctx: &mut StepContext) -> Result<StepOutcome, BrowserError> {
        let found = ctx
            .driver
            .wait_for_element(selector, self.config.element_timeout)
            .await?;
        if !found {
            return Ok(StepOutcome::of(StepResult::failed(format!(
                "element not found: {}",
                selector
            ))));
        }

        if ctx.driver.click(selector).await? {
            Ok(StepOutcome::of(StepResult::ok(None)))
        } else {
            Ok(StepOutcome::of(StepResult::failed(format!(
                "click had no effect on {}",
                selector
            ))))
        }
    }

    async fn scroll(
        &self,
        selector: Option<&str>,
        amount: i64,
        ctx: &mut StepContext,
    ) -> Result<StepOutcome, BrowserError> {
        let scrolled = match selector {
            Some(selector) => ctx.driver.scroll_into_view(selector).await?,
            None => ctx.driver.scroll_by(0, amount).await?,
        };

        if scrolled {
            Ok(StepOutcome::of(StepResult::ok(None)))
        } else {
            Ok(StepOutcome::of(StepResult::failed("scroll target not found")))
        }
    }

    /// Input with deliberate false-negative tolerance: many input widgets
    /// report failure while the text is in fact entered, so exhausting the
    /// inner attempts still reports success, with a warning attached.
    async fn input(
        &self,
        selector: &str,
        text: &str,
        clear_first: bool,
        ctx: &mut StepContext,
    ) -> Result<StepOutcome, BrowserError> {
        if clear_first {
            if let Err(e) = ctx.driver.clear_field(selector).await {
                warn!("Clearing {} before input failed: {}", selector, e);
            }
        }

        // Focus is best-effort; widgets that swallow the click still accept text
        match ctx.driver.focus(selector).await {
            Ok(true) => {}
            Ok(false) => debug!("Focus click on {} had no effect", selector),
            Err(e) => debug!("Focus click on {} failed: {}", selector, e),
        }

        for inner in 1..=INPUT_INNER_ATTEMPTS {
            if ctx.driver.input_text(selector, text).await? {
                return Ok(StepOutcome::of(StepResult::ok(None)));
            }
            debug!(
                "Input into {} reported failure (inner attempt {}/{})",
                selector, inner, INPUT_INNER_ATTEMPTS
            );
            if inner < INPUT_INNER_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(250 * inner as u64)).await;
            }
        }

        Ok(StepOutcome::of(StepResult::ok_with_warning(
            None,
            format!(
                "input widget reported failure {} times; text may still have been entered",
                INPUT_INNER_ATTEMPTS
            ),
        )))
    }

    async fn extract(
        &self,
        selector: &str,
        attribute: Option<&str>,
        result_key: &str,
        extract_ad_urls: bool,
        xpath: bool,
        pattern: Option<&str>,
        ctx: &mut StepContext,
    ) -> Result<StepOutcome, BrowserError> {
        let script = if xpath {
            xpath_extract_script(selector, attribute)
        } else {
            css_extract_script(selector, attribute)
        };

        let mut values: Vec<String> = match ctx.driver.evaluate(&script).await? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        };

        if let Some(pattern) = pattern {
            // Validated at parse time
            if let Ok(re) = regex::Regex::new(pattern) {
                values.retain(|v| re.is_match(v));
            }
        }

        let mut data = Map::new();
        data.insert(result_key.to_string(), json!(values));
        data.insert(format!("{}_count", result_key), json!(values.len()));

        if extract_ad_urls {
            let fusion = AdUrlFusion::new(ctx.driver.as_ref());
            let ad_set = fusion.run(&values).await;
            info!(
                "Extract {:?}: {} links, {} ad URLs, {} domains",
                result_key,
                values.len(),
                ad_set.urls.len(),
                ad_set.domains.len()
            );
            data.insert(format!("{}_ad_urls", result_key), json!(ad_set.urls));
            data.insert(format!("{}_domains", result_key), json!(ad_set.domains));
        }

        Ok(StepOutcome::of(StepResult::ok(Some(Value::Object(data)))))
    }

    async fn screenshot(
        &self,
        filename: Option<&str>,
        upload: bool,
        ctx: &mut StepContext,
    ) -> Result<StepOutcome, BrowserError> {
        let bytes = ctx.driver.screenshot().await?;
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| default_screenshot_name(&ctx.task_id));

        ctx.last_screenshot = Some(bytes.clone());

        let mut data = Map::new();
        data.insert("filename".to_string(), json!(filename));
        data.insert("bytes".to_string(), json!(bytes.len()));

        if upload {
            match self.push_screenshot(ctx, bytes, &filename).await {
                Ok(upload_data) => {
                    data.insert("upload".to_string(), upload_data);
                }
                Err(e) => {
                    return Ok(StepOutcome::of(StepResult::failed(format!(
                        "screenshot upload failed: {}",
                        e
                    ))))
                }
            }
        }

        Ok(StepOutcome::of(StepResult::ok(Some(Value::Object(data)))))
    }

    async fn upload(
        &self,
        filename: Option<&str>,
        ctx: &mut StepContext,
    ) -> Result<StepOutcome, BrowserError> {
        let bytes = match ctx.last_screenshot.clone() {
            Some(bytes) => bytes,
            None => {
                return Ok(StepOutcome::of(StepResult::failed(
                    "no screenshot captured before upload step",
                )))
            }
        };

        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| default_screenshot_name(&ctx.task_id));

        match self.push_screenshot(ctx, bytes, &filename).await {
            Ok(upload_data) => Ok(StepOutcome::of(StepResult::ok(Some(json!({
                "filename": filename,
                "upload": upload_data,
            }))))),
            Err(e) => Ok(StepOutcome::of(StepResult::failed(format!(
                "upload failed: {}",
                e
            )))),
        }
    }

    async fn push_screenshot(
        &self,
        ctx: &StepContext,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<Value, String> {
        let backend = ctx
            .backend
            .clone()
            .ok_or_else(|| "no backend client configured".to_string())?;

        let response = backend
            .upload_screenshot(&ctx.task_id, bytes, filename)
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "success": response.success,
            "path": response.path,
            "url": response.url,
        }))
    }

    /// Re-interpret a nested step list for up to `max_iterations` rounds.
    ///
    /// A failing non-optional nested step is recorded but never aborts the
    /// loop; only a `break` condition stops it early.
    async fn run_loop(
        &self,
        steps: &[Step],
        max_iterations: u32,
        ctx: &mut StepContext,
    ) -> Result<StepOutcome, BrowserError> {
        let mut loop_data = Map::new();
        let mut errors: Vec<String> = Vec::new();
        let mut completed = 0u32;
        let mut stopped = false;

        'iterations: for iteration in 1..=max_iterations {
            debug!("Loop iteration {}/{}", iteration, max_iterations);

            for nested in steps {
                // Human-timing jitter between nested steps
                let jitter = rand::thread_rng().gen_range(300..1200);
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                let outcome = Box::pin(self.run_with_retry(nested, ctx)).await;

                if let Some(data) = &outcome.result.data {
                    if let Value::Object(fields) = data {
                        for (key, value) in fields {
                            merge_value(&mut loop_data, key, value.clone());
                        }
                    }
                }

                if outcome.flow == StepFlow::BreakLoop {
                    info!("Loop stopped by break condition in iteration {}", iteration);
                    stopped = true;
                    break 'iterations;
                }

                if !outcome.result.success && !nested.is_optional() {
                    let error = format!(
                        "iteration {} step {}: {}",
                        iteration,
                        nested.kind(),
                        outcome.result.error.as_deref().unwrap_or("unknown")
                    );
                    warn!("Loop recorded error: {}", error);
                    errors.push(error);
                }
            }

            completed = iteration;

            if iteration < max_iterations {
                let pause = rand::thread_rng().gen_range(500..1500);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
        }

        loop_data.insert("iterations".to_string(), json!(completed));
        loop_data.insert("stopped_early".to_string(), json!(stopped));
        if !errors.is_empty() {
            loop_data.insert("errors".to_string(), json!(errors));
        }

        Ok(StepOutcome::of(StepResult::ok(Some(Value::Object(loop_data)))))
    }

    async fn condition(
        &self,
        predicate: &Predicate,
        on_false: OnFalse,
        ctx: &mut StepContext,
    ) -> Result<StepOutcome, BrowserError> {
        let holds = match predicate {
            Predicate::ElementExists { selector } => {
                ctx.driver
                    .wait_for_element(selector, Duration::from_secs(1))
                    .await?
            }
            Predicate::PageLoaded => ctx.driver.wait_for_page_load(Duration::from_secs(1)).await?,
            Predicate::UrlContains { value } => ctx.driver.current_url().await?.contains(value.as_str()),
            Predicate::TextExists { value } => {
                let script = format!(
                    "(document.body ? document.body.innerText : '').includes({})",
                    crate::extract::dom::js_quote(value)
                );
                ctx.driver.evaluate(&script).await?.as_bool().unwrap_or(false)
            }
        };

        let data = Some(json!({ "condition": holds }));

        if holds {
            return Ok(StepOutcome::of(StepResult::ok(data)));
        }

        match on_false {
            OnFalse::Continue => Ok(StepOutcome::of(StepResult::ok(data))),
            // Not a failure: the enclosing loop consumes the signal
            OnFalse::Break => Ok(StepOutcome::breaking(StepResult::ok(data))),
            OnFalse::Fail => Ok(StepOutcome::of(StepResult::failed("condition not met"))),
        }
    }
}

fn default_screenshot_name(task_id: &str) -> String {
    format!(
        "{}-{}.png",
        task_id,
        chrono::Utc::now().format("%Y%m%d-%H%M%S")
    )
}
