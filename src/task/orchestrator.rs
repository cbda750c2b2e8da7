//! Task orchestration.
//!
//! One task at a time, system-wide: a second `execute` while one is in flight
//! is rejected immediately, never queued. The orchestrator owns the browser
//! driver's lifecycle — created at task start, closed in cleanup, always —
//! and cancellation works by closing the driver out from under the current
//! step, which then fails fast on its next driver call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::backend::BackendClient;
use crate::browser::{BrowserDriver, BrowserError, BrowserKind};
use crate::stats::GlobalStats;

use super::executor::{ExecutorConfig, StepContext, StepExecutor};
use super::types::{Task, TaskResult, TaskStatus};

/// Creates a driver for a task: (browser kind, proxy spec, task id)
pub type DriverFactory = Arc<
    dyn Fn(BrowserKind, Option<String>, String) -> BoxFuture<'static, Result<Arc<dyn BrowserDriver>, BrowserError>>
        + Send
        + Sync,
>;

pub struct TaskOrchestrator {
    in_flight: AtomicBool,
    executor: StepExecutor,
    factory: DriverFactory,
    backend: Option<Arc<BackendClient>>,
    stats: Arc<GlobalStats>,
    device_id: String,
    current_driver: RwLock<Option<Arc<dyn BrowserDriver>>>,
}

impl TaskOrchestrator {
    pub fn new(
        factory: DriverFactory,
        executor_config: ExecutorConfig,
        backend: Option<Arc<BackendClient>>,
        stats: Arc<GlobalStats>,
        device_id: String,
    ) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            executor: StepExecutor::new(executor_config),
            factory,
            backend,
            stats,
            device_id,
            current_driver: RwLock::new(None),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Cancel the in-flight task by closing its driver.
    ///
    /// The current step observes the closed driver and fails naturally; no
    /// separate interrupt signal exists.
    pub async fn cancel(&self) {
        if let Some(driver) = self.current_driver.write().await.take() {
            info!("Cancel requested: closing browser driver");
            let _ = driver.close().await;
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Execute a task to completion and report the result upstream.
    pub async fn execute(&self, task: Task) -> TaskResult {
        // Single-task concurrency: reject, never queue
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Task {} rejected: another task is executing", task.id);
            self.stats.record_rejection();
            return TaskResult::rejected(&task.id);
        }

        let result = self.execute_inner(&task).await;

        // Cleanup always runs: close the driver and clear the flag, even when
        // a step or the reporting path blew up
        if let Some(driver) = self.current_driver.write().await.take() {
            let _ = driver.close().await;
        }
        self.in_flight.store(false, Ordering::SeqCst);

        self.stats.record_task(result.status);
        result
    }

    async fn execute_inner(&self, task: &Task) -> TaskResult {
        let started = Instant::now();
        info!(
            "Executing task {} ({:?}, {} steps, maxRetries {})",
            task.id,
            task.task_type,
            task.steps.len(),
            task.max_retries
        );

        if let Err(e) = task.validate() {
            error!("Task {} invalid: {}", task.id, e);
            let mut result = TaskResult::failed(&task.id, e.to_string());
            result.duration_ms = started.elapsed().as_millis() as u64;
            self.report(&result).await;
            return result;
        }

        let driver = match (self.factory)(task.browser, task.proxy.clone(), task.id.clone()).await {
            Ok(driver) => driver,
            Err(e) => {
                error!("Task {} browser init failed: {}", task.id, e);
                let mut result = TaskResult::failed(&task.id, format!("browser init failed: {}", e));
                result.duration_ms = started.elapsed().as_millis() as u64;
                self.report(&result).await;
                return result;
            }
        };
        *self.current_driver.write().await = Some(driver.clone());

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.update_task_status(&task.id, TaskStatus::Running).await {
                warn!("Task {} running notification failed: {}", task.id, e);
            }
        }

        let mut ctx = StepContext::new(driver, &task.id, &self.device_id, task.max_retries)
            .with_backend(self.backend.clone());

        let mut result = TaskResult::new(&task.id);
        let mut succeeded = 0usize;

        for (index, step) in task.steps.iter().enumerate() {
            let outcome = self.executor.run_with_retry(step, &mut ctx).await;
            self.stats
                .record_step(outcome.result.success, outcome.result.execution_time_ms);

            if let Some(data) = &outcome.result.data {
                self.count_ad_urls(data);
                result.merge_data(data);
            }

            let success = outcome.result.success;
            if success {
                succeeded += 1;
            }
            result.step_results.push(outcome.result);

            if !success && !step.is_optional() && !task.continue_on_error {
                warn!(
                    "Task {} step {} ({}) failed; skipping remaining steps",
                    task.id,
                    index,
                    step.kind()
                );
                break;
            }
        }

        result.status = if succeeded == task.steps.len() {
            TaskStatus::Completed
        } else if succeeded > 0 {
            TaskStatus::Partial
        } else {
            TaskStatus::Failed
        };
        result.success = result.status == TaskStatus::Completed;
        if !result.success {
            result.error = result
                .step_results
                .iter()
                .rev()
                .find(|r| !r.success)
                .and_then(|r| r.error.clone());
        }
        result.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Task {} finished: {} ({}/{} steps succeeded, {}ms)",
            task.id,
            result.status.as_str(),
            succeeded,
            task.steps.len(),
            result.duration_ms
        );

        // Reported before the in-flight flag clears in the caller
        self.report(&result).await;
        result
    }

    async fn report(&self, result: &TaskResult) {
        let Some(backend) = &self.backend else { return };

        if let Err(e) = backend.update_task_status(&result.task_id, result.status).await {
            warn!("Task {} status report failed: {}", result.task_id, e);
        }

        match backend.send_task_result(result).await {
            Ok(true) => info!("Task {} result delivered", result.task_id),
            Ok(false) => warn!("Task {} result rejected by backend", result.task_id),
            Err(e) => warn!("Task {} result delivery failed: {}", result.task_id, e),
        }

        backend
            .send_log(
                "info",
                "orchestrator",
                &format!(
                    "task finished: {} ({} steps)",
                    result.status.as_str(),
                    result.step_results.len()
                ),
                Some(&result.task_id),
            )
            .await;
    }

    fn count_ad_urls(&self, data: &Value) {
        let Value::Object(fields) = data else { return };
        for (key, value) in fields {
            if key.ends_with("_ad_urls") {
                if let Value::Array(urls) = value {
                    self.stats.record_ad_urls(urls.len() as u64);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::MockDriver;
    use crate::task::types::{Step, TaskType};
    use std::time::Duration;

    fn factory_for(driver: Arc<MockDriver>) -> DriverFactory {
        Arc::new(move |_kind, _proxy, _task_id| {
            let driver = driver.clone();
            Box::pin(async move { Ok(driver as Arc<dyn BrowserDriver>) })
        })
    }

    fn orchestrator(driver: Arc<MockDriver>) -> TaskOrchestrator {
        TaskOrchestrator::new(
            factory_for(driver),
            ExecutorConfig {
                retry_base_delay_ms: 5,
                load_timeout: Duration::from_millis(50),
                settle_delay_ms: 1,
                element_timeout: Duration::from_millis(50),
            },
            None,
            Arc::new(GlobalStats::new()),
            "device-1".to_string(),
        )
    }

    fn task(steps: Vec<Step>) -> Task {
        Task {
            id: "t-1".to_string(),
            name: "test".to_string(),
            task_type: TaskType::Surfing,
            browser: BrowserKind::Webview,
            proxy: None,
            steps,
            max_retries: 3,
            continue_on_error: false,
        }
    }

    #[tokio::test]
    async fn all_steps_succeeding_yields_completed() {
        let driver = Arc::new(MockDriver::new().with_element("#x"));
        let orch = orchestrator(driver.clone());

        let result = orch
            .execute(task(vec![
                Step::Navigate { url: "https://a.test".into(), optional: false },
                Step::Wait { duration_ms: 1, optional: false },
                Step::Click { selector: "#x".into(), optional: false },
            ]))
            .await;

        assert!(result.success);
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.step_results.len(), 3);
        assert!(!orch.is_executing());
        // Cleanup closed the driver
        assert!(!driver.is_alive());
    }

    #[tokio::test]
    async fn failing_click_after_retries_yields_partial_with_error() {
        // navigate + wait succeed, click retries 3 times against a missing
        // element and fails; remaining steps would be skipped
        let driver = Arc::new(MockDriver::new());
        let orch = orchestrator(driver);

        let result = orch
            .execute(task(vec![
                Step::Navigate { url: "https://a.test".into(), optional: false },
                Step::Wait { duration_ms: 1, optional: false },
                Step::Click { selector: "#x".into(), optional: false },
            ]))
            .await;

        assert!(!result.success);
        assert_eq!(result.step_results.len(), 3);
        assert!(result.error.is_some());
        assert_eq!(result.status, TaskStatus::Partial);
    }

    #[tokio::test]
    async fn non_optional_failure_skips_remaining_steps() {
        let driver = Arc::new(MockDriver::new());
        let orch = orchestrator(driver.clone());

        let result = orch
            .execute(task(vec![
                Step::Click { selector: "#gone".into(), optional: false },
                Step::Navigate { url: "https://never.test".into(), optional: false },
            ]))
            .await;

        assert_eq!(result.step_results.len(), 1);
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(driver.navigations.lock().is_empty());
    }

    #[tokio::test]
    async fn optional_failure_does_not_skip() {
        let driver = Arc::new(MockDriver::new());
        let orch = orchestrator(driver.clone());

        let result = orch
            .execute(task(vec![
                Step::Click { selector: "#gone".into(), optional: true },
                Step::Navigate { url: "https://next.test".into(), optional: false },
            ]))
            .await;

        assert_eq!(result.step_results.len(), 2);
        assert_eq!(result.status, TaskStatus::Partial);
        assert_eq!(driver.navigations.lock().as_slice(), ["https://next.test"]);
    }

    #[tokio::test]
    async fn continue_on_error_executes_all_steps() {
        let driver = Arc::new(MockDriver::new());
        let orch = orchestrator(driver.clone());

        let mut t = task(vec![
            Step::Click { selector: "#gone".into(), optional: false },
            Step::Navigate { url: "https://next.test".into(), optional: false },
        ]);
        t.continue_on_error = true;

        let result = orch.execute(t).await;
        assert_eq!(result.step_results.len(), 2);
        assert_eq!(result.status, TaskStatus::Partial);
    }

    #[tokio::test]
    async fn second_execute_is_rejected_without_queuing() {
        let driver = Arc::new(MockDriver::new());
        let orch = Arc::new(orchestrator(driver));

        let slow = {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.execute(task(vec![Step::Wait { duration_ms: 400, optional: false }]))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orch.is_executing());

        let rejected = orch
            .execute(task(vec![Step::Wait { duration_ms: 1, optional: false }]))
            .await;
        assert!(!rejected.success);
        assert!(rejected
            .error
            .as_deref()
            .unwrap()
            .contains("already executing"));
        assert!(rejected.step_results.is_empty());

        let first = slow.await.unwrap();
        assert!(first.success);
        assert!(!orch.is_executing());
    }

    #[tokio::test]
    async fn invalid_task_fails_without_touching_the_browser() {
        let driver = Arc::new(MockDriver::new());
        let orch = orchestrator(driver.clone());

        let result = orch.execute(task(vec![])).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("no steps"));
        // Factory never ran, so the mock was never closed by cleanup
        assert!(driver.is_alive());
    }

    #[tokio::test]
    async fn cancel_closes_driver_and_in_progress_step_fails_naturally() {
        let driver = Arc::new(MockDriver::new().with_element("#x"));
        let orch = Arc::new(orchestrator(driver.clone()));

        let running = {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.execute(task(vec![
                    Step::Wait { duration_ms: 300, optional: false },
                    Step::Click { selector: "#x".into(), optional: false },
                ]))
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.cancel().await;
        assert!(!driver.is_alive());

        let result = running.await.unwrap();
        // The wait finished, the click observed the closed driver
        assert!(!result.success);
        assert_eq!(result.status, TaskStatus::Partial);
        assert!(!orch.is_executing());
    }

    #[tokio::test]
    async fn extracted_data_is_merged_into_the_task_result() {
        let driver = Arc::new(
            MockDriver::new()
                .with_url("http://news.test/")
                .with_script_result("querySelectorAll", serde_json::json!(["hello"])),
        );
        let orch = orchestrator(driver);

        let result = orch
            .execute(task(vec![Step::Extract {
                selector: ".msg".into(),
                attribute: None,
                result_key: "messages".into(),
                extract_ad_urls: false,
                xpath: false,
                pattern: None,
                optional: false,
            }]))
            .await;

        assert!(result.success);
        assert_eq!(result.data["messages"], serde_json::json!(["hello"]));
    }
}
