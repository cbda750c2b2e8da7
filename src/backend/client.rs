//! HTTP client for the fleet backend.
//!
//! The agent is push-reported: task status transitions and final results go
//! up as JSON, screenshots as multipart uploads. Log shipping is best-effort
//! and never fails a task.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use serde_json::json;
use tracing::{debug, warn};

use crate::task::{Task, TaskResult, TaskStatus};

/// Response to a screenshot upload
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

pub struct BackendClient {
    base_url: String,
    device_id: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str, device_id: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build backend client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
            api_key,
            client,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Report a task lifecycle transition
    pub async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let url = self.url(&format!("/api/tasks/{}/status", task_id));
        let response = self
            .authorize(self.client.post(&url))
            .json(&json!({
                "deviceId": self.device_id,
                "status": status,
            }))
            .send()
            .await
            .with_context(|| format!("status update for task {} failed", task_id))?;

        if !response.status().is_success() {
            bail!("status update rejected: HTTP {}", response.status());
        }
        debug!("Task {} status reported: {}", task_id, status.as_str());
        Ok(())
    }

    /// Deliver the aggregated task result
    pub async fn send_task_result(&self, result: &TaskResult) -> Result<bool> {
        let url = self.url(&format!("/api/tasks/{}/result", result.task_id));
        let response = self
            .authorize(self.client.post(&url))
            .json(&json!({
                "deviceId": self.device_id,
                "result": result,
            }))
            .send()
            .await
            .with_context(|| format!("result delivery for task {} failed", result.task_id))?;

        Ok(response.status().is_success())
    }

    /// Upload a screenshot as multipart form data
    pub async fn upload_screenshot(
        &self,
        task_id: &str,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadResponse> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("image/png")
            .context("invalid screenshot mime type")?;

        let form = Form::new()
            .text("deviceId", self.device_id.clone())
            .text("taskId", task_id.to_string())
            .part("screenshot", part);

        let url = self.url("/api/screenshots");
        let response = self
            .authorize(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .context("screenshot upload failed")?;

        if !response.status().is_success() {
            bail!("screenshot upload rejected: HTTP {}", response.status());
        }

        response
            .json()
            .await
            .context("invalid screenshot upload response")
    }

    /// Ship a log line upstream; failures are swallowed
    pub async fn send_log(&self, level: &str, tag: &str, message: &str, task_id: Option<&str>) {
        let url = self.url("/api/logs");
        let result = self
            .authorize(self.client.post(&url))
            .json(&json!({
                "deviceId": self.device_id,
                "level": level,
                "tag": tag,
                "message": message,
                "taskId": task_id,
            }))
            .send()
            .await;

        if let Err(e) = result {
            debug!("Log shipping failed: {}", e);
        }
    }

    /// Poll for the next dispatched task; `None` when the queue is empty
    pub async fn fetch_next_task(&self) -> Result<Option<Task>> {
        let url = self.url(&format!("/api/devices/{}/tasks/next", self.device_id));
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .context("task poll failed")?;

        match response.status() {
            reqwest::StatusCode::NO_CONTENT | reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let task: Task = response.json().await.context("invalid task payload")?;
                Ok(Some(task))
            }
            status => {
                warn!("Task poll rejected: HTTP {}", status);
                bail!("task poll rejected: HTTP {}", status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = BackendClient::new("https://fleet.example/", "dev-1", None).unwrap();
        assert_eq!(
            client.url("/api/tasks/t-1/status"),
            "https://fleet.example/api/tasks/t-1/status"
        );
    }

    #[test]
    fn upload_response_tolerates_missing_fields() {
        let response: UploadResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(response.success);
        assert!(response.path.is_none());
        assert!(response.url.is_none());
    }
}
