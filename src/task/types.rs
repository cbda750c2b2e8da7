//! Task and step data model.
//!
//! Steps are a tagged union: each type carries its own fields and the whole
//! task validates at parse time, so an unknown step type or a missing required
//! field is a configuration failure before anything touches the browser.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::browser::{BrowserError, BrowserKind};

/// Task-level errors
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("A task is already executing")]
    AlreadyExecuting,

    #[error("Invalid task: {0}")]
    Invalid(String),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Surfing,
    Parsing,
    Uniqueness,
    Screenshot,
}

/// One backend-issued unit of work
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default, alias = "browserKind")]
    pub browser: BrowserKind,
    #[serde(default, alias = "proxyRef")]
    pub proxy: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_result_key() -> String {
    "extracted".to_string()
}

fn default_scroll_amount() -> i64 {
    600
}

fn default_loop_iterations() -> u32 {
    3
}

impl Task {
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.id.is_empty() {
            return Err(TaskError::Invalid("task id is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(TaskError::Invalid("task has no steps".into()));
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|e| TaskError::Invalid(format!("step {}: {}", index, e)))?;
        }
        Ok(())
    }
}

/// Policy for a false condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFalse {
    Continue,
    /// Raise a loop-break signal consumed by the enclosing loop
    Break,
    Fail,
}

impl Default for OnFalse {
    fn default() -> Self {
        OnFalse::Continue
    }
}

/// Named predicates for condition steps
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "predicate", rename_all = "snake_case")]
pub enum Predicate {
    ElementExists { selector: String },
    PageLoaded,
    UrlContains { value: String },
    TextExists { value: String },
}

/// One primitive browser operation or control-flow construct.
///
/// Immutable once a task starts; `loop` steps own their nested list, forming a
/// strictly nested tree with no sharing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    #[serde(rename_all = "camelCase")]
    Navigate {
        url: String,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Wait {
        duration_ms: u64,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Click {
        selector: String,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Scroll {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default = "default_scroll_amount")]
        amount: i64,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Input {
        selector: String,
        text: String,
        #[serde(default)]
        clear_first: bool,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Submit {
        selector: String,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Extract {
        selector: String,
        #[serde(default)]
        attribute: Option<String>,
        #[serde(default = "default_result_key")]
        result_key: String,
        #[serde(default)]
        extract_ad_urls: bool,
        /// Interpret the selector as an XPath expression
        #[serde(default)]
        xpath: bool,
        /// Optional regex the extracted values must match
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Screenshot {
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        upload: bool,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Upload {
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Loop {
        steps: Vec<Step>,
        #[serde(default = "default_loop_iterations")]
        max_iterations: u32,
        #[serde(default)]
        optional: bool,
    },
    #[serde(rename_all = "camelCase")]
    Condition {
        #[serde(flatten)]
        predicate: Predicate,
        #[serde(default)]
        on_false: OnFalse,
        #[serde(default)]
        optional: bool,
    },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Navigate { .. } => "navigate",
            Step::Wait { .. } => "wait",
            Step::Click { .. } => "click",
            Step::Scroll { .. } => "scroll",
            Step::Input { .. } => "input",
            Step::Submit { .. } => "submit",
            Step::Extract { .. } => "extract",
            Step::Screenshot { .. } => "screenshot",
            Step::Upload { .. } => "upload",
            Step::Loop { .. } => "loop",
            Step::Condition { .. } => "condition",
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            Step::Navigate { optional, .. }
            | Step::Wait { optional, .. }
            | Step::Click { optional, .. }
            | Step::Scroll { optional, .. }
            | Step::Input { optional, .. }
            | Step::Submit { optional, .. }
            | Step::Extract { optional, .. }
            | Step::Screenshot { optional, .. }
            | Step::Upload { optional, .. }
            | Step::Loop { optional, .. }
            | Step::Condition { optional, .. } => *optional,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Step::Navigate { url, .. } if url.is_empty() => Err("navigate url is empty".into()),
            Step::Click { selector, .. } if selector.is_empty() => {
                Err("click selector is empty".into())
            }
            Step::Input { selector, .. } if selector.is_empty() => {
                Err("input selector is empty".into())
            }
            Step::Submit { selector, .. } if selector.is_empty() => {
                Err("submit selector is empty".into())
            }
            Step::Extract { selector, pattern, .. } => {
                if selector.is_empty() {
                    return Err("extract selector is empty".into());
                }
                if let Some(pattern) = pattern {
                    regex::Regex::new(pattern)
                        .map_err(|e| format!("extract pattern invalid: {}", e))?;
                }
                Ok(())
            }
            Step::Loop { steps, max_iterations, .. } => {
                if steps.is_empty() {
                    return Err("loop has no nested steps".into());
                }
                if *max_iterations == 0 {
                    return Err("loop max_iterations is zero".into());
                }
                for (index, nested) in steps.iter().enumerate() {
                    nested
                        .validate()
                        .map_err(|e| format!("nested step {}: {}", index, e))?;
                }
                Ok(())
            }
            Step::Condition { predicate, .. } => match predicate {
                Predicate::ElementExists { selector } if selector.is_empty() => {
                    Err("condition selector is empty".into())
                }
                Predicate::UrlContains { value } | Predicate::TextExists { value }
                    if value.is_empty() =>
                {
                    Err("condition value is empty".into())
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// Result of one step (the final attempt when retried)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub execution_time_ms: u64,
}

impl StepResult {
    pub fn ok(data: Option<Value>) -> Self {
        Self { success: true, data, error: None, warning: None, execution_time_ms: 0 }
    }

    pub fn ok_with_warning(data: Option<Value>, warning: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            warning: Some(warning.into()),
            execution_time_ms: 0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            warning: None,
            execution_time_ms: 0,
        }
    }
}

/// Control-flow signal a step hands back to its enclosing loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    /// Stop the enclosing loop; not a failure
    BreakLoop,
}

/// A step result plus its control-flow signal
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub result: StepResult,
    pub flow: StepFlow,
}

impl StepOutcome {
    pub fn of(result: StepResult) -> Self {
        Self { result, flow: StepFlow::Continue }
    }

    pub fn breaking(result: StepResult) -> Self {
        Self { result, flow: StepFlow::BreakLoop }
    }
}

/// Task lifecycle status reported to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Partial => "partial",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Aggregated result of one task execution
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub success: bool,
    pub step_results: Vec<StepResult>,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Running,
            success: false,
            step_results: Vec::new(),
            data: Map::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// Immediate rejection: another task holds the in-flight slot
    pub fn rejected(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            success: false,
            step_results: Vec::new(),
            data: Map::new(),
            error: Some("a task is already executing".to_string()),
            duration_ms: 0,
        }
    }

    pub fn failed(task_id: &str, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            success: false,
            step_results: Vec::new(),
            data: Map::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Merge step data into the accumulated map
    pub fn merge_data(&mut self, data: &Value) {
        if let Value::Object(fields) = data {
            for (key, value) in fields {
                merge_value(&mut self.data, key, value.clone());
            }
        }
    }
}

/// Last-writer-wins, except list-valued keys which append and deduplicate
pub fn merge_value(map: &mut Map<String, Value>, key: &str, value: Value) {
    match (map.get_mut(key), value) {
        (Some(Value::Array(existing)), Value::Array(items)) => {
            for item in items {
                if !existing.contains(&item) {
                    existing.push(item);
                }
            }
        }
        (_, value) => {
            map.insert(key.to_string(), value);
        }
    }
}
