//! Task and scenario execution.
//!
//! `types` is the backend-facing data model, `executor` interprets single
//! steps with retry, and `orchestrator` runs a whole task under the
//! single-task concurrency rule.

mod executor;
mod orchestrator;
mod types;

pub use executor::{ExecutorConfig, StepContext, StepExecutor};
pub use orchestrator::{DriverFactory, TaskOrchestrator};
pub use types::{
    merge_value, OnFalse, Predicate, Step, StepFlow, StepOutcome, StepResult, Task, TaskError,
    TaskResult, TaskStatus, TaskType,
};
