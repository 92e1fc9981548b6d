//! # blurflow
//!
//! An asynchronous job-polling workflow engine. Workflows are declarative
//! graphs of task, wait, choice, succeed and fail states interpreted against
//! a JSON execution context, with a hard deadline on every execution.
//!
//! ## Features
//!
//! - **Declarative definitions** - YAML or JSON state graphs, validated up front
//! - **Poll loops** - wait/check/branch cycles run as a loop, never recursion
//! - **Bounded runtime** - every execution ends SUCCEEDED, FAILED or TIMED_OUT
//! - **Retries** - transient task errors are retried with exponential backoff
//! - **Fencing** - late task results never touch a finished execution
//! - **Pluggable invokers** - in-process closures, HTTP, or a worker process
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blurflow::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let definition = face_blur_pipeline()?;
//!
//!     let tasks = TaskRegistry::new()
//!         .register("check_job_status", |mut body| async move {
//!             body["job_status"] = json!("SUCCEEDED");
//!             Ok(body)
//!         })
//!         .register("get_timestamps_and_faces", |_| async { Ok(json!([])) })
//!         .register("blur_faces", |_| async { Ok(json!({ "key": "blurred.mp4" })) });
//!
//!     let engine = ExecutionEngine::new(Arc::new(definition), Arc::new(tasks));
//!     let report = engine.run(json!({ "body": { "job_id": "job-1" } })).await;
//!
//!     println!("Execution finished: {}", report.status);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod invoker;
pub mod trigger;
pub mod worker;
pub mod workflow;

// Re-export main types
pub use engine::{
    ChannelReporter, ExecutionEngine, ExecutionOutcome, ExecutionReport, ExecutionRunner,
    ExecutionStatus, LogReporter, RunSummary, RunnerError, TerminalReporter, Timer, TokioTimer,
};
pub use invoker::{
    build_invoker, HttpInvoker, InvokerConfig, InvokerError, ProcessInvoker, TaskInvocationError,
    TaskInvoker, TaskRegistry,
};
pub use trigger::{ArtifactEvent, TriggerFilter};
pub use workflow::{
    face_blur_pipeline, ContextPath, DefinitionLoader, DefinitionValidationError, EngineConfig,
    ExecutionContext, LoadError, RunnerConfig, State, WorkflowDefinition,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{
        ExecutionEngine, ExecutionOutcome, ExecutionReport, ExecutionRunner, ExecutionStatus,
        TerminalReporter,
    };
    pub use crate::invoker::{TaskInvocationError, TaskInvoker, TaskRegistry};
    pub use crate::trigger::ArtifactEvent;
    pub use crate::workflow::{
        face_blur_pipeline, ChoiceRule, Condition, ContextPath, DefinitionLoader, EngineConfig,
        RunnerConfig, State, WorkflowDefinition,
    };
}
