//! Task worker SDK
//!
//! Write task implementations in Rust and serve them to a `ProcessInvoker`.
//!
//! 1. Implement `TaskWorker`:
//!
//! ```ignore
//! use blurflow::worker::{TaskInfo, TaskWorker, WorkerError};
//! use serde_json::Value;
//!
//! struct Detector;
//!
//! impl TaskWorker for Detector {
//!     fn invoke(&mut self, task: &str, input: Value) -> Result<Value, WorkerError> {
//!         match task {
//!             "check_job_status" => Ok(serde_json::json!({ "job_status": "SUCCEEDED" })),
//!             _ => Err(WorkerError::UnknownTask(task.to_string())),
//!         }
//!     }
//!
//!     fn list_tasks(&self) -> Vec<TaskInfo> {
//!         vec![TaskInfo::new("check_job_status", "Poll the detection job")]
//!     }
//! }
//! ```
//!
//! 2. Serve it from a binary:
//!
//! ```ignore
//! fn main() {
//!     blurflow::worker::serve(Detector);
//! }
//! ```
//!
//! 3. Point the runner at the binary:
//!
//! ```yaml
//! invoker:
//!   type: process
//!   program: ./target/debug/my-worker
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod server;

pub use server::{serve, serve_io};

/// JSON-RPC error codes used between workers and the process invoker
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    /// Permanent task failure
    pub const TASK_ERROR: i32 = -32000;
    /// Task failure worth retrying
    pub const TRANSIENT_ERROR: i32 = -32010;
}

/// Information about a served task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub description: String,
}

impl TaskInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// The engine may retry the task
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

impl WorkerError {
    pub fn code(&self) -> i32 {
        match self {
            WorkerError::Transient(_) => error_codes::TRANSIENT_ERROR,
            WorkerError::Permanent(_) | WorkerError::UnknownTask(_) => error_codes::TASK_ERROR,
        }
    }
}

/// Implemented by task worker binaries
pub trait TaskWorker: Send {
    /// Run `task` against `input`
    fn invoke(&mut self, task: &str, input: Value) -> Result<Value, WorkerError>;

    fn list_tasks(&self) -> Vec<TaskInfo>;
}
