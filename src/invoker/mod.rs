//! Task invokers
//!
//! The engine calls external work through the `TaskInvoker` trait. Tasks are
//! addressed by name and receive the JSON value selected from the context.
//!
//! - `registry` - in-process closures, for embedding and tests
//! - `http` - `POST {base_url}/{task}` via reqwest
//! - `process` - a long-lived worker process spoken to over JSON-RPC on stdio

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub mod http;
pub mod process;
pub mod registry;
pub mod rpc;

pub use http::HttpInvoker;
pub use process::ProcessInvoker;
pub use registry::TaskRegistry;

/// Calls one external unit of work
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    async fn invoke(&self, task: &str, input: Value) -> Result<Value, TaskInvocationError>;
}

/// Failure of a single invocation. Transient failures are retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskInvocationError {
    pub transient: bool,
    pub message: String,
}

impl TaskInvocationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

/// Errors setting up or talking to an invoker backend
#[derive(Debug, thiserror::Error)]
pub enum InvokerError {
    #[error("Failed to start worker: {0}")]
    StartupFailed(String),

    #[error("Worker program '{program}' not found: {source}")]
    ProgramNotFound {
        program: String,
        source: which::Error,
    },

    #[error("Worker disconnected")]
    Disconnected,

    #[error("Worker error [{code}]: {message}")]
    Remote { code: i32, message: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<InvokerError> for TaskInvocationError {
    fn from(err: InvokerError) -> Self {
        match err {
            InvokerError::Disconnected => TaskInvocationError::transient(err.to_string()),
            InvokerError::Remote { code, message }
                if code == crate::worker::error_codes::TRANSIENT_ERROR =>
            {
                TaskInvocationError::transient(message)
            }
            InvokerError::Remote { message, .. } => TaskInvocationError::permanent(message),
            other => TaskInvocationError::permanent(other.to_string()),
        }
    }
}

/// Invoker backend selected in `runner.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InvokerConfig {
    Http {
        base_url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Process {
        program: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
}

/// Build the invoker described by `config`. Must run inside a tokio runtime.
pub fn build_invoker(config: &InvokerConfig) -> Result<Arc<dyn TaskInvoker>, InvokerError> {
    match config {
        InvokerConfig::Http { base_url, headers } => {
            Ok(Arc::new(HttpInvoker::new(base_url.clone(), headers.clone())?))
        }
        InvokerConfig::Process {
            program,
            args,
            env,
            working_dir,
        } => Ok(Arc::new(ProcessInvoker::spawn(
            program,
            args,
            env,
            working_dir.as_deref(),
        )?)),
    }
}
