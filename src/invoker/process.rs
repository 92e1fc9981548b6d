//! Process invoker
//!
//! Spawns a worker binary once and sends every invocation to it as a
//! `task/invoke` JSON-RPC request. Workers are written with `worker::serve`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::info;

use super::rpc::{send_request, spawn_communication_task, RequestSender};
use super::{InvokerError, TaskInvocationError, TaskInvoker};

pub struct ProcessInvoker {
    request_tx: RequestSender,
    #[allow(dead_code)]
    child: Child,
}

impl ProcessInvoker {
    /// Resolve `program` on `PATH` (or as a path) and start it
    pub fn spawn(
        program: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<Self, InvokerError> {
        let binary = which::which(program).map_err(|source| InvokerError::ProgramNotFound {
            program: program.to_string(),
            source,
        })?;

        let mut cmd = Command::new(&binary);
        cmd.args(args);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        for (k, v) in env {
            cmd.env(k, v);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            InvokerError::StartupFailed(format!(
                "Failed to spawn worker '{}': {}",
                binary.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| InvokerError::StartupFailed("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InvokerError::StartupFailed("Failed to get stdout".to_string()))?;

        let (request_tx, request_rx) = mpsc::channel(100);
        spawn_communication_task(request_rx, stdin, stdout);

        info!("Started worker process {}", binary.display());

        Ok(Self { request_tx, child })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, InvokerError> {
        send_request(&self.request_tx, method, params).await
    }

    /// Names of the tasks the worker serves
    pub async fn list_tasks(&self) -> Result<Vec<String>, InvokerError> {
        let result = self.request("task/list", json!({})).await?;
        Ok(result
            .get("tasks")
            .and_then(|v| v.as_array())
            .map(|tasks| {
                tasks
                    .iter()
                    .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn ping(&self) -> Result<(), InvokerError> {
        self.request("ping", json!({})).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskInvoker for ProcessInvoker {
    async fn invoke(&self, task: &str, input: Value) -> Result<Value, TaskInvocationError> {
        let result = self
            .request("task/invoke", json!({ "task": task, "input": input }))
            .await?;
        Ok(result.get("output").cloned().unwrap_or(Value::Null))
    }
}
