//! JSON-RPC server for task workers
//!
//! Reads one request per line and writes one response per line. Methods:
//! `task/invoke`, `task/list`, `ping`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};

use super::{error_codes, TaskWorker};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Serve `worker` on stdin/stdout until stdin closes
pub fn serve<W: TaskWorker>(worker: W) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    // A broken stdout means the invoker is gone; nothing left to report to.
    let _ = serve_io(worker, stdin.lock(), stdout.lock());
}

/// Serve `worker` over arbitrary line-oriented streams
pub fn serve_io<W, R, O>(worker: W, input: R, mut output: O) -> io::Result<()>
where
    W: TaskWorker,
    R: BufRead,
    O: Write,
{
    let mut server = RpcServer { worker };

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => server.handle_request(request),
            Err(e) => RpcResponse::error(0, error_codes::PARSE_ERROR, e.to_string()),
        };

        let json = serde_json::to_string(&response)?;
        writeln!(output, "{}", json)?;
        output.flush()?;
    }

    Ok(())
}

struct RpcServer<W> {
    worker: W,
}

impl<W: TaskWorker> RpcServer<W> {
    fn handle_request(&mut self, req: RpcRequest) -> RpcResponse {
        match req.method.as_str() {
            "task/invoke" => self.handle_invoke(req.id, req.params),
            "task/list" => self.handle_list(req.id),
            "ping" => RpcResponse::success(req.id, json!({ "pong": true })),
            _ => RpcResponse::error(req.id, error_codes::METHOD_NOT_FOUND, "Method not found"),
        }
    }

    fn handle_invoke(&mut self, id: u64, params: Value) -> RpcResponse {
        let task = match params.get("task").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => {
                return RpcResponse::error(id, error_codes::INVALID_PARAMS, "Missing 'task' param")
            }
        };

        let input = params.get("input").cloned().unwrap_or(Value::Null);

        match self.worker.invoke(task, input) {
            Ok(output) => RpcResponse::success(id, json!({ "output": output })),
            Err(e) => RpcResponse::error(id, e.code(), e.to_string()),
        }
    }

    fn handle_list(&self, id: u64) -> RpcResponse {
        let tasks: Vec<Value> = self
            .worker
            .list_tasks()
            .into_iter()
            .map(|t| json!({ "name": t.name, "description": t.description }))
            .collect();

        RpcResponse::success(id, json!({ "tasks": tasks }))
    }
}
