//! JSON-RPC client plumbing for worker processes
//!
//! Requests are written as one JSON object per line on the worker's stdin;
//! responses are read line by line from its stdout and matched by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::InvokerError;

#[derive(Debug, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

type ResponseSender = oneshot::Sender<Result<Value, InvokerError>>;

pub type RequestSender = mpsc::Sender<(RpcRequest, ResponseSender)>;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub fn new_request(method: &str, params: Value) -> RpcRequest {
    RpcRequest {
        jsonrpc: "2.0",
        id: REQUEST_ID.fetch_add(1, Ordering::SeqCst),
        method: method.to_string(),
        params,
    }
}

/// Send a request and wait for its response
pub async fn send_request(
    request_tx: &RequestSender,
    method: &str,
    params: Value,
) -> Result<Value, InvokerError> {
    let req = new_request(method, params);
    let (tx, rx) = oneshot::channel();

    request_tx
        .send((req, tx))
        .await
        .map_err(|_| InvokerError::Disconnected)?;

    rx.await.map_err(|_| InvokerError::Disconnected)?
}

/// Spawn the task that owns the worker's stdio.
///
/// Pending requests are failed with `Disconnected` when the worker exits.
pub fn spawn_communication_task(
    mut request_rx: mpsc::Receiver<(RpcRequest, ResponseSender)>,
    stdin: ChildStdin,
    stdout: ChildStdout,
) {
    tokio::spawn(async move {
        let mut stdin = stdin;
        let mut lines = BufReader::new(stdout).lines();
        let mut pending: HashMap<u64, ResponseSender> = HashMap::new();

        loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some((req, response_tx)) = request else {
                        break;
                    };
                    let json = match serde_json::to_string(&req) {
                        Ok(json) => json + "\n",
                        Err(e) => {
                            let _ = response_tx.send(Err(e.into()));
                            continue;
                        }
                    };
                    if stdin.write_all(json.as_bytes()).await.is_err()
                        || stdin.flush().await.is_err()
                    {
                        let _ = response_tx.send(Err(InvokerError::Disconnected));
                        break;
                    }
                    // Callers that gave up dropped their receivers
                    pending.retain(|_, tx| !tx.is_closed());
                    pending.insert(req.id, response_tx);
                }

                // next_line is cancel safe
                result = lines.next_line() => {
                    match result {
                        Ok(None) | Err(_) => break,
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<RpcResponse>(&line) {
                                Ok(response) => {
                                    if let Some(tx) = pending.remove(&response.id) {
                                        let result = match response.error {
                                            Some(err) => Err(InvokerError::Remote {
                                                code: err.code,
                                                message: err.message,
                                            }),
                                            None => Ok(response.result.unwrap_or(Value::Null)),
                                        };
                                        let _ = tx.send(result);
                                    }
                                }
                                Err(e) => warn!("Ignoring malformed worker output: {}", e),
                            }
                        }
                    }
                }
            }
        }

        debug!("Worker channel closed with {} pending request(s)", pending.len());
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(InvokerError::Disconnected));
        }
    });
}
