//! HTTP invoker
//!
//! Each invocation is `POST {base_url}/{task}` with the input as the JSON
//! body. The response body is the task output.
//!
//! Request timeouts, connection failures, 408, 429 and 5xx responses are
//! transient; other error statuses are permanent. Retrying is left to the
//! engine.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{InvokerError, TaskInvocationError, TaskInvoker};

#[derive(Debug)]
pub struct HttpInvoker {
    base_url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(
        base_url: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Result<Self, InvokerError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into(),
            headers,
            client,
        })
    }

    fn build_url(&self, task: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/{}", base, task.trim_start_matches('/'))
    }
}

/// Whether an error status is worth another attempt
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}

#[async_trait]
impl TaskInvoker for HttpInvoker {
    async fn invoke(&self, task: &str, input: Value) -> Result<Value, TaskInvocationError> {
        let url = self.build_url(task);
        let start = std::time::Instant::now();

        let mut request = self.client.post(&url).json(&input);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        debug!("Executing POST {}", url);

        let response = request.send().await.map_err(|e| {
            warn!("Request failed: {}", e);
            if e.is_connect() || e.is_timeout() {
                TaskInvocationError::transient(e.to_string())
            } else {
                TaskInvocationError::permanent(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| TaskInvocationError::transient(e.to_string()))?;

        info!("POST {} -> {} ({}ms)", url, status, start.elapsed().as_millis());

        if !(200..300).contains(&status) {
            let message = format!("HTTP {} from task '{}': {}", status, task, body_text.trim());
            return Err(if is_transient_status(status) {
                TaskInvocationError::transient(message)
            } else {
                TaskInvocationError::permanent(message)
            });
        }

        Ok(if body_text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text))
        })
    }
}
