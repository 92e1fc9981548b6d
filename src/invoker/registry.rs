//! In-process task registry
//!
//! Maps task names to async closures. Useful when the tasks live in the same
//! binary as the engine, and for tests.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::{TaskInvocationError, TaskInvoker};

type TaskFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, TaskInvocationError>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler
    pub fn register<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskInvocationError>> + Send + 'static,
    {
        self.tasks
            .insert(name.into(), Arc::new(move |input| handler(input).boxed()));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered task names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[async_trait]
impl TaskInvoker for TaskRegistry {
    async fn invoke(&self, task: &str, input: Value) -> Result<Value, TaskInvocationError> {
        let handler = self
            .tasks
            .get(task)
            .cloned()
            .ok_or_else(|| TaskInvocationError::permanent(format!("Unknown task: {}", task)))?;
        handler(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registry_invoke() {
        let registry = TaskRegistry::new()
            .register("echo", |input| async move { Ok(input) })
            .register("fail", |_| async {
                Err(TaskInvocationError::permanent("intentional failure"))
            });

        assert_eq!(registry.names(), vec!["echo", "fail"]);
        assert!(registry.contains("echo"));

        let output = registry.invoke("echo", json!({ "a": 1 })).await.unwrap();
        assert_eq!(output, json!({ "a": 1 }));

        let err = registry.invoke("fail", Value::Null).await.unwrap_err();
        assert!(!err.transient);
        assert_eq!(err.message, "intentional failure");
    }

    #[tokio::test]
    async fn test_unknown_task_is_permanent() {
        let registry = TaskRegistry::new();
        let err = registry.invoke("missing", Value::Null).await.unwrap_err();
        assert!(!err.transient);
        assert!(err.message.contains("Unknown task: missing"));
    }
}
