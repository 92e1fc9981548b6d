//! Execution runner
//!
//! Turns qualifying artifact events into executions and runs many of them
//! concurrently, bounded by `parallel`:
//!
//! - `trigger` runs one event to completion, after the start task if one is
//!   configured. The start task gets the same per-task budget and transient
//!   retries as the engine's own task states.
//! - `run_all` runs a batch behind a semaphore
//! - `serve` feeds a pool of `parallel` workers from a queue until it closes

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, instrument, warn};

use super::executor::ExecutionEngine;
use super::execution::ExecutionStatus;
use super::result::ExecutionReport;
use super::timer::instant_after;
use crate::invoker::TaskInvocationError;
use crate::workflow::duration::format_duration;
use crate::trigger::{ArtifactEvent, TriggerFilter};
use crate::workflow::{RunnerConfig, TriggerConfig};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Artifact '{key}' does not match any trigger suffix")]
    NotQualified { key: String },

    #[error("Start task '{task}' failed: {error}")]
    StartTask {
        task: String,
        error: TaskInvocationError,
    },

    #[error("Execution task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Counts of what happened to the events a runner handled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Events that never started an execution
    pub rejected: usize,
}

impl RunSummary {
    pub fn record(&mut self, result: &Result<ExecutionReport, RunnerError>) {
        match result {
            Ok(report) => match report.status {
                ExecutionStatus::Succeeded => self.succeeded += 1,
                ExecutionStatus::Failed => self.failed += 1,
                ExecutionStatus::TimedOut => self.timed_out += 1,
                ExecutionStatus::Running => {}
            },
            Err(_) => self.rejected += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.timed_out + self.rejected
    }

    pub fn success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0 && self.rejected == 0
    }
}

#[derive(Clone)]
pub struct ExecutionRunner {
    engine: ExecutionEngine,
    filter: TriggerFilter,
    start_task: Option<String>,
    parallel: usize,
}

impl ExecutionRunner {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self::with_trigger(engine, &TriggerConfig::default())
    }

    pub fn with_trigger(engine: ExecutionEngine, trigger: &TriggerConfig) -> Self {
        Self {
            engine,
            filter: TriggerFilter::new(trigger.suffixes.clone()),
            start_task: trigger.start_task.clone(),
            parallel: 4,
        }
    }

    pub fn with_config(engine: ExecutionEngine, config: &RunnerConfig) -> Self {
        Self::with_trigger(engine, &config.trigger).parallel(config.parallel)
    }

    pub fn parallel(mut self, max: usize) -> Self {
        self.parallel = max.max(1);
        self
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Start one execution for `event` and wait for its outcome
    #[instrument(skip(self, event), fields(key = %event.key))]
    pub async fn trigger(&self, event: ArtifactEvent) -> Result<ExecutionReport, RunnerError> {
        if !self.filter.qualifies(&event) {
            info!("Ignoring artifact");
            return Err(RunnerError::NotQualified { key: event.key });
        }

        let input = match &self.start_task {
            Some(task) => json!({ "body": self.start(task, &event).await? }),
            None => event.into_context(),
        };

        Ok(self.engine.run(input).await)
    }

    /// Invoke the start task under its budget, retrying transient failures
    async fn start(&self, task: &str, event: &ArtifactEvent) -> Result<Value, RunnerError> {
        let config = self.engine.config();
        let timer = self.engine.timer();
        let budget = config.task_timeout_for(task);
        let max_retries = config.max_retries_for(task);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let attempt_deadline = instant_after(timer.now(), budget);

            let result = tokio::select! {
                result = self.engine.invoker().invoke(task, event.descriptor()) => result,
                _ = timer.sleep_until(attempt_deadline) => Err(TaskInvocationError::transient(
                    format!("Task '{}' exceeded its {} budget", task, format_duration(budget)),
                )),
            };

            let error = match result {
                Ok(body) => return Ok(body),
                Err(error) if error.transient && attempt <= max_retries => error,
                Err(error) => {
                    return Err(RunnerError::StartTask {
                        task: task.to_string(),
                        error,
                    })
                }
            };

            let delay = config.retry.backoff(attempt);
            warn!(
                "Retrying start task (attempt {}/{}) after {}: {}",
                attempt + 1,
                max_retries + 1,
                format_duration(delay),
                error
            );
            timer.sleep_until(instant_after(timer.now(), delay)).await;
        }
    }

    /// Run every event, at most `parallel` at a time. Results keep the input order.
    pub async fn run_all(
        &self,
        events: Vec<ArtifactEvent>,
    ) -> Vec<Result<ExecutionReport, RunnerError>> {
        let semaphore = Arc::new(Semaphore::new(self.parallel));

        let handles: Vec<_> = events
            .into_iter()
            .map(|event| {
                let runner = self.clone();
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    // The semaphore is never closed
                    let _permit = semaphore.acquire_owned().await.ok();
                    runner.trigger(event).await
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.map_err(RunnerError::from).and_then(|result| result))
            .collect()
    }

    /// Drain `events` with `parallel` workers until the channel closes
    pub async fn serve(&self, events: async_channel::Receiver<ArtifactEvent>) -> RunSummary {
        let summary = Arc::new(Mutex::new(RunSummary::default()));

        let workers: Vec<_> = (0..self.parallel)
            .map(|worker| {
                let runner = self.clone();
                let events = events.clone();
                let summary = summary.clone();
                tokio::spawn(async move {
                    while let Ok(event) = events.recv().await {
                        let result = runner.trigger(event).await;
                        if let Err(e) = &result {
                            warn!(worker, "{}", e);
                        }
                        summary.lock().await.record(&result);
                    }
                })
            })
            .collect();

        for joined in join_all(workers).await {
            if let Err(e) = joined {
                warn!("Runner worker stopped: {}", e);
            }
        }

        let summary = summary.lock().await.clone();
        info!(
            "Handled {} artifact(s): {} succeeded, {} failed, {} timed out, {} rejected",
            summary.total(),
            summary.succeeded,
            summary.failed,
            summary.timed_out,
            summary.rejected
        );
        summary
    }
}
