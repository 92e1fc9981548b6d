//! A single run of a workflow definition
//!
//! Only the engine loop that created an `Execution` mutates it. Task results
//! are applied through fencing tokens: each invocation gets a fresh token and
//! only the one outstanding token may write to the context. Once the
//! execution is terminal nothing is applied any more.
//!
//! The spawned invocation behind the outstanding token is tracked too. It is
//! aborted as soon as its token is abandoned or superseded, when the
//! execution finishes, and when the execution is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::EngineError;
use super::result::{ExecutionOutcome, ExecutionReport};
use super::timer::instant_after;
use crate::workflow::{ContextPath, ExecutionContext, WorkflowDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
        };
        f.write_str(name)
    }
}

/// Identifies one task invocation of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationToken {
    pub execution_id: Uuid,
    pub sequence: u64,
}

impl fmt::Display for InvocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.execution_id, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FenceError {
    #[error("execution {execution_id} is already {status}")]
    Terminal {
        execution_id: Uuid,
        status: ExecutionStatus,
    },

    #[error("invocation {token} is not the outstanding invocation")]
    Stale { token: InvocationToken },
}

#[derive(Debug)]
pub struct Execution {
    id: Uuid,
    definition: Arc<WorkflowDefinition>,
    context: ExecutionContext,
    current_state: String,
    started_at: DateTime<Utc>,
    started: Instant,
    deadline: Instant,
    status: ExecutionStatus,
    outcome: Option<ExecutionOutcome>,
    finished_at: Option<DateTime<Utc>>,
    visited_count: u64,
    sequence: u64,
    outstanding: Option<InvocationToken>,
    in_flight: Option<(InvocationToken, AbortHandle)>,
}

impl Execution {
    /// Start an execution at the definition's start state.
    ///
    /// The deadline is `started + timeout` and is never extended. Timeouts
    /// beyond `FAR_FUTURE` are clamped to it.
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        input: Value,
        started: Instant,
        timeout: Duration,
    ) -> Self {
        let current_state = definition.start_at().to_string();
        Self {
            id: Uuid::new_v4(),
            definition,
            context: ExecutionContext::from_value(input),
            current_state,
            started_at: Utc::now(),
            started,
            deadline: instant_after(started, timeout),
            status: ExecutionStatus::Running,
            outcome: None,
            finished_at: None,
            visited_count: 0,
            sequence: 0,
            outstanding: None,
            in_flight: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.outcome.as_ref()
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn visited_count(&self) -> u64 {
        self.visited_count
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Count an entry into the current state
    pub fn record_visit(&mut self) {
        self.visited_count += 1;
    }

    pub fn transition(&mut self, next: &str) {
        self.current_state = next.to_string();
    }

    /// Issue the token for a new invocation, superseding any outstanding one
    pub fn issue_token(&mut self) -> InvocationToken {
        self.stop_in_flight();
        self.sequence += 1;
        let token = InvocationToken {
            execution_id: self.id,
            sequence: self.sequence,
        };
        self.outstanding = Some(token);
        token
    }

    pub fn outstanding(&self) -> Option<InvocationToken> {
        self.outstanding
    }

    /// Track the spawned invocation behind `token`. An invocation whose token
    /// is no longer outstanding is aborted right away.
    pub fn attach(&mut self, token: InvocationToken, handle: AbortHandle) {
        if self.outstanding == Some(token) {
            self.stop_in_flight();
            self.in_flight = Some((token, handle));
        } else {
            handle.abort();
        }
    }

    /// Whether an invocation is still tracked as running
    pub fn has_in_flight(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Give up on an invocation and abort it; its result will be rejected if
    /// it ever arrives
    pub fn abandon(&mut self, token: InvocationToken) {
        if self.outstanding == Some(token) {
            self.outstanding = None;
        }
        if matches!(self.in_flight, Some((tracked, _)) if tracked == token) {
            self.stop_in_flight();
        }
    }

    fn stop_in_flight(&mut self) {
        if let Some((token, handle)) = self.in_flight.take() {
            if !handle.is_finished() {
                debug!("Aborting invocation {}", token);
                handle.abort();
            }
        }
    }

    /// Write a task result into the context if `token` is still outstanding
    pub fn apply_task_output(
        &mut self,
        token: InvocationToken,
        output_path: Option<&ContextPath>,
        output: Value,
    ) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(FenceError::Terminal {
                execution_id: self.id,
                status: self.status,
            }
            .into());
        }
        if self.outstanding != Some(token) {
            return Err(FenceError::Stale { token }.into());
        }

        self.outstanding = None;
        self.in_flight = None;
        if let Some(path) = output_path {
            self.context.set(path, output)?;
        }
        Ok(())
    }

    /// Set the terminal outcome and archive the execution.
    ///
    /// A terminal status never changes: once finished, later outcomes are
    /// ignored and the original one is archived again.
    pub fn finish(&mut self, outcome: ExecutionOutcome) -> ExecutionReport {
        let outcome = match &self.outcome {
            Some(existing) => {
                warn!(
                    "Execution {} is already {}; ignoring {}",
                    self.id,
                    self.status,
                    outcome.status()
                );
                existing.clone()
            }
            None => {
                self.status = outcome.status();
                self.outcome = Some(outcome.clone());
                self.finished_at = Some(Utc::now());
                self.outstanding = None;
                self.stop_in_flight();
                outcome
            }
        };
        self.archive(outcome)
    }

    /// Archive of a terminal execution; `None` while it is still running
    pub fn report(&self) -> Option<ExecutionReport> {
        self.outcome.clone().map(|outcome| self.archive(outcome))
    }

    fn archive(&self, outcome: ExecutionOutcome) -> ExecutionReport {
        ExecutionReport {
            id: self.id,
            workflow: self.definition.name().to_string(),
            status: self.status,
            outcome,
            final_state: self.current_state.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at.unwrap_or_else(Utc::now),
            visited_count: self.visited_count,
            context: self.context.document().clone(),
        }
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.stop_in_flight();
    }
}
