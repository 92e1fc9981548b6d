//! Execution result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use super::execution::ExecutionStatus;
use crate::workflow::duration::duration_serde;

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    /// The final context
    Succeeded { output: Value },
    Failed { error: String, cause: String },
    TimedOut {
        #[serde(with = "duration_serde")]
        elapsed: Duration,
    },
}

impl ExecutionOutcome {
    pub fn failed(error: impl Into<String>, cause: impl Into<String>) -> Self {
        ExecutionOutcome::Failed {
            error: error.into(),
            cause: cause.into(),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Succeeded { .. } => ExecutionStatus::Succeeded,
            ExecutionOutcome::Failed { .. } => ExecutionStatus::Failed,
            ExecutionOutcome::TimedOut { .. } => ExecutionStatus::TimedOut,
        }
    }
}

/// Archived record of a terminal execution, handed to the reporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub id: Uuid,
    pub workflow: String,
    pub status: ExecutionStatus,
    pub outcome: ExecutionOutcome,
    /// State the execution was in when it ended
    pub final_state: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub visited_count: u64,
    /// Context snapshot at the moment the execution ended
    pub context: Value,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// `(error, cause)` of a failed execution
    pub fn failure(&self) -> Option<(&str, &str)> {
        match &self.outcome {
            ExecutionOutcome::Failed { error, cause } => Some((error, cause)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_serialization() {
        let outcome = ExecutionOutcome::failed("Task.Failed", "boom");
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "status": "FAILED", "error": "Task.Failed", "cause": "boom" })
        );

        let timed_out = ExecutionOutcome::TimedOut {
            elapsed: Duration::from_secs(900),
        };
        assert_eq!(
            serde_json::to_value(&timed_out).unwrap(),
            json!({ "status": "TIMED_OUT", "elapsed": "15m" })
        );
        assert_eq!(timed_out.status(), ExecutionStatus::TimedOut);
    }
}
