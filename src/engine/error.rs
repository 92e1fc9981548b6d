//! Engine error types

use super::execution::FenceError;
use crate::workflow::ContextError;

/// Error codes carried by FAILED outcomes the engine produces itself
pub mod error_codes {
    pub const TASK_FAILED: &str = "Task.Failed";
    pub const TASK_TIMEOUT: &str = "Task.Timeout";
    pub const PATH_NOT_FOUND: &str = "Context.PathNotFound";
    pub const INDEX_OUT_OF_RANGE: &str = "Context.IndexOutOfRange";
    pub const NO_MATCHING_BRANCH: &str = "Engine.NoMatchingBranch";
    pub const UNKNOWN_STATE: &str = "Engine.UnknownState";
    pub const FENCED: &str = "Engine.Fenced";
}

/// Conditions that validation should have ruled out, and task output
/// that cannot be stored
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("No rule matched in choice state '{state}' and it has no default")]
    NoMatchingBranch { state: String },

    #[error("State '{0}' is not defined")]
    UnknownState(String),

    #[error("Fencing violation: {0}")]
    Fenced(#[from] FenceError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NoMatchingBranch { .. } => error_codes::NO_MATCHING_BRANCH,
            EngineError::UnknownState(_) => error_codes::UNKNOWN_STATE,
            EngineError::Fenced(_) => error_codes::FENCED,
            EngineError::Context(ContextError::PathNotFound { .. }) => error_codes::PATH_NOT_FOUND,
            EngineError::Context(ContextError::IndexOutOfRange { .. }) => {
                error_codes::INDEX_OUT_OF_RANGE
            }
        }
    }
}
