//! Workflow types and definitions
//!
//! This module contains all types for defining and loading workflows:
//! - `path` - ContextPath parsing and rendering
//! - `context` - ExecutionContext, the document threaded through a run
//! - `duration` - Human-readable durations (`15m`, `250ms`)
//! - `state` - Task, Wait, Choice, Succeed and Fail states
//! - `definition` - WorkflowDefinition and its validation
//! - `loader` - Load definitions from files and directories
//! - `config` - Engine and runner configuration
//! - `pipeline` - The built-in face-blur pipeline

pub mod config;
pub mod context;
pub mod definition;
pub mod duration;
pub mod loader;
pub mod path;
pub mod pipeline;
pub mod state;

// Re-export all public types for convenience
pub use config::{EngineConfig, RetryPolicy, RunnerConfig, TaskPolicy, TriggerConfig};
pub use context::{ContextError, ExecutionContext};
pub use definition::{
    DefinitionBuilder, DefinitionDocument, DefinitionValidationError, Violation,
    WorkflowDefinition,
};
pub use loader::{DefinitionLoader, LoadError};
pub use path::{ContextPath, PathError, Segment, MAX_INDEX};
pub use pipeline::face_blur_pipeline;
pub use state::{
    ChoiceRule, ChoiceState, Comparison, Condition, FailState, State, TaskState, WaitState,
};
