//! Workflow execution engine module
//!
//! This module contains:
//! - `executor` - The interpreter loop driving one execution
//! - `execution` - Execution state, status and fencing tokens
//! - `error` - Engine error types and error codes
//! - `result` - Terminal outcomes and execution reports
//! - `timer` - Virtual-time friendly sleeping
//! - `reporter` - Terminal reporters
//! - `runner` - Trigger-driven runner with bounded parallelism

pub mod error;
pub mod execution;
pub mod executor;
pub mod reporter;
pub mod result;
pub mod runner;
pub mod timer;

pub use error::{error_codes, EngineError};
pub use execution::{Execution, ExecutionStatus, FenceError, InvocationToken};
pub use executor::ExecutionEngine;
pub use reporter::{ChannelReporter, LogReporter, TerminalReporter};
pub use result::{ExecutionOutcome, ExecutionReport};
pub use runner::{ExecutionRunner, RunSummary, RunnerError};
pub use timer::{instant_after, Timer, TokioTimer, FAR_FUTURE};
