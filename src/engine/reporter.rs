//! Terminal reporters
//!
//! The engine hands every finished execution to exactly one
//! `TerminalReporter::report` call.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::result::{ExecutionOutcome, ExecutionReport};

#[async_trait]
pub trait TerminalReporter: Send + Sync {
    async fn report(&self, report: &ExecutionReport);
}

/// Logs the outcome through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl TerminalReporter for LogReporter {
    async fn report(&self, report: &ExecutionReport) {
        match &report.outcome {
            ExecutionOutcome::Succeeded { .. } => info!(
                execution_id = %report.id,
                workflow = %report.workflow,
                visited = report.visited_count,
                "Execution succeeded"
            ),
            ExecutionOutcome::Failed { error, cause } => warn!(
                execution_id = %report.id,
                workflow = %report.workflow,
                state = %report.final_state,
                "Execution failed: {} ({})",
                cause,
                error
            ),
            ExecutionOutcome::TimedOut { elapsed } => warn!(
                execution_id = %report.id,
                workflow = %report.workflow,
                state = %report.final_state,
                "Execution timed out after {:?}",
                elapsed
            ),
        }
    }
}

/// Forwards reports to a channel
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ExecutionReport>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecutionReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TerminalReporter for ChannelReporter {
    async fn report(&self, report: &ExecutionReport) {
        if self.tx.send(report.clone()).is_err() {
            warn!(execution_id = %report.id, "Report receiver dropped");
        }
    }
}
