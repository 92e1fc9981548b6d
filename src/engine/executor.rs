//! Execution engine - interprets a workflow definition
//!
//! One call to `run` drives one execution to a terminal outcome:
//! 1. Checks the deadline before every step
//! 2. Invokes tasks on spawned tokio tasks and waits on a fenced inbox;
//!    invocations that are given up on are aborted
//! 3. Retries transient task failures with exponential backoff
//! 4. Sleeps wait states on the timer
//! 5. Follows choice rules in declared order
//! 6. Reports the final outcome exactly once

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::error::{error_codes, EngineError};
use super::execution::{Execution, InvocationToken};
use super::reporter::{LogReporter, TerminalReporter};
use super::result::{ExecutionOutcome, ExecutionReport};
use super::timer::{instant_after, Timer, TokioTimer};
use crate::invoker::{TaskInvocationError, TaskInvoker};
use crate::workflow::duration::format_duration;
use crate::workflow::{EngineConfig, State, TaskState, WorkflowDefinition};

/// A task result travelling back from its spawned invocation
#[derive(Debug)]
struct Delivery {
    token: InvocationToken,
    result: Result<Value, TaskInvocationError>,
}

/// What a task state resolved to
enum TaskStep {
    Next,
    DeadlineReached,
    Failed(ExecutionOutcome),
}

/// How one attempt ended
enum Attempt {
    Delivered(Result<Value, TaskInvocationError>),
    BudgetExceeded,
    DeadlineReached,
}

/// Runs executions of one definition. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct ExecutionEngine {
    definition: Arc<WorkflowDefinition>,
    invoker: Arc<dyn TaskInvoker>,
    timer: Arc<dyn Timer>,
    reporter: Arc<dyn TerminalReporter>,
    config: Arc<EngineConfig>,
}

impl ExecutionEngine {
    pub fn new(definition: Arc<WorkflowDefinition>, invoker: Arc<dyn TaskInvoker>) -> Self {
        Self {
            definition,
            invoker,
            timer: Arc::new(TokioTimer),
            reporter: Arc::new(LogReporter),
            config: Arc::new(EngineConfig::default()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TerminalReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn invoker(&self) -> &Arc<dyn TaskInvoker> {
        &self.invoker
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timer(&self) -> &Arc<dyn Timer> {
        &self.timer
    }

    /// Run one execution with `input` as its initial context
    pub async fn run(&self, input: Value) -> ExecutionReport {
        let execution = Execution::new(
            self.definition.clone(),
            input,
            self.timer.now(),
            self.config.timeout,
        );
        self.execute(execution).await
    }

    #[instrument(
        name = "execution",
        skip_all,
        fields(workflow = %self.definition.name(), execution_id = %execution.id())
    )]
    async fn execute(&self, mut execution: Execution) -> ExecutionReport {
        info!(
            "Starting at '{}' (timeout {})",
            execution.current_state(),
            format_duration(self.config.timeout)
        );

        let outcome = self.drive(&mut execution).await;
        let report = execution.finish(outcome);

        info!(
            "Finished with {} in state '{}' after {} step(s)",
            report.status, report.final_state, report.visited_count
        );
        self.reporter.report(&report).await;
        report
    }

    /// The interpreter loop. Iterative so that poll cycles use constant stack.
    async fn drive(&self, execution: &mut Execution) -> ExecutionOutcome {
        let (outbox, mut inbox) = mpsc::unbounded_channel::<Delivery>();

        loop {
            let now = self.timer.now();
            if execution.is_expired(now) {
                let elapsed = now - execution.started();
                info!(
                    "Deadline reached in state '{}' after {}",
                    execution.current_state(),
                    format_duration(elapsed)
                );
                return ExecutionOutcome::TimedOut { elapsed };
            }

            let name = execution.current_state().to_string();
            let Some(state) = self.definition.state(&name) else {
                let err = EngineError::UnknownState(name);
                error!("{}", err);
                return ExecutionOutcome::failed(err.code(), err.to_string());
            };

            execution.record_visit();
            debug!(state = %name, kind = state.kind(), "Entering state");

            match state {
                State::Task(task) => {
                    match self.run_task(execution, task, &outbox, &mut inbox).await {
                        TaskStep::Next => execution.transition(&task.next),
                        TaskStep::DeadlineReached => continue,
                        TaskStep::Failed(outcome) => return outcome,
                    }
                }

                State::Wait(wait) => {
                    let duration = wait.duration.unwrap_or(self.config.poll_wait);
                    let wake = instant_after(now, duration).min(execution.deadline());
                    debug!("Waiting {} in '{}'", format_duration(duration), name);
                    self.timer.sleep_until(wake).await;
                    execution.transition(&wait.next);
                }

                State::Choice(choice) => match choice.select(execution.context()) {
                    Some(next) => {
                        info!("Choice '{}' -> '{}'", name, next);
                        execution.transition(next);
                    }
                    None => {
                        let err = EngineError::NoMatchingBranch { state: name };
                        error!("{}", err);
                        return ExecutionOutcome::failed(err.code(), err.to_string());
                    }
                },

                State::Succeed => {
                    return ExecutionOutcome::Succeeded {
                        output: execution.context().document().clone(),
                    };
                }

                State::Fail(fail) => {
                    return ExecutionOutcome::failed(fail.error.clone(), fail.cause.clone());
                }
            }
        }
    }

    #[instrument(skip_all, fields(task = %task.task))]
    async fn run_task(
        &self,
        execution: &mut Execution,
        task: &TaskState,
        outbox: &mpsc::UnboundedSender<Delivery>,
        inbox: &mut mpsc::UnboundedReceiver<Delivery>,
    ) -> TaskStep {
        let input = match execution.context().get(&task.input_path) {
            Ok(value) => value.clone(),
            Err(e) => {
                warn!("Cannot resolve input: {}", e);
                return TaskStep::Failed(ExecutionOutcome::failed(
                    error_codes::PATH_NOT_FOUND,
                    e.to_string(),
                ));
            }
        };

        let max_retries = self.config.max_retries_for(&task.task);
        let budget = self.config.task_timeout_for(&task.task);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let token = execution.issue_token();
            let attempt_deadline =
                instant_after(self.timer.now(), budget).min(execution.deadline());

            let handle = self.spawn_invocation(token, &task.task, input.clone(), outbox.clone());
            execution.attach(token, handle);

            let (error_code, message) = match self
                .await_delivery(token, attempt_deadline, execution.deadline(), inbox)
                .await
            {
                Attempt::Delivered(Ok(output)) => {
                    return match execution.apply_task_output(token, task.output_path.as_ref(), output)
                    {
                        Ok(()) => TaskStep::Next,
                        Err(err) => {
                            error!("{}", err);
                            TaskStep::Failed(ExecutionOutcome::failed(err.code(), err.to_string()))
                        }
                    };
                }
                Attempt::Delivered(Err(e)) => {
                    execution.abandon(token);
                    if !e.transient {
                        warn!("Task failed permanently: {}", e);
                        return TaskStep::Failed(ExecutionOutcome::failed(
                            error_codes::TASK_FAILED,
                            e.message,
                        ));
                    }
                    (error_codes::TASK_FAILED, e.message)
                }
                Attempt::BudgetExceeded => {
                    execution.abandon(token);
                    (
                        error_codes::TASK_TIMEOUT,
                        format!(
                            "Task '{}' exceeded its {} budget",
                            task.task,
                            format_duration(budget)
                        ),
                    )
                }
                Attempt::DeadlineReached => {
                    execution.abandon(token);
                    return TaskStep::DeadlineReached;
                }
            };

            if attempt > max_retries {
                warn!("Giving up after {} attempt(s): {}", attempt, message);
                return TaskStep::Failed(ExecutionOutcome::failed(error_code, message));
            }

            let delay = self.config.retry.backoff(attempt);
            warn!(
                "Retrying (attempt {}/{}) after {}: {}",
                attempt + 1,
                max_retries + 1,
                format_duration(delay),
                message
            );

            let wake = instant_after(self.timer.now(), delay).min(execution.deadline());
            self.timer.sleep_until(wake).await;
            if execution.is_expired(self.timer.now()) {
                return TaskStep::DeadlineReached;
            }
        }
    }

    fn spawn_invocation(
        &self,
        token: InvocationToken,
        task: &str,
        input: Value,
        outbox: mpsc::UnboundedSender<Delivery>,
    ) -> AbortHandle {
        let invoker = self.invoker.clone();
        let task = task.to_string();
        tokio::spawn(async move {
            let result = invoker.invoke(&task, input).await;
            // The receiving execution may be gone; its results are fenced off
            let _ = outbox.send(Delivery { token, result });
        })
        .abort_handle()
    }

    /// Wait for the delivery carrying `token`, discarding stale ones
    async fn await_delivery(
        &self,
        token: InvocationToken,
        attempt_deadline: Instant,
        deadline: Instant,
        inbox: &mut mpsc::UnboundedReceiver<Delivery>,
    ) -> Attempt {
        loop {
            tokio::select! {
                Some(delivery) = inbox.recv() => {
                    if delivery.token == token {
                        return Attempt::Delivered(delivery.result);
                    }
                    debug!("Discarding late result of invocation {}", delivery.token);
                }
                _ = self.timer.sleep_until(attempt_deadline) => {
                    return if attempt_deadline >= deadline {
                        Attempt::DeadlineReached
                    } else {
                        Attempt::BudgetExceeded
                    };
                }
            }
        }
    }
}
