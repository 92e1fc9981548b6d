//! State definitions
//!
//! A workflow is a graph of named states. Each state is one of:
//! - `task` - invoke an external unit of work and store its result
//! - `wait` - suspend the execution for a fixed duration
//! - `choice` - branch on ordered conditions over the context
//! - `succeed` / `fail` - end the execution

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::context::ExecutionContext;
use super::duration::duration_serde;
use super::path::ContextPath;

/// A single state in the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum State {
    Task(TaskState),
    Wait(WaitState),
    Choice(ChoiceState),
    Succeed,
    Fail(FailState),
}

impl State {
    pub fn task(
        task: impl Into<String>,
        input_path: ContextPath,
        output_path: Option<ContextPath>,
        next: impl Into<String>,
    ) -> Self {
        State::Task(TaskState {
            task: task.into(),
            input_path,
            output_path,
            next: next.into(),
        })
    }

    pub fn wait(duration: Option<Duration>, next: impl Into<String>) -> Self {
        State::Wait(WaitState {
            duration,
            next: next.into(),
        })
    }

    pub fn choice(rules: Vec<ChoiceRule>, default: Option<String>) -> Self {
        State::Choice(ChoiceState { rules, default })
    }

    pub fn fail(cause: impl Into<String>, error: impl Into<String>) -> Self {
        State::Fail(FailState {
            cause: cause.into(),
            error: error.into(),
        })
    }

    /// Short lowercase name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            State::Task(_) => "task",
            State::Wait(_) => "wait",
            State::Choice(_) => "choice",
            State::Succeed => "succeed",
            State::Fail(_) => "fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Succeed | State::Fail(_))
    }

    /// Names of every state this one can transition to, in declaration order
    pub fn targets(&self) -> Vec<&str> {
        match self {
            State::Task(task) => vec![task.next.as_str()],
            State::Wait(wait) => vec![wait.next.as_str()],
            State::Choice(choice) => choice
                .rules
                .iter()
                .map(|rule| rule.next.as_str())
                .chain(choice.default.as_deref())
                .collect(),
            State::Succeed | State::Fail(_) => vec![],
        }
    }
}

/// Invoke a task with the value at `input_path`, write the result at `output_path`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task: String,

    #[serde(default = "ContextPath::root")]
    pub input_path: ContextPath,

    /// Where the task result is written; the result is discarded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<ContextPath>,

    pub next: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitState {
    /// Falls back to the engine's configured poll wait when absent
    #[serde(
        default,
        with = "duration_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,

    pub next: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceState {
    /// Evaluated top-down; the first match wins
    pub rules: Vec<ChoiceRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ChoiceState {
    /// Pick the target state for the given context.
    ///
    /// Returns `None` only when no rule matches and there is no default.
    pub fn select(&self, ctx: &ExecutionContext) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.condition.evaluate(ctx))
            .map(|rule| rule.next.as_str())
            .or(self.default.as_deref())
    }

    /// Whether some pair of rules covers every possible context
    pub fn is_total(&self) -> bool {
        self.rules.iter().enumerate().any(|(i, a)| {
            self.rules[i + 1..]
                .iter()
                .any(|b| a.condition.complements(&b.condition))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
    #[serde(flatten)]
    pub condition: Condition,
    pub next: String,
}

impl ChoiceRule {
    pub fn new(condition: Condition, next: impl Into<String>) -> Self {
        Self {
            condition,
            next: next.into(),
        }
    }
}

/// A side-effect free test of one context value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable: ContextPath,
    #[serde(flatten)]
    pub comparison: Comparison,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Value exists and equals the literal
    Equals(Value),
    /// Value is absent or differs from the literal
    NotEquals(Value),
    /// Value presence matches
    IsPresent(bool),
}

impl Condition {
    pub fn equals(variable: ContextPath, value: impl Into<Value>) -> Self {
        Self {
            variable,
            comparison: Comparison::Equals(value.into()),
        }
    }

    pub fn not_equals(variable: ContextPath, value: impl Into<Value>) -> Self {
        Self {
            variable,
            comparison: Comparison::NotEquals(value.into()),
        }
    }

    pub fn is_present(variable: ContextPath, present: bool) -> Self {
        Self {
            variable,
            comparison: Comparison::IsPresent(present),
        }
    }

    /// Evaluate against the context. Absent variables never raise.
    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        let actual = ctx.get(&self.variable).ok();
        match &self.comparison {
            Comparison::Equals(expected) => actual == Some(expected),
            Comparison::NotEquals(expected) => actual != Some(expected),
            Comparison::IsPresent(present) => actual.is_some() == *present,
        }
    }

    /// True when exactly one of `self` and `other` holds for any context
    pub fn complements(&self, other: &Condition) -> bool {
        if self.variable != other.variable {
            return false;
        }
        match (&self.comparison, &other.comparison) {
            (Comparison::Equals(a), Comparison::NotEquals(b))
            | (Comparison::NotEquals(a), Comparison::Equals(b)) => a == b,
            (Comparison::IsPresent(a), Comparison::IsPresent(b)) => a != b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailState {
    pub cause: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> ContextPath {
        ContextPath::parse(s).unwrap()
    }

    fn status_ctx(status: &str) -> ExecutionContext {
        ExecutionContext::from_value(json!({ "body": { "job_status": status } }))
    }

    #[test]
    fn test_state_deserialize() {
        let yaml = r#"
type: task
task: check_job_status
input_path: $.body
output_path: $.body
next: Job Finished?
"#;
        let state: State = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            state,
            State::task(
                "check_job_status",
                path("$.body"),
                Some(path("$.body")),
                "Job Finished?"
            )
        );
    }

    #[test]
    fn test_task_defaults() {
        let state: State = serde_yaml::from_str("type: task\ntask: blur\nnext: Done").unwrap();
        match state {
            State::Task(task) => {
                assert!(task.input_path.is_root());
                assert!(task.output_path.is_none());
            }
            other => panic!("expected task, got {:?}", other),
        }
    }

    #[test]
    fn test_choice_deserialize() {
        let yaml = r#"
type: choice
rules:
  - variable: $.body.job_status
    equals: IN_PROGRESS
    next: Poll Wait
  - variable: $.body.attempts
    not_equals: 3
    next: Retry
  - variable: $.body.error
    is_present: true
    next: Broken
default: Execution Failed
"#;
        let state: State = serde_yaml::from_str(yaml).unwrap();
        let State::Choice(choice) = state else {
            panic!("expected choice");
        };
        assert_eq!(choice.rules.len(), 3);
        assert_eq!(
            choice.rules[0].condition,
            Condition::equals(path("$.body.job_status"), "IN_PROGRESS")
        );
        assert_eq!(
            choice.rules[1].condition,
            Condition::not_equals(path("$.body.attempts"), 3)
        );
        assert_eq!(
            choice.rules[2].condition,
            Condition::is_present(path("$.body.error"), true)
        );
        assert_eq!(choice.default.as_deref(), Some("Execution Failed"));
    }

    #[test]
    fn test_wait_and_terminals_deserialize() {
        let wait: State = serde_yaml::from_str("type: wait\nduration: 1s\nnext: Check").unwrap();
        assert_eq!(wait, State::wait(Some(Duration::from_secs(1)), "Check"));

        let succeed: State = serde_yaml::from_str("type: succeed").unwrap();
        assert_eq!(succeed, State::Succeed);

        let fail: State =
            serde_yaml::from_str("type: fail\ncause: Face Detection Failed\nerror: Mismatch").unwrap();
        assert_eq!(fail, State::fail("Face Detection Failed", "Mismatch"));
    }

    #[test]
    fn test_choice_first_match_wins() {
        let choice = ChoiceState {
            rules: vec![
                ChoiceRule::new(Condition::equals(path("$.body.job_status"), "SUCCEEDED"), "First"),
                ChoiceRule::new(Condition::is_present(path("$.body.job_status"), true), "Second"),
            ],
            default: Some("Default".to_string()),
        };

        assert_eq!(choice.select(&status_ctx("SUCCEEDED")), Some("First"));
        assert_eq!(choice.select(&status_ctx("IN_PROGRESS")), Some("Second"));
        assert_eq!(choice.select(&ExecutionContext::new()), Some("Default"));
    }

    #[test]
    fn test_condition_on_missing_variable() {
        let ctx = ExecutionContext::new();
        let var = path("$.body.job_status");

        assert!(!Condition::equals(var.clone(), "SUCCEEDED").evaluate(&ctx));
        assert!(Condition::not_equals(var.clone(), "SUCCEEDED").evaluate(&ctx));
        assert!(Condition::is_present(var.clone(), false).evaluate(&ctx));
        assert!(!Condition::is_present(var, true).evaluate(&ctx));
    }

    #[test]
    fn test_condition_compares_json_types() {
        let ctx = ExecutionContext::from_value(json!({ "count": 3 }));
        assert!(Condition::equals(path("$.count"), 3).evaluate(&ctx));
        assert!(!Condition::equals(path("$.count"), "3").evaluate(&ctx));
    }

    #[test]
    fn test_choice_totality() {
        let var = path("$.body.job_status");
        let total = ChoiceState {
            rules: vec![
                ChoiceRule::new(Condition::equals(var.clone(), "SUCCEEDED"), "A"),
                ChoiceRule::new(Condition::not_equals(var.clone(), "SUCCEEDED"), "B"),
            ],
            default: None,
        };
        assert!(total.is_total());

        let presence = ChoiceState {
            rules: vec![
                ChoiceRule::new(Condition::is_present(var.clone(), false), "A"),
                ChoiceRule::new(Condition::is_present(var.clone(), true), "B"),
            ],
            default: None,
        };
        assert!(presence.is_total());

        let partial = ChoiceState {
            rules: vec![
                ChoiceRule::new(Condition::equals(var.clone(), "SUCCEEDED"), "A"),
                ChoiceRule::new(Condition::not_equals(var, "FAILED"), "B"),
            ],
            default: None,
        };
        assert!(!partial.is_total());
    }

    #[test]
    fn test_targets_in_order() {
        let var = path("$.s");
        let choice = State::choice(
            vec![
                ChoiceRule::new(Condition::equals(var.clone(), "a"), "A"),
                ChoiceRule::new(Condition::equals(var, "b"), "B"),
            ],
            Some("C".to_string()),
        );
        assert_eq!(choice.targets(), vec!["A", "B", "C"]);
        assert!(State::Succeed.targets().is_empty());
    }
}
