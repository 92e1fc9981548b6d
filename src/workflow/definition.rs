//! Workflow definitions
//!
//! A `WorkflowDefinition` is the validated, immutable state graph an engine
//! interprets. Validation happens once at construction and reports every
//! problem it finds, not only the first.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::state::State;

/// One problem found while validating a definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("start state '{start_at}' does not exist")]
    MissingStart { start_at: String },

    #[error("state '{state}' transitions to unknown state '{target}'")]
    DanglingTransition { state: String, target: String },

    #[error("choice '{state}' has no rules")]
    EmptyChoice { state: String },

    #[error("choice '{state}' has no default and its rules are not provably total")]
    MissingDefault { state: String },

    #[error("no succeed or fail state is reachable from '{start_at}'")]
    NoReachableTerminal { start_at: String },
}

/// Construction failed; carries every violation in state-name order
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Workflow '{workflow}' is invalid {}", render_violations(.violations))]
pub struct DefinitionValidationError {
    pub workflow: String,
    pub violations: Vec<Violation>,
}

fn render_violations(violations: &[Violation]) -> String {
    let mut out = format!(
        "({} violation{})",
        violations.len(),
        if violations.len() == 1 { "" } else { "s" }
    );
    for violation in violations {
        out.push_str(&format!("\n  - {}", violation));
    }
    out
}

/// Unvalidated form of a definition, as written in YAML or JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDocument {
    pub name: String,
    #[serde(alias = "startAt")]
    pub start_at: String,
    pub states: BTreeMap<String, State>,
}

/// A validated state graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DefinitionDocument")]
pub struct WorkflowDefinition {
    name: String,
    start_at: String,
    states: BTreeMap<String, State>,
}

impl WorkflowDefinition {
    pub fn new(
        name: impl Into<String>,
        start_at: impl Into<String>,
        states: BTreeMap<String, State>,
    ) -> Result<Self, DefinitionValidationError> {
        let definition = Self {
            name: name.into(),
            start_at: start_at.into(),
            states,
        };

        let violations = definition.violations();
        if violations.is_empty() {
            Ok(definition)
        } else {
            Err(DefinitionValidationError {
                workflow: definition.name,
                violations,
            })
        }
    }

    pub fn builder(name: impl Into<String>, start_at: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder {
            name: name.into(),
            start_at: start_at.into(),
            states: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_at(&self) -> &str {
        &self.start_at
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    pub fn states(&self) -> &BTreeMap<String, State> {
        &self.states
    }

    fn violations(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        let has_start = self.states.contains_key(&self.start_at);
        if !has_start {
            violations.push(Violation::MissingStart {
                start_at: self.start_at.clone(),
            });
        }

        for (name, state) in &self.states {
            if let State::Choice(choice) = state {
                if choice.rules.is_empty() {
                    violations.push(Violation::EmptyChoice {
                        state: name.clone(),
                    });
                }
                if choice.default.is_none() && !choice.is_total() {
                    violations.push(Violation::MissingDefault {
                        state: name.clone(),
                    });
                }
            }

            for target in state.targets() {
                if !self.states.contains_key(target) {
                    violations.push(Violation::DanglingTransition {
                        state: name.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        if has_start && !self.terminal_reachable() {
            violations.push(Violation::NoReachableTerminal {
                start_at: self.start_at.clone(),
            });
        }

        violations
    }

    /// Breadth-first walk from the start state, ignoring dangling targets
    fn terminal_reachable(&self) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.start_at.as_str()]);

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            let Some(state) = self.states.get(name) else {
                continue;
            };
            if state.is_terminal() {
                return true;
            }
            queue.extend(state.targets());
        }

        false
    }
}

impl TryFrom<DefinitionDocument> for WorkflowDefinition {
    type Error = DefinitionValidationError;

    fn try_from(doc: DefinitionDocument) -> Result<Self, Self::Error> {
        Self::new(doc.name, doc.start_at, doc.states)
    }
}

impl From<WorkflowDefinition> for DefinitionDocument {
    fn from(definition: WorkflowDefinition) -> Self {
        Self {
            name: definition.name,
            start_at: definition.start_at,
            states: definition.states,
        }
    }
}

/// Incrementally assemble a definition, validating on `build`
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    name: String,
    start_at: String,
    states: BTreeMap<String, State>,
}

impl DefinitionBuilder {
    pub fn state(mut self, name: impl Into<String>, state: State) -> Self {
        self.states.insert(name.into(), state);
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, DefinitionValidationError> {
        WorkflowDefinition::new(self.name, self.start_at, self.states)
    }
}
