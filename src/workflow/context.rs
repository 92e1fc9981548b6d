//! Execution context for workflow runtime
//!
//! One nested JSON document per execution. Tasks read their input from it by
//! path and write their output back into it; choice rules read from it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::path::{ContextPath, Segment, MAX_INDEX};

/// Errors raised by context reads and writes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("Path not found in context: {path}")]
    PathNotFound { path: String },

    #[error("Array index {index} in '{path}' exceeds the limit of {max}", max = MAX_INDEX)]
    IndexOutOfRange { path: String, index: usize },
}

/// Runtime document threaded through one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    document: Value,
}

impl ExecutionContext {
    /// Create an empty context (an empty object)
    pub fn new() -> Self {
        Self {
            document: Value::Object(Map::new()),
        }
    }

    /// Create a context seeded with an initial document
    pub fn from_value(document: Value) -> Self {
        Self { document }
    }

    /// Read the value at `path`
    pub fn get(&self, path: &ContextPath) -> Result<&Value, ContextError> {
        let mut current = &self.document;
        for segment in path.segments() {
            let next = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(index), Value::Array(items)) => items.get(*index),
                _ => None,
            };
            current = next.ok_or_else(|| ContextError::PathNotFound {
                path: path.to_string(),
            })?;
        }
        Ok(current)
    }

    /// Check whether `path` resolves to a value
    pub fn contains(&self, path: &ContextPath) -> bool {
        self.get(path).is_ok()
    }

    /// Write `value` at `path`, creating intermediate containers.
    ///
    /// A scalar sitting where a container is needed gets replaced. Nothing
    /// is written when an index exceeds `MAX_INDEX`.
    pub fn set(&mut self, path: &ContextPath, value: Value) -> Result<(), ContextError> {
        if let Some(index) = path.segments().iter().find_map(|segment| match segment {
            Segment::Index(index) if *index > MAX_INDEX => Some(*index),
            _ => None,
        }) {
            return Err(ContextError::IndexOutOfRange {
                path: path.to_string(),
                index,
            });
        }

        let mut current = &mut self.document;
        for segment in path.segments() {
            current = match segment {
                Segment::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(Map::new());
                    }
                    match current {
                        Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                        _ => unreachable!("container was just created"),
                    }
                }
                Segment::Index(index) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    match current {
                        Value::Array(items) => {
                            if items.len() <= *index {
                                items.resize(*index + 1, Value::Null);
                            }
                            &mut items[*index]
                        }
                        _ => unreachable!("container was just created"),
                    }
                }
            };
        }
        *current = value;
        Ok(())
    }

    /// The whole document
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_value(self) -> Value {
        self.document
    }
}

impl From<Value> for ExecutionContext {
    fn from(document: Value) -> Self {
        Self::from_value(document)
    }
}
