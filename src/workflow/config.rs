//! Engine and runner configuration
//!
//! Loaded from `runner.yaml`. Engine settings sit at the top level next to
//! the runner's own keys:
//!
//! ```yaml
//! parallel: 4
//! timeout: 15m
//! poll_wait: 1s
//! task_timeout: 600s
//! max_retries: 3
//! initial_backoff: 1s
//!
//! tasks:
//!   blur_faces:
//!     timeout: 20m
//!
//! invoker:
//!   type: process
//!   program: blurflow-sim-worker
//!
//! trigger:
//!   suffixes: [".mp4"]
//!   start_task: start_face_detection
//!
//! definition: workflows/face-blur.yaml
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration::duration_serde;
use super::loader::LoadError;
use crate::invoker::InvokerConfig;

/// Backoff between attempts of a task that failed transiently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    #[serde(
        default = "default_initial_backoff",
        with = "duration_serde",
        alias = "initialBackoff"
    )]
    pub initial_backoff: Duration,

    #[serde(
        default = "default_max_backoff",
        with = "duration_serde",
        alias = "maxBackoff"
    )]
    pub max_backoff: Duration,

    #[serde(default = "default_backoff_multiplier", alias = "backoffMultiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), capped at `max_backoff`
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff)
    }
}

/// Per-task overrides of the engine defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPolicy {
    #[serde(
        default,
        with = "duration_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    #[serde(
        default,
        alias = "maxRetries",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_retries: Option<u32>,
}

/// Settings for one engine, shared by every execution it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total runtime budget of one execution
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Wait used by wait states that don't set their own duration
    #[serde(default = "default_poll_wait", with = "duration_serde", alias = "pollWait")]
    pub poll_wait: Duration,

    /// Budget for one task attempt
    #[serde(
        default = "default_task_timeout",
        with = "duration_serde",
        alias = "taskTimeout"
    )]
    pub task_timeout: Duration,

    #[serde(flatten)]
    pub retry: RetryPolicy,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tasks: BTreeMap<String, TaskPolicy>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_poll_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(600)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            poll_wait: default_poll_wait(),
            task_timeout: default_task_timeout(),
            retry: RetryPolicy::default(),
            tasks: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn task_timeout_for(&self, task: &str) -> Duration {
        self.tasks
            .get(task)
            .and_then(|policy| policy.timeout)
            .unwrap_or(self.task_timeout)
    }

    pub fn max_retries_for(&self, task: &str) -> u32 {
        self.tasks
            .get(task)
            .and_then(|policy| policy.max_retries)
            .unwrap_or(self.retry.max_retries)
    }
}

/// Which artifacts start an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_suffixes")]
    pub suffixes: Vec<String>,

    /// Task invoked with the artifact before the execution starts
    #[serde(
        default,
        alias = "startTask",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_task: Option<String>,
}

fn default_suffixes() -> Vec<String> {
    vec![".mp4".to_string()]
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            suffixes: default_suffixes(),
            start_task: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    #[serde(flatten)]
    pub engine: EngineConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<InvokerConfig>,

    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Definition file; the built-in face-blur pipeline when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<PathBuf>,
}

fn default_parallel() -> usize {
    4
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            engine: EngineConfig::default(),
            invoker: None,
            trigger: TriggerConfig::default(),
            definition: None,
        }
    }
}

impl RunnerConfig {
    /// Load from a YAML file. A relative `definition` path is resolved
    /// against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: RunnerConfig =
            serde_yaml::from_str(&content).map_err(|e| LoadError::Yaml {
                file: path.display().to_string(),
                error: e,
            })?;

        if let (Some(definition), Some(dir)) = (&config.definition, path.parent()) {
            if definition.is_relative() {
                config.definition = Some(dir.join(definition));
            }
        }

        Ok(config)
    }
}
