#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blurflow::invoker::TaskRegistry;
use blurflow::workflow::pipeline::tasks;
use blurflow::workflow::{face_blur_pipeline, ContextPath, EngineConfig};
use blurflow::ExecutionEngine;
use serde_json::{json, Value};
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_file(dir: &Path, filename: &str, content: &str) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, content).expect("Failed to write test file");
    path
}

pub fn write_runner_config(dir: &Path, content: &str) -> PathBuf {
    write_file(dir, "runner.yaml", content)
}

pub fn path(s: &str) -> ContextPath {
    ContextPath::parse(s).expect("Invalid test path")
}

/// Task names in the order they were invoked
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, task: &str) {
        self.0.lock().unwrap().push(task.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, task: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|t| *t == task).count()
    }
}

/// Face-blur tasks whose status checks answer `statuses` in turn, repeating
/// the last one. Checks are counted per artifact key.
pub fn pipeline_tasks(statuses: &[&str], log: &CallLog) -> TaskRegistry {
    let statuses: Arc<Vec<String>> = Arc::new(statuses.iter().map(|s| s.to_string()).collect());
    let checks: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

    let check_log = log.clone();
    let faces_log = log.clone();
    let blur_log = log.clone();

    TaskRegistry::new()
        .register(tasks::CHECK_JOB_STATUS, move |mut body: Value| {
            check_log.record(tasks::CHECK_JOB_STATUS);
            let key = body["key"].as_str().unwrap_or_default().to_string();
            let mut checks = checks.lock().unwrap();
            let n = checks.entry(key).or_insert(0);
            let status = statuses
                .get(*n)
                .or_else(|| statuses.last())
                .cloned()
                .unwrap_or_default();
            *n += 1;
            body["job_status"] = json!(status);
            async move { Ok(body) }
        })
        .register(tasks::GET_TIMESTAMPS_AND_FACES, move |_| {
            faces_log.record(tasks::GET_TIMESTAMPS_AND_FACES);
            async { Ok(json!([{ "timestamp_ms": 0, "faces": 1 }])) }
        })
        .register(tasks::BLUR_FACES, move |_| {
            blur_log.record(tasks::BLUR_FACES);
            async { Ok(json!({ "key": "meeting-blurred.mp4" })) }
        })
}

pub fn pipeline_engine(statuses: &[&str], log: &CallLog, config: EngineConfig) -> ExecutionEngine {
    let definition = face_blur_pipeline().expect("Built-in pipeline is valid");
    ExecutionEngine::new(Arc::new(definition), Arc::new(pipeline_tasks(statuses, log)))
        .with_config(config)
}

pub fn artifact_input() -> Value {
    json!({ "body": { "location": "recordings", "key": "meeting.mp4", "size": 1024, "job_id": "job-1" } })
}

pub fn config(timeout: Duration, poll_wait: Duration) -> EngineConfig {
    EngineConfig {
        timeout,
        poll_wait,
        ..EngineConfig::default()
    }
}
