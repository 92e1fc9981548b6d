//! Simulated face-blur worker
//!
//! Serves the four pipeline tasks over JSON-RPC on stdin/stdout without
//! doing any detection or video work. Behaviour is tuned with environment
//! variables:
//!
//! - `SIM_POLLS_BEFORE_SUCCESS` - status checks answered IN_PROGRESS before
//!   the job reports SUCCEEDED (default 2)
//! - `SIM_JOB_STATUS` - report this status on every check instead
//! - `SIM_TRANSIENT_FAILURES` - status checks that fail transiently before
//!   any answer (default 0)

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use blurflow::worker::{serve, TaskInfo, TaskWorker, WorkerError};
use blurflow::workflow::pipeline::tasks;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimSettings {
    polls_before_success: u32,
    forced_status: Option<String>,
    transient_failures: u32,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            polls_before_success: 2,
            forced_status: None,
            transient_failures: 0,
        }
    }
}

impl SimSettings {
    fn from_env() -> Self {
        let number = |name: &str, default: u32| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        Self {
            polls_before_success: number("SIM_POLLS_BEFORE_SUCCESS", 2),
            forced_status: std::env::var("SIM_JOB_STATUS").ok().filter(|s| !s.is_empty()),
            transient_failures: number("SIM_TRANSIENT_FAILURES", 0),
        }
    }
}

#[derive(Debug, Default)]
struct SimWorker {
    settings: SimSettings,
    next_job: u64,
    /// Status checks seen per job id
    polls: HashMap<String, u32>,
    failures_left: u32,
}

impl SimWorker {
    fn new(settings: SimSettings) -> Self {
        Self {
            failures_left: settings.transient_failures,
            settings,
            ..Self::default()
        }
    }

    fn object(input: Value, task: &str) -> Result<Map<String, Value>, WorkerError> {
        match input {
            Value::Object(map) => Ok(map),
            other => Err(WorkerError::Permanent(format!(
                "{} expects an object, got {}",
                task, other
            ))),
        }
    }

    fn start_face_detection(&mut self, input: Value) -> Result<Value, WorkerError> {
        let mut body = Self::object(input, tasks::START_FACE_DETECTION)?;
        if !body.contains_key("key") {
            return Err(WorkerError::Permanent("artifact has no key".to_string()));
        }
        self.next_job += 1;
        body.insert("job_id".to_string(), json!(format!("job-{}", self.next_job)));
        Ok(Value::Object(body))
    }

    fn check_job_status(&mut self, input: Value) -> Result<Value, WorkerError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(WorkerError::Transient("detection service busy".to_string()));
        }

        let mut body = Self::object(input, tasks::CHECK_JOB_STATUS)?;
        let job = body
            .get("job_id")
            .or_else(|| body.get("key"))
            .and_then(Value::as_str)
            .ok_or_else(|| WorkerError::Permanent("body has neither job_id nor key".to_string()))?
            .to_string();

        let polls = self.polls.entry(job.clone()).or_insert(0);
        *polls += 1;

        let status = match &self.settings.forced_status {
            Some(status) => status.clone(),
            None if *polls > self.settings.polls_before_success => "SUCCEEDED".to_string(),
            None => "IN_PROGRESS".to_string(),
        };
        debug!(job = %job, polls = *polls, "job_status = {}", status);

        body.insert("job_status".to_string(), json!(status));
        Ok(Value::Object(body))
    }

    fn get_timestamps_and_faces(&mut self, input: Value) -> Result<Value, WorkerError> {
        let body = Self::object(input, tasks::GET_TIMESTAMPS_AND_FACES)?;
        if body.get("job_status").and_then(Value::as_str) != Some("SUCCEEDED") {
            return Err(WorkerError::Permanent("detection job has not succeeded".to_string()));
        }
        Ok(json!([
            { "timestamp_ms": 0, "faces": [{ "left": 0.1, "top": 0.2, "width": 0.1, "height": 0.15 }] },
            { "timestamp_ms": 500, "faces": [{ "left": 0.12, "top": 0.2, "width": 0.1, "height": 0.15 }] }
        ]))
    }

    fn blur_faces(&mut self, input: Value) -> Result<Value, WorkerError> {
        let key = input
            .pointer("/body/key")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkerError::Permanent("no artifact key to blur".to_string()))?;
        let frames = input
            .get("faces")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);

        let blurred = match key.strip_suffix(".mp4") {
            Some(stem) => format!("{}-blurred.mp4", stem),
            None => format!("{}-blurred", key),
        };
        Ok(json!({ "key": blurred, "frames_blurred": frames }))
    }
}

impl TaskWorker for SimWorker {
    fn invoke(&mut self, task: &str, input: Value) -> Result<Value, WorkerError> {
        match task {
            tasks::START_FACE_DETECTION => self.start_face_detection(input),
            tasks::CHECK_JOB_STATUS => self.check_job_status(input),
            tasks::GET_TIMESTAMPS_AND_FACES => self.get_timestamps_and_faces(input),
            tasks::BLUR_FACES => self.blur_faces(input),
            _ => Err(WorkerError::UnknownTask(task.to_string())),
        }
    }

    fn list_tasks(&self) -> Vec<TaskInfo> {
        vec![
            TaskInfo::new(tasks::START_FACE_DETECTION, "Start a face detection job"),
            TaskInfo::new(tasks::CHECK_JOB_STATUS, "Report the detection job status"),
            TaskInfo::new(tasks::GET_TIMESTAMPS_AND_FACES, "List detected faces per frame"),
            TaskInfo::new(tasks::BLUR_FACES, "Blur detected faces in the recording"),
        ]
    }
}

fn main() {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    serve(SimWorker::new(SimSettings::from_env()));
}
