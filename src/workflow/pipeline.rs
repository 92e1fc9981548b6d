//! The built-in face-blur pipeline
//!
//! ```text
//! Check Job Status -> Job Finished?
//!   IN_PROGRESS -> Poll Wait -> Check Job Status
//!   SUCCEEDED   -> Get Timestamps and Faces -> Blur Faces -> Execution Succeeded
//!   otherwise   -> Execution Failed
//! ```
//!
//! The detection job is started by the `start_face_detection` trigger task,
//! whose result becomes `$.body`.

use super::definition::{DefinitionValidationError, WorkflowDefinition};
use super::path::ContextPath;
use super::state::{ChoiceRule, Condition, State};

pub const PIPELINE_NAME: &str = "face-blur";

/// Task names understood by face-blur workers
pub mod tasks {
    pub const START_FACE_DETECTION: &str = "start_face_detection";
    pub const CHECK_JOB_STATUS: &str = "check_job_status";
    pub const GET_TIMESTAMPS_AND_FACES: &str = "get_timestamps_and_faces";
    pub const BLUR_FACES: &str = "blur_faces";

    pub const ALL: [&str; 4] = [
        START_FACE_DETECTION,
        CHECK_JOB_STATUS,
        GET_TIMESTAMPS_AND_FACES,
        BLUR_FACES,
    ];
}

pub mod states {
    pub const CHECK_JOB_STATUS: &str = "Check Job Status";
    pub const JOB_FINISHED: &str = "Job Finished?";
    pub const POLL_WAIT: &str = "Poll Wait";
    pub const GET_TIMESTAMPS_AND_FACES: &str = "Get Timestamps and Faces";
    pub const BLUR_FACES: &str = "Blur Faces";
    pub const EXECUTION_SUCCEEDED: &str = "Execution Succeeded";
    pub const EXECUTION_FAILED: &str = "Execution Failed";
}

pub const FAILURE_CAUSE: &str = "Face Detection Failed";
pub const FAILURE_ERROR: &str = "Could not get job_status = 'SUCCEEDED'";

fn body() -> ContextPath {
    ContextPath::root().key("body")
}

/// Build the face-blur pipeline definition
pub fn face_blur_pipeline() -> Result<WorkflowDefinition, DefinitionValidationError> {
    let job_status = body().key("job_status");

    WorkflowDefinition::builder(PIPELINE_NAME, states::CHECK_JOB_STATUS)
        .state(
            states::CHECK_JOB_STATUS,
            State::task(
                tasks::CHECK_JOB_STATUS,
                body(),
                Some(body()),
                states::JOB_FINISHED,
            ),
        )
        .state(
            states::JOB_FINISHED,
            State::choice(
                vec![
                    ChoiceRule::new(
                        Condition::equals(job_status.clone(), "IN_PROGRESS"),
                        states::POLL_WAIT,
                    ),
                    ChoiceRule::new(
                        Condition::equals(job_status, "SUCCEEDED"),
                        states::GET_TIMESTAMPS_AND_FACES,
                    ),
                ],
                Some(states::EXECUTION_FAILED.to_string()),
            ),
        )
        .state(
            states::POLL_WAIT,
            State::wait(None, states::CHECK_JOB_STATUS),
        )
        .state(
            states::GET_TIMESTAMPS_AND_FACES,
            State::task(
                tasks::GET_TIMESTAMPS_AND_FACES,
                body(),
                Some(ContextPath::root().key("faces")),
                states::BLUR_FACES,
            ),
        )
        .state(
            states::BLUR_FACES,
            State::task(
                tasks::BLUR_FACES,
                ContextPath::root(),
                Some(ContextPath::root().key("blurred")),
                states::EXECUTION_SUCCEEDED,
            ),
        )
        .state(states::EXECUTION_SUCCEEDED, State::Succeed)
        .state(
            states::EXECUTION_FAILED,
            State::fail(FAILURE_CAUSE, FAILURE_ERROR),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ExecutionContext;
    use serde_json::json;

    fn next_after_check(body: serde_json::Value) -> Option<String> {
        let definition = face_blur_pipeline().unwrap();
        let ctx = ExecutionContext::from_value(json!({ "body": body }));
        match definition.state(states::JOB_FINISHED) {
            Some(State::Choice(choice)) => choice.select(&ctx).map(str::to_string),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_pipeline_is_valid() {
        let definition = face_blur_pipeline().unwrap();
        assert_eq!(definition.name(), PIPELINE_NAME);
        assert_eq!(definition.start_at(), states::CHECK_JOB_STATUS);
        assert_eq!(definition.states().len(), 7);
    }

    #[test]
    fn test_job_finished_branches() {
        assert_eq!(
            next_after_check(json!({ "job_status": "IN_PROGRESS" })).as_deref(),
            Some(states::POLL_WAIT)
        );
        assert_eq!(
            next_after_check(json!({ "job_status": "SUCCEEDED" })).as_deref(),
            Some(states::GET_TIMESTAMPS_AND_FACES)
        );
        assert_eq!(
            next_after_check(json!({ "job_status": "PENDING" })).as_deref(),
            Some(states::EXECUTION_FAILED)
        );
        assert_eq!(
            next_after_check(json!({})).as_deref(),
            Some(states::EXECUTION_FAILED)
        );
    }

    #[test]
    fn test_poll_wait_uses_configured_interval() {
        let definition = face_blur_pipeline().unwrap();
        match definition.state(states::POLL_WAIT) {
            Some(State::Wait(wait)) => assert!(wait.duration.is_none()),
            other => panic!("unexpected state {:?}", other),
        }
    }
}
