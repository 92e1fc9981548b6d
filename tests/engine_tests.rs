mod common;

use common::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blurflow::engine::error_codes;
use blurflow::invoker::{TaskInvocationError, TaskRegistry};
use blurflow::workflow::pipeline::{self, states, tasks};
use blurflow::workflow::{ChoiceRule, Condition, ContextPath, EngineConfig, RetryPolicy, State};
use blurflow::{
    ChannelReporter, ExecutionEngine, ExecutionOutcome, ExecutionStatus, WorkflowDefinition,
};
use serde_json::json;
use tokio::time::Instant;
use tokio_test::assert_ok;

fn retry_config(max_retries: u32) -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        },
        ..EngineConfig::default()
    }
}

/// Sets its flag when the invocation holding it is dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A task that never answers and flags when its future is dropped
fn hanging_task(dropped: &Arc<AtomicBool>) -> TaskRegistry {
    let flag = dropped.clone();
    TaskRegistry::new().register("hang", move |_| {
        let guard = DropFlag(flag.clone());
        async move {
            let _guard = guard;
            std::future::pending::<Result<serde_json::Value, TaskInvocationError>>().await
        }
    })
}

/// task -> succeed, storing the result at $.result
fn single_task(task: &str) -> WorkflowDefinition {
    WorkflowDefinition::builder("single", "Work")
        .state(
            "Work",
            State::task(task, ContextPath::root(), Some(path("$.result")), "Done"),
        )
        .state("Done", State::Succeed)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_always_in_progress_times_out_at_deadline() {
    let log = CallLog::default();
    let engine = pipeline_engine(
        &["IN_PROGRESS"],
        &log,
        config(Duration::from_secs(15 * 60), Duration::from_secs(1)),
    );

    let start = Instant::now();
    let report = engine.run(artifact_input()).await;
    let elapsed = Instant::now() - start;

    assert_eq!(report.status, ExecutionStatus::TimedOut);
    assert!(elapsed >= Duration::from_secs(15 * 60));
    assert!(elapsed < Duration::from_secs(15 * 60 + 1));
    match report.outcome {
        ExecutionOutcome::TimedOut { elapsed } => {
            assert!(elapsed >= Duration::from_secs(15 * 60))
        }
        other => panic!("expected a timeout, got {:?}", other),
    }

    let checks = log.count(tasks::CHECK_JOB_STATUS);
    assert!((899..=901).contains(&checks), "{} status checks", checks);
    assert_eq!(log.count(tasks::GET_TIMESTAMPS_AND_FACES), 0);
    assert_eq!(report.context["body"]["job_status"], "IN_PROGRESS");
}

#[tokio::test(start_paused = true)]
async fn test_immediate_success_extracts_then_blurs() {
    let log = CallLog::default();
    let engine = pipeline_engine(&["SUCCEEDED"], &log, EngineConfig::default());

    let report = engine.run(artifact_input()).await;

    assert_eq!(report.status, ExecutionStatus::Succeeded);
    assert_eq!(report.final_state, states::EXECUTION_SUCCEEDED);
    assert_eq!(
        log.calls(),
        vec![
            tasks::CHECK_JOB_STATUS,
            tasks::GET_TIMESTAMPS_AND_FACES,
            tasks::BLUR_FACES
        ]
    );
    assert_eq!(report.context["faces"], json!([{ "timestamp_ms": 0, "faces": 1 }]));
    assert_eq!(report.context["blurred"], json!({ "key": "meeting-blurred.mp4" }));
    assert_eq!(
        report.outcome,
        ExecutionOutcome::Succeeded {
            output: report.context.clone()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_status_fails() {
    let log = CallLog::default();
    let engine = pipeline_engine(&["PENDING"], &log, EngineConfig::default());

    let report = engine.run(artifact_input()).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.final_state, states::EXECUTION_FAILED);
    assert_eq!(
        report.failure(),
        Some((pipeline::FAILURE_ERROR, pipeline::FAILURE_CAUSE))
    );
    assert_eq!(log.calls(), vec![tasks::CHECK_JOB_STATUS]);
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_succeeded() {
    let log = CallLog::default();
    let engine = pipeline_engine(
        &["IN_PROGRESS", "IN_PROGRESS", "SUCCEEDED"],
        &log,
        config(Duration::from_secs(60), Duration::from_secs(5)),
    );

    let start = Instant::now();
    let report = engine.run(artifact_input()).await;

    assert!(report.succeeded());
    assert_eq!(log.count(tasks::CHECK_JOB_STATUS), 3);
    assert_eq!(Instant::now() - start, Duration::from_secs(10));
    // check, choice, wait twice; then check, choice, extract, blur, succeed
    assert_eq!(report.visited_count, 11);
}

#[tokio::test(start_paused = true)]
async fn test_first_matching_rule_wins() {
    let definition = WorkflowDefinition::builder("order", "Decide")
        .state(
            "Decide",
            State::choice(
                vec![
                    ChoiceRule::new(Condition::is_present(path("$.flag"), true), "First"),
                    ChoiceRule::new(Condition::equals(path("$.flag"), true), "Second"),
                ],
                Some("Neither".to_string()),
            ),
        )
        .state("First", State::Succeed)
        .state("Second", State::Succeed)
        .state("Neither", State::fail("no rule matched", "Test.Neither"))
        .build()
        .unwrap();

    let engine = ExecutionEngine::new(Arc::new(definition), Arc::new(TaskRegistry::new()));

    let report = engine.run(json!({ "flag": true })).await;
    assert_eq!(report.final_state, "First");

    let report = engine.run(json!({})).await;
    assert_eq!(report.final_state, "Neither");
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let registry = TaskRegistry::new().register("flaky", move |_| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt < 3 {
                Err(TaskInvocationError::transient("service busy"))
            } else {
                Ok(json!("done"))
            }
        }
    });

    let engine = ExecutionEngine::new(Arc::new(single_task("flaky")), Arc::new(registry));

    let start = Instant::now();
    let report = engine.run(json!({})).await;

    assert!(report.succeeded());
    assert_eq!(report.context["result"], "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // 1s then 2s of backoff
    assert_eq!(Instant::now() - start, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_fails_without_retry() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let registry = TaskRegistry::new().register("broken", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(TaskInvocationError::permanent("invalid recording")) }
    });

    let engine = ExecutionEngine::new(Arc::new(single_task("broken")), Arc::new(registry));
    let report = engine.run(json!({})).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(
        report.failure(),
        Some((error_codes::TASK_FAILED, "invalid recording"))
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let registry = TaskRegistry::new().register("flaky", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(TaskInvocationError::transient("still busy")) }
    });

    let engine = ExecutionEngine::new(Arc::new(single_task("flaky")), Arc::new(registry))
        .with_config(retry_config(2));
    let report = engine.run(json!({})).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.failure(), Some((error_codes::TASK_FAILED, "still busy")));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_attempt_is_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let registry = TaskRegistry::new().register("slow", move |_| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt == 1 {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!("late"))
            } else {
                Ok(json!("fresh"))
            }
        }
    });

    // The first attempt would answer while the second task is pending
    let definition = WorkflowDefinition::builder("slow", "Work")
        .state(
            "Work",
            State::task("slow", ContextPath::root(), Some(path("$.first")), "Pause"),
        )
        .state("Pause", State::wait(Some(Duration::from_secs(20)), "Again"))
        .state(
            "Again",
            State::task("slow", ContextPath::root(), Some(path("$.second")), "Done"),
        )
        .state("Done", State::Succeed)
        .build()
        .unwrap();

    let config = EngineConfig {
        task_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    };
    let engine =
        ExecutionEngine::new(Arc::new(definition), Arc::new(registry)).with_config(config);

    let report = engine.run(json!({})).await;

    assert!(report.succeeded());
    assert_eq!(report.context["first"], "fresh");
    assert_eq!(report.context["second"], "fresh");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_budget_exceeded_on_last_attempt_is_a_timeout_error() {
    let registry = TaskRegistry::new().register("stuck", |_| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!(null))
    });

    let config = EngineConfig {
        task_timeout: Duration::from_secs(5),
        ..retry_config(0)
    };
    let engine = ExecutionEngine::new(Arc::new(single_task("stuck")), Arc::new(registry))
        .with_config(config);

    let start = Instant::now();
    let report = engine.run(json!({})).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.failure().map(|(error, _)| error), Some(error_codes::TASK_TIMEOUT));
    assert_eq!(Instant::now() - start, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_result_after_timeout_is_not_applied() {
    let registry = TaskRegistry::new().register("slow", |_| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(json!("too late"))
    });
    let (reporter, mut reports) = ChannelReporter::new();

    let engine = ExecutionEngine::new(Arc::new(single_task("slow")), Arc::new(registry))
        .with_config(config(Duration::from_secs(5), Duration::from_secs(1)))
        .with_reporter(Arc::new(reporter));

    let report = engine.run(json!({ "body": {} })).await;
    assert_eq!(report.status, ExecutionStatus::TimedOut);

    // Past the point where the invocation would have answered
    tokio::time::sleep(Duration::from_secs(10)).await;

    let reported = assert_ok!(reports.try_recv());
    assert_eq!(reported.status, ExecutionStatus::TimedOut);
    assert_eq!(reported.context, json!({ "body": {} }));
    assert!(reports.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_during_backoff() {
    let registry = TaskRegistry::new()
        .register("flaky", |_| async { Err(TaskInvocationError::transient("busy")) });

    let config = EngineConfig {
        timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_secs(5),
            ..RetryPolicy::default()
        },
        ..EngineConfig::default()
    };
    let engine = ExecutionEngine::new(Arc::new(single_task("flaky")), Arc::new(registry))
        .with_config(config);

    let start = Instant::now();
    let report = engine.run(json!({})).await;

    assert_eq!(report.status, ExecutionStatus::TimedOut);
    assert_eq!(Instant::now() - start, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_missing_input_path_fails() {
    let log = CallLog::default();
    let engine = pipeline_engine(&["SUCCEEDED"], &log, EngineConfig::default());

    let report = engine.run(json!({ "unrelated": true })).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(
        report.failure().map(|(error, _)| error),
        Some(error_codes::PATH_NOT_FOUND)
    );
    assert!(log.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_waits_overlap() {
    let definition = WorkflowDefinition::builder("nap", "Nap")
        .state("Nap", State::wait(Some(Duration::from_secs(30)), "Done"))
        .state("Done", State::Succeed)
        .build()
        .unwrap();
    let engine = ExecutionEngine::new(Arc::new(definition), Arc::new(TaskRegistry::new()));

    let start = Instant::now();
    let (a, b) = tokio::join!(engine.run(json!({ "n": 1 })), engine.run(json!({ "n": 2 })));

    assert!(a.succeeded() && b.succeeded());
    assert_ne!(a.id, b.id);
    assert_eq!(a.context, json!({ "n": 1 }));
    assert_eq!(b.context, json!({ "n": 2 }));
    assert_eq!(Instant::now() - start, Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_each_execution_is_reported_once() {
    let log = CallLog::default();
    let (reporter, mut reports) = ChannelReporter::new();
    let engine = pipeline_engine(&["SUCCEEDED"], &log, EngineConfig::default())
        .with_reporter(Arc::new(reporter));

    let first = engine.run(artifact_input()).await;
    let second = engine.run(artifact_input()).await;

    let reported: Vec<_> = std::iter::from_fn(|| reports.try_recv().ok()).collect();
    assert_eq!(reported.len(), 2);
    assert_eq!(reported[0].id, first.id);
    assert_eq!(reported[1].id, second.id);
}

#[tokio::test(start_paused = true)]
async fn test_hung_invocation_is_dropped_after_timeout() {
    let dropped = Arc::new(AtomicBool::new(false));
    let engine = ExecutionEngine::new(Arc::new(single_task("hang")), Arc::new(hanging_task(&dropped)))
        .with_config(config(Duration::from_secs(5), Duration::from_secs(1)));

    let report = engine.run(json!({})).await;
    assert_eq!(report.status, ExecutionStatus::TimedOut);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_attempt_over_budget_is_dropped() {
    let dropped = Arc::new(AtomicBool::new(false));
    let config = EngineConfig {
        task_timeout: Duration::from_secs(5),
        ..config(Duration::from_secs(600), Duration::from_secs(1))
    };
    let engine = ExecutionEngine::new(Arc::new(single_task("hang")), Arc::new(hanging_task(&dropped)))
        .with_config(config);

    let run = tokio::spawn(async move { engine.run(json!({})).await });

    // First budget expires at 5s, the retry starts after a 1s backoff
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert!(dropped.load(Ordering::SeqCst));

    run.abort();
}

#[tokio::test(start_paused = true)]
async fn test_oversized_durations_do_not_overflow() {
    let log = CallLog::default();
    let config: EngineConfig = serde_yaml::from_str(
        "timeout: 18446744073709551615\ntask_timeout: 18446744073709551615",
    )
    .unwrap();
    let report = pipeline_engine(&["SUCCEEDED"], &log, config)
        .run(artifact_input())
        .await;
    assert!(report.succeeded());

    let config: EngineConfig = serde_yaml::from_str(
        "timeout: 60\npoll_wait: 18446744073709551615\ninitial_backoff: 18446744073709551615\nmax_backoff: 18446744073709551615",
    )
    .unwrap();
    let start = Instant::now();
    let report = pipeline_engine(&["IN_PROGRESS"], &log, config)
        .run(artifact_input())
        .await;
    assert_eq!(report.status, ExecutionStatus::TimedOut);
    assert_eq!(Instant::now() - start, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_unstorable_output_fails() {
    let registry = TaskRegistry::new().register("faces", |_| async { Ok(json!([1, 2])) });
    let definition = WorkflowDefinition::builder("store", "Work")
        .state(
            "Work",
            State::task(
                "faces",
                ContextPath::root(),
                Some(ContextPath::root().key("faces").index(usize::MAX)),
                "Done",
            ),
        )
        .state("Done", State::Succeed)
        .build()
        .unwrap();

    let report = ExecutionEngine::new(Arc::new(definition), Arc::new(registry))
        .run(json!({}))
        .await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(
        report.failure().map(|(error, _)| error),
        Some(error_codes::INDEX_OUT_OF_RANGE)
    );
    assert_eq!(report.context, json!({}));
}
