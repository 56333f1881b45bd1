/// Integration tests for the submission evaluator
///
/// Everything runs through MockBackend - no network, no sandbox:
/// 1. Verdicts, scoring and ordering guarantees
/// 2. Compile-error short-circuit (one backend call total)
/// 3. Backend failover and budget exhaustion
/// 4. Umbrella deadline and external cancellation
/// 5. The system_error fault boundary

#[cfg(test)]
mod evaluator_integration_tests {
    use crate::backends::mock::{MockFailure, MockStep};
    use crate::backends::{ExecutionBackend, MockBackend};
    use crate::config::{ConcurrencyConfig, DeadlineConfig, HealthConfig, RetryConfig};
    use crate::evaluator::SubmissionEvaluator;
    use crate::health::HealthTracker;
    use crate::runner::TestCaseRunner;
    use crate::selector::BackendSelector;
    use crate::sink::MemoryResultSink;
    use chrono::Utc;
    use gavel_common::types::{
        Problem, SubmissionRequest, SubmissionStatus, TestCase, TestStatus, Language,
    };
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::{watch, Semaphore};
    use uuid::Uuid;

    fn harness(
        backends: Vec<Arc<MockBackend>>,
        deadlines: DeadlineConfig,
    ) -> (SubmissionEvaluator, Arc<MemoryResultSink>) {
        let ids = backends.iter().map(|b| b.id().to_string());
        let health = Arc::new(HealthTracker::new(ids, HealthConfig::default()));
        let dyn_backends: Vec<Arc<dyn ExecutionBackend>> = backends
            .into_iter()
            .map(|b| b as Arc<dyn ExecutionBackend>)
            .collect();
        let selector = Arc::new(BackendSelector::new(dyn_backends, health.clone()));
        let runner = Arc::new(TestCaseRunner::new(
            selector,
            health,
            Arc::new(Semaphore::new(32)),
            RetryConfig::default(),
            deadlines,
        ));
        let sink = Arc::new(MemoryResultSink::new());
        let evaluator = SubmissionEvaluator::new(
            runner,
            sink.clone(),
            ConcurrencyConfig::default(),
            deadlines,
        );
        (evaluator, sink)
    }

    fn default_harness(
        backends: Vec<Arc<MockBackend>>,
    ) -> (SubmissionEvaluator, Arc<MemoryResultSink>) {
        harness(backends, DeadlineConfig::default())
    }

    /// Problem where test i feeds input "<i>\n" and expects it echoed
    /// back, so an echo backend passes every test.
    fn echo_problem(points: &[u32]) -> Problem {
        Problem {
            id: "echo".to_string(),
            time_limit_ms: 1000,
            memory_limit_kb: 65_536,
            test_cases: points
                .iter()
                .enumerate()
                .map(|(i, &points)| TestCase {
                    input: format!("{}\n", i),
                    expected_output: format!("{}\n", i),
                    is_public: i == 0,
                    points,
                    order: i as u32,
                })
                .collect(),
        }
    }

    fn request() -> SubmissionRequest {
        SubmissionRequest {
            id: Uuid::new_v4(),
            problem_id: "echo".to_string(),
            language: Language::Python,
            source_code: "print(input())".to_string(),
            created_at: Utc::now(),
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        // Dropping the sender means cancellation can never arrive.
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn test_accepted_when_all_tests_pass() {
        let mock = Arc::new(MockBackend::echo("mock"));
        let (evaluator, sink) = default_harness(vec![mock]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[10, 10, 80]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::Accepted);
        assert_eq!(submission.score, 100);
        assert_eq!(submission.test_results.len(), 3);
        assert!(submission
            .test_results
            .iter()
            .all(|r| r.status == TestStatus::Passed));

        // Terminal bookkeeping.
        assert!(submission.completed_at.unwrap() >= submission.started_at.unwrap());

        // Verdict persisted once, one progress event per test case.
        assert_eq!(sink.persisted.lock().unwrap().len(), 1);
        assert_eq!(sink.progress.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_wrong_answer_scores_partial_credit() {
        let mock = Arc::new(MockBackend::echo("mock"));
        let (evaluator, _sink) = default_harness(vec![mock]);

        let mut problem = echo_problem(&[10, 10, 80]);
        problem.test_cases[2].expected_output = "something else\n".to_string();

        let submission = evaluator.evaluate(request(), problem, no_cancel()).await;

        assert_eq!(submission.status, SubmissionStatus::WrongAnswer);
        assert_eq!(submission.score, 20);
        assert_eq!(submission.test_results[0].status, TestStatus::Passed);
        assert_eq!(submission.test_results[1].status, TestStatus::Passed);
        assert_eq!(submission.test_results[2].status, TestStatus::WrongAnswer);
    }

    #[tokio::test]
    async fn test_compile_error_short_circuits_with_one_backend_call() {
        let mock = Arc::new(MockBackend::with_default(
            "mock",
            MockStep::CompileError("main.py:1: SyntaxError".to_string()),
        ));
        let (evaluator, _sink) = default_harness(vec![mock.clone()]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[10, 10, 80]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::CompileError);
        assert_eq!(submission.score, 0);
        assert_eq!(submission.test_results.len(), 3);
        for result in &submission.test_results {
            assert_eq!(result.status, TestStatus::CompileError);
            assert!(result.error_message.is_some());
        }

        // The compile gate means the whole submission cost one call.
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_lazy_compile_error_mid_fanout_still_propagates() {
        // The backend detects the compile failure only on the third
        // test case, after others already passed.
        let mock = Arc::new(MockBackend::echo("mock").with_handler(|request| {
            if request.stdin.starts_with('2') {
                MockStep::Delay(30, Box::new(MockStep::CompileError("late failure".to_string())))
            } else {
                MockStep::Echo
            }
        }));
        let (evaluator, _sink) = default_harness(vec![mock]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[25, 25, 25, 25]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::CompileError);
        assert_eq!(submission.score, 0);
        assert!(submission
            .test_results
            .iter()
            .all(|r| r.status == TestStatus::CompileError));
    }

    #[tokio::test]
    async fn test_results_ordered_under_randomized_latency() {
        // Each test case sleeps for a scrambled duration derived from
        // its stdin, so completion order differs from declared order.
        let mock = Arc::new(MockBackend::echo("mock").with_handler(|request| {
            let index: u64 = request.stdin.trim().parse().unwrap_or(0);
            let delay_ms = [40, 5, 90, 1, 25][index as usize % 5];
            MockStep::Delay(delay_ms, Box::new(MockStep::Echo))
        }));
        let (evaluator, sink) = default_harness(vec![mock]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[20, 20, 20, 20, 20]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::Accepted);
        let indices: Vec<usize> = submission
            .test_results
            .iter()
            .map(|r| r.test_case_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        // Progress events arrive in completion order; the persisted
        // sequence is still declared order.
        assert_eq!(sink.progress.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_failover_to_second_backend_reaches_accepted() {
        let flaky = Arc::new(MockBackend::with_default(
            "flaky",
            MockStep::Fail(MockFailure::Network),
        ));
        let healthy = Arc::new(MockBackend::echo("healthy"));
        let (evaluator, _sink) = default_harness(vec![flaky.clone(), healthy.clone()]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[50, 50]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::Accepted);
        assert_eq!(submission.score, 100);
        // Every test eventually landed on the healthy backend.
        assert_eq!(healthy.calls(), 2);
        assert!(flaky.calls() > 0);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_on_same_backend() {
        // Fails its first call, then behaves: N=1 < budget of 2 calls
        // per backend.
        let mock = Arc::new(
            MockBackend::echo("mock").with_script(vec![MockStep::Fail(MockFailure::Timeout)]),
        );
        let (evaluator, _sink) = default_harness(vec![mock]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[100]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::Accepted);
        assert_eq!(submission.test_results[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_always_failing_backends_reach_system_error() {
        let a = Arc::new(MockBackend::with_default(
            "a",
            MockStep::Fail(MockFailure::Network),
        ));
        let b = Arc::new(MockBackend::with_default(
            "b",
            MockStep::Fail(MockFailure::Rejected),
        ));
        let (evaluator, sink) = default_harness(vec![a, b]);

        let started = Instant::now();
        let submission = evaluator
            .evaluate(request(), echo_problem(&[40, 60]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::SystemError);
        assert_eq!(submission.score, 0);
        for result in &submission.test_results {
            assert_eq!(result.status, TestStatus::BackendError);
            assert!(result.error_message.is_some());
        }
        assert!(submission.completed_at.is_some());

        // Bounded budgets, not the umbrella deadline, end this one.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sink.persisted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_umbrella_deadline_bounds_a_hung_backend() {
        let hung = Arc::new(MockBackend::with_default(
            "hung",
            MockStep::Delay(5_000, Box::new(MockStep::Echo)),
        ));
        let deadlines = DeadlineConfig {
            umbrella_cap_ms: 300,
            ..DeadlineConfig::default()
        };
        let (evaluator, _sink) = harness(vec![hung], deadlines);

        let started = Instant::now();
        let submission = evaluator
            .evaluate(request(), echo_problem(&[50, 50]), no_cancel())
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(submission.status, SubmissionStatus::SystemError);
        for result in &submission.test_results {
            assert_eq!(result.status, TestStatus::BackendError);
            assert!(result
                .error_message
                .as_deref()
                .unwrap()
                .contains("deadline"));
        }
    }

    #[tokio::test]
    async fn test_external_cancellation_records_cancelled_results() {
        let slow = Arc::new(MockBackend::with_default(
            "slow",
            MockStep::Delay(2_000, Box::new(MockStep::Echo)),
        ));
        let (evaluator, _sink) = default_harness(vec![slow]);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = cancel_tx.send(true);
        });

        let started = Instant::now();
        let submission = evaluator
            .evaluate(request(), echo_problem(&[100]), cancel_rx)
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(submission.status, SubmissionStatus::SystemError);
        assert!(submission.test_results[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("cancelled"));
    }

    #[tokio::test]
    async fn test_idempotent_against_deterministic_backend() {
        let run = |problem: Problem| async {
            let mock = Arc::new(MockBackend::echo("mock"));
            let (evaluator, _sink) = default_harness(vec![mock]);
            evaluator.evaluate(request(), problem, no_cancel()).await
        };

        let mut problem = echo_problem(&[30, 30, 40]);
        problem.test_cases[1].expected_output = "mismatch\n".to_string();

        let first = run(problem.clone()).await;
        let second = run(problem).await;

        assert_eq!(first.status, second.status);
        assert_eq!(first.score, second.score);
        let statuses = |s: &gavel_common::types::Submission| {
            s.test_results.iter().map(|r| r.status).collect::<Vec<_>>()
        };
        assert_eq!(statuses(&first), statuses(&second));
    }

    #[tokio::test]
    async fn test_panicking_backend_becomes_system_error() {
        let mock = Arc::new(
            MockBackend::echo("mock").with_handler(|_| panic!("adapter bug")),
        );
        let (evaluator, sink) = default_harness(vec![mock]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[50, 50]), no_cancel())
            .await;

        // The fault boundary converts the panic; callers still get a
        // terminal, persisted verdict.
        assert_eq!(submission.status, SubmissionStatus::SystemError);
        assert_eq!(submission.test_results.len(), 2);
        assert!(submission.completed_at.is_some());
        assert_eq!(sink.persisted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_problem_is_vacuously_accepted() {
        let mock = Arc::new(MockBackend::echo("mock"));
        let (evaluator, _sink) = default_harness(vec![mock.clone()]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::Accepted);
        assert_eq!(submission.score, 0);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_mixed_failure_statuses_decided_by_declared_order() {
        // Test 1 crashes, test 2 overruns the time limit; declared
        // order puts the crash first, so the submission is
        // runtime_error even if the timeout finishes classification
        // first.
        let mock = Arc::new(MockBackend::echo("mock").with_handler(|request| {
            match request.stdin.trim() {
                "1" => MockStep::Crash {
                    exit_code: 1,
                    stderr: "IndexError".to_string(),
                },
                "2" => MockStep::OverTime,
                _ => MockStep::Echo,
            }
        }));
        let (evaluator, _sink) = default_harness(vec![mock]);

        let submission = evaluator
            .evaluate(request(), echo_problem(&[20, 40, 40]), no_cancel())
            .await;

        assert_eq!(submission.status, SubmissionStatus::RuntimeError);
        assert_eq!(submission.score, 20);
        assert_eq!(submission.test_results[1].status, TestStatus::RuntimeError);
        assert_eq!(
            submission.test_results[2].status,
            TestStatus::TimeLimitExceeded
        );
    }
}
