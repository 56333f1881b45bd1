/// Submission Evaluator - Orchestration
///
/// **Core Responsibility:**
/// Fan a submission's test cases out to a bounded pool of runners,
/// short-circuit on compile errors, enforce the umbrella deadline,
/// aggregate results in declared order and compute score and status.
///
/// **Failure semantics:**
/// `evaluate` never fails. Panics and internal faults are caught at
/// this boundary and converted to a persisted system_error submission,
/// so callers always get a well-formed terminal result.
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use gavel_common::types::{
    Language, Problem, ResourceLimits, Submission, SubmissionRequest, SubmissionStatus, TestCase,
    TestResult, TestStatus,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::{ConcurrencyConfig, DeadlineConfig};
use crate::runner::TestCaseRunner;
use crate::sink::ResultSink;

/// Why evaluation stopped before every runner finished.
enum Abort {
    /// Compile failure: the remaining test cases are propagated, not
    /// separately executed.
    CompileError(Option<String>),
    /// External cancellation (contest ended, user withdrew, shutdown).
    Cancelled,
    /// The submission-wide umbrella deadline expired.
    DeadlineExpired,
}

pub struct SubmissionEvaluator {
    runner: Arc<TestCaseRunner>,
    sink: Arc<dyn ResultSink>,
    concurrency: ConcurrencyConfig,
    deadlines: DeadlineConfig,
}

impl SubmissionEvaluator {
    pub fn new(
        runner: Arc<TestCaseRunner>,
        sink: Arc<dyn ResultSink>,
        concurrency: ConcurrencyConfig,
        deadlines: DeadlineConfig,
    ) -> Self {
        Self {
            runner,
            sink,
            concurrency,
            deadlines,
        }
    }

    /// Evaluate a submission to a terminal state and persist it.
    ///
    /// The cancel receiver is the external cancellation signal; flip it
    /// to true to abort in-flight test cases.
    pub async fn evaluate(
        &self,
        request: SubmissionRequest,
        problem: Problem,
        cancel: watch::Receiver<bool>,
    ) -> Submission {
        let started = std::time::Instant::now();
        let request_for_fault = request.clone();
        let test_count = problem.test_cases.len();

        info!(
            submission_id = %request.id,
            problem_id = %request.problem_id,
            language = %request.language,
            test_count,
            source_size = request.source_code.len(),
            "Starting evaluation"
        );

        // The inner task is the fault boundary: a panic in any layer
        // below surfaces here as a JoinError, never to the caller.
        let handle = tokio::spawn(evaluate_inner(
            self.runner.clone(),
            self.sink.clone(),
            self.concurrency,
            self.deadlines,
            request,
            problem,
            cancel,
        ));

        let submission = match handle.await {
            Ok(submission) => submission,
            Err(join_error) => {
                error!(
                    submission_id = %request_for_fault.id,
                    error = %join_error,
                    "Evaluation task died; converting to system_error"
                );
                system_error_submission(&request_for_fault, test_count)
            }
        };

        if let Err(e) = self.sink.persist(&submission).await {
            error!(
                submission_id = %submission.id,
                error = %e,
                "Failed to persist final verdict"
            );
        }

        info!(
            submission_id = %submission.id,
            status = ?submission.status,
            score = submission.score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Evaluation complete"
        );
        for result in &submission.test_results {
            debug!(
                submission_id = %submission.id,
                test_case_index = result.test_case_index,
                status = ?result.status,
                execution_ms = result.execution_time_ms,
                attempts = result.attempts,
                "Test result"
            );
        }

        submission
    }
}

async fn evaluate_inner(
    runner: Arc<TestCaseRunner>,
    sink: Arc<dyn ResultSink>,
    concurrency: ConcurrencyConfig,
    deadlines: DeadlineConfig,
    request: SubmissionRequest,
    problem: Problem,
    mut cancel: watch::Receiver<bool>,
) -> Submission {
    let mut submission = Submission::from_request(&request);
    submission.status = SubmissionStatus::Running;
    submission.started_at = Some(Utc::now());

    let limits = problem.limits();
    let test_cases = &problem.test_cases;
    let test_count = test_cases.len();
    let mut slots: Vec<Option<TestResult>> = vec![None; test_count];
    let mut abort: Option<Abort> = None;

    let per_test_budget_ms = limits.time_limit_ms * test_count as u64;
    let deadline = tokio::time::sleep(deadlines.umbrella_deadline(per_test_budget_ms));
    tokio::pin!(deadline);

    if test_count > 0 {
        // Compile gate: the first declared test runs alone, so a
        // submission that cannot compile costs exactly one backend call
        // instead of N.
        tokio::select! {
            result = runner.run(
                &request.source_code,
                request.language,
                0,
                &test_cases[0],
                &limits,
            ) => {
                sink.publish_progress(request.id, &result).await;
                if result.status == TestStatus::CompileError {
                    abort = Some(Abort::CompileError(result.error_message.clone()));
                }
                slots[0] = Some(result);
            }
            _ = cancelled(&mut cancel) => { abort = Some(Abort::Cancelled); }
            _ = &mut deadline => { abort = Some(Abort::DeadlineExpired); }
        }

        if abort.is_none() && test_count > 1 {
            let pool = concurrency.per_submission.min(test_count - 1);
            let mut results = stream::iter(1..test_count)
                .map(|index| {
                    run_case(
                        runner.clone(),
                        request.source_code.as_str(),
                        request.language,
                        index,
                        &test_cases[index],
                        &limits,
                    )
                })
                .buffer_unordered(pool);

            loop {
                tokio::select! {
                    next = results.next() => {
                        let Some((index, result)) = next else { break };
                        sink.publish_progress(request.id, &result).await;
                        let compile_failed = result.status == TestStatus::CompileError;
                        let message = result.error_message.clone();
                        slots[index] = Some(result);
                        if compile_failed {
                            // A backend may detect the compile failure
                            // lazily; the short-circuit still applies.
                            abort = Some(Abort::CompileError(message));
                            break;
                        }
                    }
                    _ = cancelled(&mut cancel) => { abort = Some(Abort::Cancelled); break; }
                    _ = &mut deadline => { abort = Some(Abort::DeadlineExpired); break; }
                }
            }
            // Dropping the stream cancels every in-flight runner; their
            // slots are synthesized below, never silently dropped.
        }
    }

    finalize(submission, test_cases, slots, abort)
}

/// Runs a single test case on a runner, tagging the result with its
/// declared index. Named so the returned future carries a proper
/// higher-ranked lifetime over `test_case`.
async fn run_case(
    runner: Arc<TestCaseRunner>,
    source: &str,
    language: Language,
    index: usize,
    test_case: &TestCase,
    limits: &ResourceLimits,
) -> (usize, TestResult) {
    (
        index,
        runner.run(source, language, index, test_case, limits).await,
    )
}

/// Resolves once external cancellation is requested; never resolves if
/// the cancellation source goes away.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Buffer-and-reorder: slots are indexed by declared order, so results
/// leave here deterministic regardless of completion order.
fn finalize(
    mut submission: Submission,
    test_cases: &[TestCase],
    slots: Vec<Option<TestResult>>,
    abort: Option<Abort>,
) -> Submission {
    let results: Vec<TestResult> = match &abort {
        Some(Abort::CompileError(message)) => slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                Some(result) if result.status == TestStatus::CompileError => result,
                // Short-circuit invariant: every test case reports
                // compile_error, whether or not it ran.
                _ => propagated_compile_error(index, message.as_deref()),
            })
            .collect(),
        _ => slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| unfinished_result(index, &abort)))
            .collect(),
    };

    submission.score = compute_score(test_cases, &results);
    submission.status = overall_status(&results);
    submission.test_results = results;
    submission.completed_at = Some(Utc::now());
    submission
}

fn compute_score(test_cases: &[TestCase], results: &[TestResult]) -> u32 {
    let total_points: u64 = test_cases.iter().map(|t| u64::from(t.points)).sum();
    if total_points == 0 {
        return 0;
    }
    let earned: u64 = results.iter().map(|r| u64::from(r.points_awarded)).sum();
    ((earned * 100 + total_points / 2) / total_points) as u32
}

/// Overall status: accepted iff every test passed; otherwise decided by
/// the first failing test case in declared order, independent of
/// completion order.
fn overall_status(results: &[TestResult]) -> SubmissionStatus {
    results
        .iter()
        .find(|r| r.status != TestStatus::Passed)
        .map(|first_failing| submission_status_for(first_failing.status))
        .unwrap_or(SubmissionStatus::Accepted)
}

fn submission_status_for(status: TestStatus) -> SubmissionStatus {
    match status {
        TestStatus::Passed => SubmissionStatus::Accepted,
        TestStatus::WrongAnswer => SubmissionStatus::WrongAnswer,
        TestStatus::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
        TestStatus::MemoryLimitExceeded => SubmissionStatus::MemoryLimitExceeded,
        TestStatus::RuntimeError => SubmissionStatus::RuntimeError,
        TestStatus::CompileError => SubmissionStatus::CompileError,
        // An exhausted retry budget is an infrastructure fault, not a
        // candidate fault.
        TestStatus::BackendError => SubmissionStatus::SystemError,
    }
}

fn propagated_compile_error(index: usize, message: Option<&str>) -> TestResult {
    TestResult {
        test_case_index: index,
        status: TestStatus::CompileError,
        actual_output: String::new(),
        execution_time_ms: 0,
        memory_usage_kb: None,
        points_awarded: 0,
        error_message: Some(message.unwrap_or("compilation failed").to_string()),
        attempts: 0,
    }
}

fn unfinished_result(index: usize, abort: &Option<Abort>) -> TestResult {
    let reason = match abort {
        Some(Abort::Cancelled) => "cancelled: evaluation aborted before this test case finished",
        Some(Abort::DeadlineExpired) => {
            "submission deadline exceeded before this test case finished"
        }
        _ => "test case was never executed",
    };
    TestResult {
        test_case_index: index,
        status: TestStatus::BackendError,
        actual_output: String::new(),
        execution_time_ms: 0,
        memory_usage_kb: None,
        points_awarded: 0,
        error_message: Some(reason.to_string()),
        attempts: 0,
    }
}

/// Last-resort verdict when the evaluation task itself died.
fn system_error_submission(request: &SubmissionRequest, test_count: usize) -> Submission {
    let now = Utc::now();
    let mut submission = Submission::from_request(request);
    submission.status = SubmissionStatus::SystemError;
    submission.started_at = Some(now);
    submission.completed_at = Some(now);
    submission.test_results = (0..test_count)
        .map(|index| TestResult {
            test_case_index: index,
            status: TestStatus::BackendError,
            actual_output: String::new(),
            execution_time_ms: 0,
            memory_usage_kb: None,
            points_awarded: 0,
            error_message: Some("internal evaluation error".to_string()),
            attempts: 0,
        })
        .collect();
    submission
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_case(points: u32, order: u32) -> TestCase {
        TestCase {
            input: String::new(),
            expected_output: String::new(),
            is_public: false,
            points,
            order,
        }
    }

    fn result(index: usize, status: TestStatus, points_awarded: u32) -> TestResult {
        TestResult {
            test_case_index: index,
            status,
            actual_output: String::new(),
            execution_time_ms: 1,
            memory_usage_kb: None,
            points_awarded,
            error_message: None,
            attempts: 1,
        }
    }

    #[test]
    fn test_score_rounds_to_nearest() {
        let cases = vec![test_case(1, 0), test_case(1, 1), test_case(1, 2)];
        let results = vec![
            result(0, TestStatus::Passed, 1),
            result(1, TestStatus::WrongAnswer, 0),
            result(2, TestStatus::WrongAnswer, 0),
        ];
        // 1/3 = 33.33 -> 33
        assert_eq!(compute_score(&cases, &results), 33);

        let results = vec![
            result(0, TestStatus::Passed, 1),
            result(1, TestStatus::Passed, 1),
            result(2, TestStatus::WrongAnswer, 0),
        ];
        // 2/3 = 66.67 -> 67
        assert_eq!(compute_score(&cases, &results), 67);
    }

    #[test]
    fn test_score_zero_total_points() {
        let cases = vec![test_case(0, 0)];
        let results = vec![result(0, TestStatus::Passed, 0)];
        assert_eq!(compute_score(&cases, &results), 0);
    }

    #[test]
    fn test_overall_status_first_failure_in_declared_order() {
        let results = vec![
            result(0, TestStatus::Passed, 10),
            result(1, TestStatus::TimeLimitExceeded, 0),
            result(2, TestStatus::WrongAnswer, 0),
        ];
        assert_eq!(
            overall_status(&results),
            SubmissionStatus::TimeLimitExceeded
        );
    }

    #[test]
    fn test_overall_status_all_passed() {
        let results = vec![
            result(0, TestStatus::Passed, 10),
            result(1, TestStatus::Passed, 90),
        ];
        assert_eq!(overall_status(&results), SubmissionStatus::Accepted);
    }

    #[test]
    fn test_backend_error_maps_to_system_error() {
        let results = vec![result(0, TestStatus::BackendError, 0)];
        assert_eq!(overall_status(&results), SubmissionStatus::SystemError);
    }

    #[test]
    fn test_empty_results_are_vacuously_accepted() {
        assert_eq!(overall_status(&[]), SubmissionStatus::Accepted);
    }
}
