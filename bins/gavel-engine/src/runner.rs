/// Test Case Runner
///
/// **Core Responsibility:**
/// Execute one (code, test case) pair through the backend selector and
/// produce a normalized TestResult.
///
/// **Failure split:**
/// - Candidate-code faults (compile error, wrong answer, limits,
///   crashes) are classified and never retried.
/// - Backend faults are retried on alternate backends within a bounded
///   budget; exhausting it yields status backend_error.
///
/// Every attempt, success or failure, updates backend health.
use gavel_common::types::{Language, ResourceLimits, TestCase, TestResult, TestStatus};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::backends::{ExecutionRequest, ExecutionResponse};
use crate::config::{DeadlineConfig, RetryConfig};
use crate::health::HealthTracker;
use crate::selector::BackendSelector;

/// Exit signals that mean the process was killed for exceeding a
/// resource limit rather than crashing on its own.
const RESOURCE_KILL_SIGNALS: [&str; 2] = ["SIGKILL", "SIGXCPU"];

pub struct TestCaseRunner {
    selector: Arc<BackendSelector>,
    health: Arc<HealthTracker>,
    global_slots: Arc<Semaphore>,
    retry: RetryConfig,
    deadlines: DeadlineConfig,
}

/// Normalize program output for comparison.
///
/// Line endings are unified, trailing whitespace per line and trailing
/// blank lines are ignored. Leading whitespace and interior blank
/// lines stay significant.
pub fn normalize_output(output: &str) -> String {
    let unified = output.replace("\r\n", "\n");
    let mut lines: Vec<&str> = unified.split('\n').map(|line| line.trim_end()).collect();
    while lines.last() == Some(&"") {
        lines.pop();
    }
    lines.join("\n")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim_end()
}

/// Classify a normalized backend response against a test case.
///
/// Priority order matters: a compile failure trumps everything, a
/// resource kill trumps output comparison, and only a clean exit gets
/// its output compared.
pub fn classify_response(
    index: usize,
    test_case: &TestCase,
    limits: &ResourceLimits,
    response: ExecutionResponse,
    attempts: u32,
) -> TestResult {
    let mut result = TestResult {
        test_case_index: index,
        status: TestStatus::WrongAnswer,
        actual_output: response.stdout.clone(),
        execution_time_ms: response.time_ms,
        memory_usage_kb: response.memory_kb,
        points_awarded: 0,
        error_message: None,
        attempts,
    };

    if let Some(compile_error) = response.compile_error {
        result.status = TestStatus::CompileError;
        result.error_message = Some(compile_error);
        return result;
    }

    let resource_killed = response
        .exit_signal
        .as_deref()
        .is_some_and(|signal| RESOURCE_KILL_SIGNALS.contains(&signal));

    if resource_killed && response.time_ms >= limits.time_limit_ms {
        result.status = TestStatus::TimeLimitExceeded;
        result.error_message = Some(format!(
            "time limit exceeded: ran {}ms against a {}ms limit",
            response.time_ms, limits.time_limit_ms
        ));
        return result;
    }

    // Post-hoc memory check: covers backends that report usage but
    // cannot enforce a limit natively.
    if let Some(memory_kb) = response.memory_kb {
        if memory_kb > limits.memory_limit_kb {
            result.status = TestStatus::MemoryLimitExceeded;
            result.error_message = Some(format!(
                "memory limit exceeded: used {}KB against a {}KB limit",
                memory_kb, limits.memory_limit_kb
            ));
            return result;
        }
    }

    let crashed = response.exit_signal.is_some() || response.exit_code.unwrap_or(0) != 0;
    if crashed {
        result.status = TestStatus::RuntimeError;
        let detail = match (&response.exit_signal, response.exit_code) {
            (Some(signal), _) => format!("killed by {}", signal),
            (None, Some(code)) => format!("exit code {}", code),
            (None, None) => "abnormal termination".to_string(),
        };
        let stderr_head = first_line(&response.stderr);
        result.error_message = Some(if stderr_head.is_empty() {
            format!("runtime error: {}", detail)
        } else {
            format!("runtime error: {} ({})", detail, stderr_head)
        });
        return result;
    }

    if normalize_output(&response.stdout) == normalize_output(&test_case.expected_output) {
        result.status = TestStatus::Passed;
        result.points_awarded = test_case.points;
    } else {
        result.status = TestStatus::WrongAnswer;
        result.error_message = Some("output does not match expected output".to_string());
    }

    result
}

impl TestCaseRunner {
    pub fn new(
        selector: Arc<BackendSelector>,
        health: Arc<HealthTracker>,
        global_slots: Arc<Semaphore>,
        retry: RetryConfig,
        deadlines: DeadlineConfig,
    ) -> Self {
        Self {
            selector,
            health,
            global_slots,
            retry,
            deadlines,
        }
    }

    /// Run one test case to a TestResult. Never returns an error:
    /// exhausted budgets become status backend_error.
    pub async fn run(
        &self,
        code: &str,
        language: Language,
        index: usize,
        test_case: &TestCase,
        limits: &ResourceLimits,
    ) -> TestResult {
        let request = ExecutionRequest {
            code: code.to_string(),
            language,
            stdin: test_case.input.clone(),
            time_limit_ms: limits.time_limit_ms,
            memory_limit_kb: limits.memory_limit_kb,
        };
        let call_deadline = self.deadlines.call_deadline(limits.time_limit_ms);

        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts = 0u32;
        let mut last_fault: Option<String> = None;

        while (tried.len() as u32) < self.retry.max_backends {
            let Some(backend) = self.selector.select(&tried).await else {
                break;
            };

            for _ in 0..self.retry.calls_per_backend() {
                let permit = match self.global_slots.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed: the engine is shutting down.
                        return self.backend_error(
                            index,
                            attempts,
                            "cancelled: engine shutting down".to_string(),
                        );
                    }
                };

                attempts += 1;
                let outcome =
                    tokio::time::timeout(call_deadline, backend.execute(&request)).await;
                drop(permit);

                match outcome {
                    Ok(Ok(response)) => {
                        self.health.record_success(backend.id());
                        debug!(
                            backend_id = backend.id(),
                            test_case_index = index,
                            attempts,
                            "Backend call succeeded"
                        );
                        return classify_response(index, test_case, limits, response, attempts);
                    }
                    Ok(Err(fault)) => {
                        self.health.record_failure(backend.id());
                        warn!(
                            backend_id = backend.id(),
                            test_case_index = index,
                            error = %fault,
                            "Backend call failed"
                        );
                        last_fault = Some(format!("{}: {}", backend.id(), fault));
                    }
                    Err(_) => {
                        self.health.record_failure(backend.id());
                        warn!(
                            backend_id = backend.id(),
                            test_case_index = index,
                            deadline_ms = call_deadline.as_millis() as u64,
                            "Backend call exceeded its deadline"
                        );
                        last_fault = Some(format!(
                            "{}: call exceeded its {}ms deadline",
                            backend.id(),
                            call_deadline.as_millis()
                        ));
                    }
                }
            }

            tried.insert(backend.id().to_string());
        }

        let reason = match last_fault {
            Some(fault) => format!(
                "backend attempt budget exhausted after {} attempts; last fault: {}",
                attempts, fault
            ),
            None => "no backend available for this test case".to_string(),
        };
        self.backend_error(index, attempts, reason)
    }

    fn backend_error(&self, index: usize, attempts: u32, reason: String) -> TestResult {
        TestResult {
            test_case_index: index,
            status: TestStatus::BackendError,
            actual_output: String::new(),
            execution_time_ms: 0,
            memory_usage_kb: None,
            points_awarded: 0,
            error_message: Some(reason),
            attempts,
        }
    }
}
