use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Strongly-typed language enum
/// Start strict - will extend dynamically later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Rust,
}

impl Language {
    /// Returns all language variants
    /// This is the single source of truth for available languages
    pub fn all_variants() -> &'static [Language] {
        &[Language::Python, Language::Java, Language::Rust]
    }

    /// Parse a language from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Language> {
        match s.to_lowercase().as_str() {
            "python" => Some(Language::Python),
            "java" => Some(Language::Java),
            "rust" => Some(Language::Rust),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Java => write!(f, "java"),
            Language::Rust => write!(f, "rust"),
        }
    }
}

/// Test Case Definition (Immutable Input)
/// Owned by the problem collaborator - the engine never mutates these.
/// `order` is the declared position; results are always reported in
/// declared order regardless of execution completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    pub is_public: bool,
    pub points: u32,
    pub order: u32,
}

/// Per-problem resource limits, applied to every test case execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
}

/// Problem definition as served by the problem store.
/// Read fresh on every submission - test cases may change between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            time_limit_ms: self.time_limit_ms,
            memory_limit_kb: self.memory_limit_kb,
        }
    }
}

/// Submission Input (Immutable)
/// The queued payload - write-once, never mutate input fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub id: Uuid,
    pub problem_id: String,
    pub language: Language,
    pub source_code: String,
    pub created_at: DateTime<Utc>,
}

/// Per-Test Status
/// Distinguishes candidate-code faults from backend faults.
/// Candidate-code faults are never retried; backend_error means the
/// retry budget across alternate backends was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    BackendError,
}

/// Submission State Machine
/// pending -> running -> exactly one terminal outcome.
/// system_error is reserved for engine-internal faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    SystemError,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending | SubmissionStatus::Running)
    }
}

/// Per-Test Result
/// Created exactly once per test case per submission; replaced wholesale
/// on retry, never patched. Every non-passed result carries a
/// human-readable error_message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case_index: usize,
    pub status: TestStatus,
    pub actual_output: String,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_kb: Option<u64>,
    pub points_awarded: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempts: u32,
}

/// Submission Output
/// Mutated only by the evaluator; immutable once terminal.
///
/// ## Invariants:
/// - completed_at is set iff status is terminal
/// - score (0-100) is derived from test_results, never set directly
/// - test_results are ordered by test_case_index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub problem_id: String,
    pub language: Language,
    pub source_code: String,
    pub status: SubmissionStatus,
    pub score: u32,
    pub test_results: Vec<TestResult>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Create a pending submission from a queued request.
    pub fn from_request(request: &SubmissionRequest) -> Self {
        Self {
            id: request.id,
            problem_id: request.problem_id.clone(),
            language: request.language,
            source_code: request.source_code.clone(),
            status: SubmissionStatus::Pending,
            score: 0,
            test_results: Vec::new(),
            created_at: request.created_at,
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_case(order: u32, points: u32) -> TestCase {
        TestCase {
            input: "5\n".to_string(),
            expected_output: "120\n".to_string(),
            is_public: order == 0,
            points,
            order,
        }
    }

    #[test]
    fn test_language_serialization() {
        let lang = Language::Python;
        let json = serde_json::to_string(&lang).unwrap();
        assert_eq!(json, "\"python\"");

        let deserialized: Language = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, Language::Python);
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!(Language::from_str("python"), Some(Language::Python));
        assert_eq!(Language::from_str("Python"), Some(Language::Python));
        assert_eq!(Language::from_str("JAVA"), Some(Language::Java));
        assert_eq!(Language::from_str("rust"), Some(Language::Rust));

        assert_eq!(Language::from_str("javascript"), None);
        assert_eq!(Language::from_str(""), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SubmissionStatus::WrongAnswer).unwrap();
        assert_eq!(json, "\"wrong_answer\"");

        let json = serde_json::to_string(&TestStatus::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"time_limit_exceeded\"");

        let json = serde_json::to_string(&TestStatus::BackendError).unwrap();
        assert_eq!(json, "\"backend_error\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SubmissionStatus::Pending.is_terminal());
        assert!(!SubmissionStatus::Running.is_terminal());
        assert!(SubmissionStatus::Accepted.is_terminal());
        assert!(SubmissionStatus::WrongAnswer.is_terminal());
        assert!(SubmissionStatus::CompileError.is_terminal());
        assert!(SubmissionStatus::SystemError.is_terminal());
    }

    #[test]
    fn test_submission_request_round_trip() {
        let request = SubmissionRequest {
            id: Uuid::new_v4(),
            problem_id: "two-sum".to_string(),
            language: Language::Java,
            source_code: "public class Main {}".to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&request).unwrap();
        let deserialized: SubmissionRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id, request.id);
        assert_eq!(deserialized.problem_id, "two-sum");
        assert_eq!(deserialized.language, Language::Java);
    }

    #[test]
    fn test_submission_from_request_starts_pending() {
        let request = SubmissionRequest {
            id: Uuid::new_v4(),
            problem_id: "fizzbuzz".to_string(),
            language: Language::Python,
            source_code: "print(1)".to_string(),
            created_at: Utc::now(),
        };

        let submission = Submission::from_request(&request);

        assert_eq!(submission.status, SubmissionStatus::Pending);
        assert_eq!(submission.score, 0);
        assert!(submission.test_results.is_empty());
        assert!(submission.started_at.is_none());
        assert!(submission.completed_at.is_none());
    }

    #[test]
    fn test_problem_limits() {
        let problem = Problem {
            id: "p1".to_string(),
            time_limit_ms: 2000,
            memory_limit_kb: 262_144,
            test_cases: vec![make_test_case(0, 10), make_test_case(1, 90)],
        };

        let limits = problem.limits();
        assert_eq!(limits.time_limit_ms, 2000);
        assert_eq!(limits.memory_limit_kb, 262_144);
    }

    #[test]
    fn test_test_result_optional_fields_omitted() {
        let result = TestResult {
            test_case_index: 0,
            status: TestStatus::Passed,
            actual_output: "120".to_string(),
            execution_time_ms: 42,
            memory_usage_kb: None,
            points_awarded: 10,
            error_message: None,
            attempts: 1,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("memory_usage_kb"));
        assert!(!json.contains("error_message"));
    }
}
