// HTTP route handlers for the Gavel API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use gavel_common::redis;
use gavel_common::types::{Language, Problem, SubmissionRequest, SubmissionStatus, TestCase};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{metrics, AppState};

/// Guardrail matching the engine's adapters: oversized payloads are
/// rejected before they reach the queue.
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub problem_id: String,
    pub language: Language,
    pub source_code: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub submission_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ProblemUpsert {
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub test_cases: Vec<TestCaseInput>,
}

#[derive(Debug, Deserialize)]
pub struct TestCaseInput {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    10
}

/// Problem view with hidden test case payloads redacted.
#[derive(Debug, Serialize)]
pub struct ProblemView {
    pub id: String,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub test_cases: Vec<TestCaseView>,
}

#[derive(Debug, Serialize)]
pub struct TestCaseView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    pub is_public: bool,
    pub points: u32,
    pub order: u32,
}

impl From<Problem> for ProblemView {
    fn from(problem: Problem) -> Self {
        Self {
            id: problem.id,
            time_limit_ms: problem.time_limit_ms,
            memory_limit_kb: problem.memory_limit_kb,
            test_cases: problem
                .test_cases
                .into_iter()
                .map(|tc| TestCaseView {
                    input: tc.is_public.then(|| tc.input.clone()),
                    expected_output: tc.is_public.then(|| tc.expected_output.clone()),
                    is_public: tc.is_public,
                    points: tc.points,
                    order: tc.order,
                })
                .collect(),
        }
    }
}

fn error_body(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": message.into() }))
}

/// POST /submissions - Queue a submission for evaluation
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> impl IntoResponse {
    if payload.source_code.len() > MAX_SOURCE_CODE_BYTES {
        metrics::record_submission_rejected("source_too_large");
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            error_body(format!(
                "source code exceeds the {} byte limit",
                MAX_SOURCE_CODE_BYTES
            )),
        )
            .into_response();
    }

    let mut conn = state.redis.clone();

    // Reject submissions to unknown problems up front instead of
    // letting them die in the engine.
    match redis::get_problem(&mut conn, &payload.problem_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            metrics::record_submission_rejected("unknown_problem");
            return (
                StatusCode::NOT_FOUND,
                error_body(format!("problem '{}' not found", payload.problem_id)),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Failed to check problem");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("problem store unavailable"),
            )
                .into_response();
        }
    }

    let request = SubmissionRequest {
        id: Uuid::new_v4(),
        problem_id: payload.problem_id,
        language: payload.language,
        source_code: payload.source_code,
        created_at: Utc::now(),
    };

    if let Err(e) = redis::push_submission(&mut conn, &request).await {
        error!(submission_id = %request.id, error = %e, "Failed to queue submission");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("failed to queue submission"),
        )
            .into_response();
    }

    if let Err(e) = redis::set_status(&mut conn, &request.id, SubmissionStatus::Pending).await {
        warn!(submission_id = %request.id, error = %e, "Failed to set pending status");
    }

    metrics::record_submission_submitted(&request.language.to_string());
    info!(
        submission_id = %request.id,
        problem_id = %request.problem_id,
        language = %request.language,
        "Submission queued"
    );

    (
        StatusCode::CREATED,
        Json(SubmitResponse {
            submission_id: request.id.to_string(),
        }),
    )
        .into_response()
}

/// GET /submissions/{id} - Query the verdict
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> impl IntoResponse {
    let submission_uuid = match Uuid::parse_str(&submission_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                error_body("invalid submission id format"),
            )
                .into_response();
        }
    };

    let mut conn = state.redis.clone();
    match redis::get_result(&mut conn, &submission_uuid).await {
        Ok(Some(submission)) => {
            info!(submission_id = %submission_id, status = ?submission.status, "Verdict retrieved");
            (StatusCode::OK, Json(submission)).into_response()
        }
        Ok(None) => match redis::get_status(&mut conn, &submission_uuid).await {
            Ok(Some(status)) => (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "submission_id": submission_id,
                    "status": status,
                    "message": "submission is queued or still evaluating"
                })),
            )
                .into_response(),
            Ok(None) => (
                StatusCode::NOT_FOUND,
                error_body("unknown submission id"),
            )
                .into_response(),
            Err(e) => {
                error!(submission_id = %submission_id, error = %e, "Failed to fetch status");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("failed to query submission status"),
                )
                    .into_response()
            }
        },
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Failed to fetch verdict");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("failed to query submission"),
            )
                .into_response()
        }
    }
}

/// POST /submissions/{id}/cancel - Request external cancellation
pub async fn cancel_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> impl IntoResponse {
    let submission_uuid = match Uuid::parse_str(&submission_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                error_body("invalid submission id format"),
            )
                .into_response();
        }
    };

    let mut conn = state.redis.clone();
    match redis::get_status(&mut conn, &submission_uuid).await {
        Ok(Some(status)) if status.is_terminal() => {
            return (
                StatusCode::CONFLICT,
                error_body("submission already reached a terminal state"),
            )
                .into_response();
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_body("unknown submission id"),
            )
                .into_response();
        }
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Failed to fetch status");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("failed to query submission status"),
            )
                .into_response();
        }
    }

    if let Err(e) = redis::request_cancel(&mut conn, &submission_uuid).await {
        error!(submission_id = %submission_id, error = %e, "Failed to raise cancel flag");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("failed to request cancellation"),
        )
            .into_response();
    }

    metrics::record_submission_cancelled("api");
    info!(submission_id = %submission_id, "Cancellation requested");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "submission_id": submission_id, "status": "cancelling" })),
    )
        .into_response()
}

/// PUT /problems/{id} - Register or replace a problem
pub async fn put_problem(
    State(state): State<Arc<AppState>>,
    Path(problem_id): Path<String>,
    Json(payload): Json<ProblemUpsert>,
) -> impl IntoResponse {
    if payload.test_cases.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            error_body("a problem needs at least one test case"),
        )
            .into_response();
    }
    if payload.time_limit_ms == 0 || payload.memory_limit_kb == 0 {
        return (
            StatusCode::BAD_REQUEST,
            error_body("time and memory limits must be positive"),
        )
            .into_response();
    }

    let problem = Problem {
        id: problem_id.clone(),
        time_limit_ms: payload.time_limit_ms,
        memory_limit_kb: payload.memory_limit_kb,
        test_cases: payload
            .test_cases
            .into_iter()
            .enumerate()
            .map(|(order, tc)| TestCase {
                input: tc.input,
                expected_output: tc.expected_output,
                is_public: tc.is_public,
                points: tc.points,
                order: order as u32,
            })
            .collect(),
    };

    let mut conn = state.redis.clone();
    match redis::put_problem(&mut conn, &problem).await {
        Ok(()) => {
            info!(
                problem_id = %problem_id,
                test_cases = problem.test_cases.len(),
                "Problem stored"
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "id": problem_id,
                    "test_cases": problem.test_cases.len()
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(problem_id = %problem_id, error = %e, "Failed to store problem");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("failed to store problem"),
            )
                .into_response()
        }
    }
}

/// GET /problems/{id} - Problem with hidden test cases redacted
pub async fn get_problem(
    State(state): State<Arc<AppState>>,
    Path(problem_id): Path<String>,
) -> impl IntoResponse {
    let mut conn = state.redis.clone();
    match redis::get_problem(&mut conn, &problem_id).await {
        Ok(Some(problem)) => (StatusCode::OK, Json(ProblemView::from(problem))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_body(format!("problem '{}' not found", problem_id)),
        )
            .into_response(),
        Err(e) => {
            error!(problem_id = %problem_id, error = %e, "Failed to fetch problem");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("failed to query problem"),
            )
                .into_response()
        }
    }
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus metrics
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut conn = state.redis.clone();
    metrics::update_queue_depth(&mut conn).await;
    (StatusCode::OK, metrics::render_metrics())
}
