use crate::types::{Problem, Submission, SubmissionRequest, SubmissionStatus, TestResult};
use redis::{AsyncCommands, RedisResult};
use uuid::Uuid;

/// Redis key semantics - defines only semantics, not runtime logic.
/// Ensures API, CLI and engine never drift and keys stay deterministic.

pub const QUEUE_KEY: &str = "gavel:queue:submissions";
pub const RESULT_PREFIX: &str = "gavel:result";
pub const STATUS_PREFIX: &str = "gavel:status";
pub const PROBLEM_PREFIX: &str = "gavel:problem";
pub const CANCEL_PREFIX: &str = "gavel:cancel";
pub const PROGRESS_PREFIX: &str = "gavel:progress";

/// Results and status entries expire after 24 hours.
const RESULT_TTL_SECS: u64 = 86_400;
/// Cancellation flags expire after an hour - long past any umbrella deadline.
const CANCEL_TTL_SECS: u64 = 3_600;

pub fn result_key(submission_id: &Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

pub fn status_key(submission_id: &Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, submission_id)
}

pub fn problem_key(problem_id: &str) -> String {
    format!("{}:{}", PROBLEM_PREFIX, problem_id)
}

pub fn cancel_key(submission_id: &Uuid) -> String {
    format!("{}:{}", CANCEL_PREFIX, submission_id)
}

/// Pub/sub channel for incremental per-test progress events.
pub fn progress_channel(submission_id: &Uuid) -> String {
    format!("{}:{}", PROGRESS_PREFIX, submission_id)
}

fn json_error(context: &'static str, e: impl std::fmt::Display) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, context, e.to_string()))
}

/// Push a submission to the evaluation queue.
/// Uses RPUSH for FIFO semantics.
pub async fn push_submission(
    conn: &mut redis::aio::ConnectionManager,
    request: &SubmissionRequest,
) -> RedisResult<()> {
    let payload =
        serde_json::to_string(request).map_err(|e| json_error("serialization error", e))?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a submission from the evaluation queue.
/// Uses BLPOP with timeout for graceful shutdown.
pub async fn pop_submission(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<SubmissionRequest>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let request: SubmissionRequest = serde_json::from_str(&payload)
                .map_err(|e| json_error("deserialization error", e))?;
            Ok(Some(request))
        }
        None => Ok(None),
    }
}

/// Store a finalized submission.
/// Also stores the status separately for quick lookup.
pub async fn store_result(
    conn: &mut redis::aio::ConnectionManager,
    submission: &Submission,
) -> RedisResult<()> {
    let payload =
        serde_json::to_string(submission).map_err(|e| json_error("serialization error", e))?;
    let _: () = conn
        .set_ex(result_key(&submission.id), payload, RESULT_TTL_SECS)
        .await?;

    set_status(conn, &submission.id, submission.status).await
}

/// Retrieve a finalized submission, if any.
pub async fn get_result(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
) -> RedisResult<Option<Submission>> {
    let payload: Option<String> = conn.get(result_key(submission_id)).await?;

    match payload {
        Some(data) => {
            let submission: Submission =
                serde_json::from_str(&data).map_err(|e| json_error("deserialization error", e))?;
            Ok(Some(submission))
        }
        None => Ok(None),
    }
}

/// Record the coarse lifecycle status (pending/running/terminal).
pub async fn set_status(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
    status: SubmissionStatus,
) -> RedisResult<()> {
    let payload =
        serde_json::to_string(&status).map_err(|e| json_error("serialization error", e))?;
    conn.set_ex(status_key(submission_id), payload, RESULT_TTL_SECS)
        .await
}

pub async fn get_status(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
) -> RedisResult<Option<SubmissionStatus>> {
    let payload: Option<String> = conn.get(status_key(submission_id)).await?;

    match payload {
        Some(data) => {
            let status: SubmissionStatus =
                serde_json::from_str(&data).map_err(|e| json_error("deserialization error", e))?;
            Ok(Some(status))
        }
        None => Ok(None),
    }
}

/// Store a problem definition. Overwrites any previous version.
pub async fn put_problem(
    conn: &mut redis::aio::ConnectionManager,
    problem: &Problem,
) -> RedisResult<()> {
    let payload =
        serde_json::to_string(problem).map_err(|e| json_error("serialization error", e))?;
    conn.set(problem_key(&problem.id), payload).await
}

/// Fetch a problem definition.
/// Callers read fresh on every submission - no caching here or above.
pub async fn get_problem(
    conn: &mut redis::aio::ConnectionManager,
    problem_id: &str,
) -> RedisResult<Option<Problem>> {
    let payload: Option<String> = conn.get(problem_key(problem_id)).await?;

    match payload {
        Some(data) => {
            let problem: Problem =
                serde_json::from_str(&data).map_err(|e| json_error("deserialization error", e))?;
            Ok(Some(problem))
        }
        None => Ok(None),
    }
}

/// Raise the cancellation flag for a submission.
pub async fn request_cancel(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
) -> RedisResult<()> {
    conn.set_ex(cancel_key(submission_id), 1u8, CANCEL_TTL_SECS)
        .await
}

/// Check whether cancellation was requested for a submission.
pub async fn is_cancelled(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
) -> RedisResult<bool> {
    conn.exists(cancel_key(submission_id)).await
}

/// Publish an incremental per-test progress event.
/// Fire-and-forget at the caller: a lost event must never affect the
/// final persisted verdict.
pub async fn publish_progress(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
    result: &TestResult,
) -> RedisResult<()> {
    let payload =
        serde_json::to_string(result).map_err(|e| json_error("serialization error", e))?;
    conn.publish(progress_channel(submission_id), payload).await
}

/// Current queue depth, for metrics.
pub async fn queue_depth(conn: &mut redis::aio::ConnectionManager) -> RedisResult<i64> {
    conn.llen(QUEUE_KEY).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = result_key(&id);
        let key2 = result_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("gavel:result:"));
    }

    #[test]
    fn test_status_key_format() {
        let id = Uuid::new_v4();
        let key = status_key(&id);
        assert!(key.starts_with("gavel:status:"));
        assert!(key.contains(&id.to_string()));
    }

    #[test]
    fn test_problem_key_format() {
        assert_eq!(problem_key("two-sum"), "gavel:problem:two-sum");
    }

    #[test]
    fn test_cancel_and_progress_keys() {
        let id = Uuid::new_v4();
        assert!(cancel_key(&id).starts_with("gavel:cancel:"));
        assert!(progress_channel(&id).starts_with("gavel:progress:"));
    }
}
