/// Result Sink - external collaborator boundary
///
/// Persists the final verdict and publishes incremental per-test
/// progress. Progress is fire-and-forget: a lost event must never
/// affect the final persisted verdict, so `publish_progress` swallows
/// and logs its own failures.
use async_trait::async_trait;
use gavel_common::types::{Submission, TestResult};
use tracing::warn;
use uuid::Uuid;

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist the finalized submission.
    async fn persist(&self, submission: &Submission) -> anyhow::Result<()>;

    /// Publish one per-test progress event. Best-effort.
    async fn publish_progress(&self, submission_id: Uuid, result: &TestResult);
}

pub struct RedisResultSink {
    conn: redis::aio::ConnectionManager,
}

impl RedisResultSink {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ResultSink for RedisResultSink {
    async fn persist(&self, submission: &Submission) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        gavel_common::redis::store_result(&mut conn, submission)
            .await
            .map_err(|e| anyhow::anyhow!("failed to persist submission result: {}", e))
    }

    async fn publish_progress(&self, submission_id: Uuid, result: &TestResult) {
        let mut conn = self.conn.clone();
        if let Err(e) =
            gavel_common::redis::publish_progress(&mut conn, &submission_id, result).await
        {
            warn!(
                submission_id = %submission_id,
                test_case_index = result.test_case_index,
                error = %e,
                "Dropped progress event"
            );
        }
    }
}

/// In-memory sink backing the evaluator tests.
#[cfg(test)]
pub struct MemoryResultSink {
    pub persisted: std::sync::Mutex<Vec<Submission>>,
    pub progress: std::sync::Mutex<Vec<(Uuid, TestResult)>>,
}

#[cfg(test)]
impl MemoryResultSink {
    pub fn new() -> Self {
        Self {
            persisted: std::sync::Mutex::new(Vec::new()),
            progress: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn persist(&self, submission: &Submission) -> anyhow::Result<()> {
        self.persisted.lock().unwrap().push(submission.clone());
        Ok(())
    }

    async fn publish_progress(&self, submission_id: Uuid, result: &TestResult) {
        self.progress
            .lock()
            .unwrap()
            .push((submission_id, result.clone()));
    }
}
