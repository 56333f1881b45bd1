/// Problem Store - external collaborator boundary (read-only)
///
/// The engine caches nothing across submissions: test cases may change
/// between two submissions to the same problem, so every evaluation
/// reads fresh.
use async_trait::async_trait;
use gavel_common::types::{Problem, ResourceLimits, TestCase};

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get_problem(&self, problem_id: &str) -> anyhow::Result<Option<Problem>>;

    async fn get_test_cases(&self, problem_id: &str) -> anyhow::Result<Option<Vec<TestCase>>> {
        Ok(self
            .get_problem(problem_id)
            .await?
            .map(|problem| problem.test_cases))
    }

    async fn get_limits(&self, problem_id: &str) -> anyhow::Result<Option<ResourceLimits>> {
        Ok(self
            .get_problem(problem_id)
            .await?
            .map(|problem| problem.limits()))
    }
}

pub struct RedisProblemStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisProblemStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProblemStore for RedisProblemStore {
    async fn get_problem(&self, problem_id: &str) -> anyhow::Result<Option<Problem>> {
        let mut conn = self.conn.clone();
        gavel_common::redis::get_problem(&mut conn, problem_id)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load problem '{}': {}", problem_id, e))
    }
}

#[cfg(test)]
pub struct InMemoryProblemStore {
    problems: std::collections::HashMap<String, Problem>,
}

#[cfg(test)]
impl InMemoryProblemStore {
    pub fn with(problems: impl IntoIterator<Item = Problem>) -> Self {
        Self {
            problems: problems.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ProblemStore for InMemoryProblemStore {
    async fn get_problem(&self, problem_id: &str) -> anyhow::Result<Option<Problem>> {
        Ok(self.problems.get(problem_id).cloned())
    }
}
