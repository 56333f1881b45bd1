mod backends;
mod config;
mod evaluator;
#[cfg(test)]
mod evaluator_tests;
mod health;
mod problems;
mod runner;
mod selector;
mod sink;

use anyhow::Context;
use chrono::Utc;
use config::EngineConfig;
use evaluator::SubmissionEvaluator;
use gavel_common::redis;
use gavel_common::types::{Submission, SubmissionRequest, SubmissionStatus};
use health::HealthTracker;
use problems::{ProblemStore, RedisProblemStore};
use runner::TestCaseRunner;
use selector::BackendSelector;
use sink::{RedisResultSink, ResultSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Gavel engine booting...");

    let config = EngineConfig::load_default().map_err(|e| {
        error!("Failed to load engine configuration: {}", e);
        error!("Make sure config/engine.json exists or set GAVEL_CONFIG");
        e
    })?;

    info!("Configured backends: {:?}", config.backend_ids());
    info!(
        per_submission = config.concurrency.per_submission,
        global_backend_calls = config.concurrency.global_backend_calls,
        max_submissions = config.concurrency.max_submissions,
        "Concurrency limits"
    );

    // Connect to Redis
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let client = ::redis::Client::open(redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;

    info!("Connected to Redis: {}", redis_url);

    // One shared HTTP client across all adapters; per-call deadlines
    // are enforced by the runner.
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;

    let backends = backends::build_backends(&config.backends, &http_client)?;
    for backend in &backends {
        if !backend.enforces_memory_limit() {
            info!(
                backend_id = backend.id(),
                "Backend cannot enforce memory limits; relying on post-hoc classification"
            );
        }
    }
    let health = Arc::new(HealthTracker::new(config.backend_ids(), config.health));
    let selector = Arc::new(BackendSelector::new(backends, health.clone()));
    let global_slots = Arc::new(Semaphore::new(config.concurrency.global_backend_calls));
    let runner = Arc::new(TestCaseRunner::new(
        selector,
        health,
        global_slots,
        config.retry,
        config.deadlines,
    ));
    let sink: Arc<dyn ResultSink> = Arc::new(RedisResultSink::new(redis_conn.clone()));
    let problems: Arc<dyn ProblemStore> = Arc::new(RedisProblemStore::new(redis_conn.clone()));
    let evaluator = Arc::new(SubmissionEvaluator::new(
        runner,
        sink.clone(),
        config.concurrency,
        config.deadlines,
    ));
    let submission_slots = Arc::new(Semaphore::new(config.concurrency.max_submissions));

    // Setup graceful shutdown
    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        warn!("Received shutdown signal, draining in-flight evaluations...");
    };

    let mut queue_conn = redis_conn.clone();
    tokio::select! {
        _ = worker_loop(&mut queue_conn, redis_conn, evaluator, problems, sink, submission_slots) => {},
        _ = shutdown => {},
    }

    info!("Engine shutdown complete");
    Ok(())
}

async fn worker_loop(
    queue_conn: &mut ::redis::aio::ConnectionManager,
    redis_conn: ::redis::aio::ConnectionManager,
    evaluator: Arc<SubmissionEvaluator>,
    problems: Arc<dyn ProblemStore>,
    sink: Arc<dyn ResultSink>,
    submission_slots: Arc<Semaphore>,
) -> anyhow::Result<()> {
    loop {
        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_submission(queue_conn, 5.0).await {
            Ok(Some(request)) => {
                info!(
                    submission_id = %request.id,
                    problem_id = %request.problem_id,
                    language = %request.language,
                    source_size = request.source_code.len(),
                    "Received submission"
                );

                // Fresh read per submission - problems may change
                // between two submissions to the same id.
                let problem = match problems.get_problem(&request.problem_id).await {
                    Ok(Some(problem)) => problem,
                    Ok(None) => {
                        warn!(
                            submission_id = %request.id,
                            problem_id = %request.problem_id,
                            "Unknown problem"
                        );
                        finalize_unroutable(&sink, &request).await;
                        continue;
                    }
                    Err(e) => {
                        error!(submission_id = %request.id, error = %e, "Problem store read failed");
                        finalize_unroutable(&sink, &request).await;
                        continue;
                    }
                };

                let permit = submission_slots.clone().acquire_owned().await?;

                if let Err(e) =
                    redis::set_status(queue_conn, &request.id, SubmissionStatus::Running).await
                {
                    // Non-fatal: pollers just see pending a bit longer.
                    warn!(submission_id = %request.id, error = %e, "Failed to mark running");
                }

                let cancel_rx = spawn_cancel_watcher(redis_conn.clone(), request.id);
                let evaluator = evaluator.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    evaluator.evaluate(request, problem, cancel_rx).await;
                });
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// A submission whose problem cannot be loaded still reaches a
/// terminal, persisted state.
async fn finalize_unroutable(sink: &Arc<dyn ResultSink>, request: &SubmissionRequest) {
    let now = Utc::now();
    let mut submission = Submission::from_request(request);
    submission.status = SubmissionStatus::SystemError;
    submission.started_at = Some(now);
    submission.completed_at = Some(now);

    if let Err(e) = sink.persist(&submission).await {
        error!(submission_id = %submission.id, error = %e, "Failed to persist verdict");
    }
}

/// Poll the external cancellation flag and trip the evaluator's cancel
/// signal when it appears. Exits once the evaluation drops its receiver.
fn spawn_cancel_watcher(
    mut conn: ::redis::aio::ConnectionManager,
    submission_id: Uuid,
) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(250)).await;
            if tx.is_closed() {
                break;
            }
            match redis::is_cancelled(&mut conn, &submission_id).await {
                Ok(true) => {
                    info!(submission_id = %submission_id, "External cancellation requested");
                    let _ = tx.send(true);
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    // Keep evaluating on errors to avoid false cancellations.
                    debug!(submission_id = %submission_id, error = %e, "Cancellation check failed");
                }
            }
        }
    });
    rx
}
