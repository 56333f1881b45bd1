// Prometheus metrics for the Gavel API

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Submissions accepted into the queue (counter with language label)
    pub static ref SUBMISSIONS_SUBMITTED: CounterVec = CounterVec::new(
        Opts::new("gavel_submissions_submitted_total", "Total submissions queued"),
        &["language"]
    )
    .expect("metric can be created");

    // Submissions rejected before queueing (backpressure / validation)
    pub static ref SUBMISSIONS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("gavel_submissions_rejected_total", "Total submissions rejected"),
        &["reason"]
    )
    .expect("metric can be created");

    // Cancellations requested through the API
    pub static ref SUBMISSIONS_CANCELLED: CounterVec = CounterVec::new(
        Opts::new("gavel_submissions_cancelled_total", "Total cancellations requested"),
        &["source"]
    )
    .expect("metric can be created");

    // Current evaluation queue depth
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "gavel_queue_depth",
        "Current depth of the submission queue"
    )
    .expect("metric can be created");
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(SUBMISSIONS_SUBMITTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(SUBMISSIONS_REJECTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(SUBMISSIONS_CANCELLED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(QUEUE_DEPTH.clone()))
        .expect("collector can be registered");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

pub fn record_submission_submitted(language: &str) {
    SUBMISSIONS_SUBMITTED.with_label_values(&[language]).inc();
}

pub fn record_submission_rejected(reason: &str) {
    SUBMISSIONS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_submission_cancelled(source: &str) {
    SUBMISSIONS_CANCELLED.with_label_values(&[source]).inc();
}

/// Refresh the queue depth gauge.
pub async fn update_queue_depth(redis_conn: &mut redis::aio::ConnectionManager) {
    if let Ok(depth) = gavel_common::redis::queue_depth(redis_conn).await {
        QUEUE_DEPTH.set(depth);
    }
}
