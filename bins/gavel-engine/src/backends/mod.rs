/// Execution Backend Adapters
///
/// **Core Responsibility:**
/// Present every external judge service behind one uniform contract:
/// code + stdin + limits in, a normalized execution response out.
///
/// **Critical Architectural Boundary:**
/// - Adapters know wire shapes, auth headers and unit conversions
/// - Adapters do NOT know scoring rules or retry policy
/// - Adapters do NOT touch backend health state
///
/// The set of adapters is closed: new backends are added as a new
/// `BackendKind` variant plus an adapter module, never by type-checking.
use async_trait::async_trait;
use gavel_common::types::Language;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{BackendConfig, BackendKind};

pub mod fallback;
pub mod mock;
pub mod primary;

pub use fallback::FallbackBackend;
pub use mock::MockBackend;
pub use primary::PrimaryBackend;

/// Normalized request contract between the runner and an adapter.
/// Transient - never persisted.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: Language,
    pub stdin: String,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
}

/// Normalized response contract.
///
/// Adapters translate backend-specific exit codes, signal names and
/// time/memory units into this shape. `compile_error` set means the
/// code never ran; everything else describes one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub exit_signal: Option<String>,
    pub time_ms: u64,
    pub memory_kb: Option<u64>,
    pub compile_error: Option<String>,
}

/// Uniform failure contract for all adapters.
///
/// These are backend faults, not candidate-code faults: the runner may
/// retry them on an alternate backend. Candidate-code outcomes always
/// arrive as an `ExecutionResponse`.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend call exceeded its {0}ms deadline")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    /// Map a reqwest failure into the uniform taxonomy. Client-level
    /// timeouts count as network faults; the runner enforces the real
    /// per-call deadline itself.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::MalformedResponse(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

/// One external judge service.
///
/// Implementations are cheap handles over a shared HTTP client; the
/// runner wraps every `execute` call in its own deadline, so adapters
/// do not need client-level timeouts beyond connect sanity.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn id(&self) -> &str;

    /// Whether the backend enforces the memory limit natively.
    /// When false, the runner's post-hoc check against reported memory
    /// is the only enforcement.
    fn enforces_memory_limit(&self) -> bool;

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, BackendError>;

    /// Lightweight liveness check, used by the circuit breaker to
    /// recover an unavailable backend.
    async fn probe(&self) -> Result<(), BackendError>;
}

/// Construct the configured adapter set.
/// The match over `BackendKind` is the closed set of variants.
pub fn build_backends(
    configs: &[BackendConfig],
    client: &reqwest::Client,
) -> anyhow::Result<Vec<Arc<dyn ExecutionBackend>>> {
    let mut backends: Vec<Arc<dyn ExecutionBackend>> = Vec::with_capacity(configs.len());

    for config in configs {
        let backend: Arc<dyn ExecutionBackend> = match config.kind {
            BackendKind::Primary => Arc::new(PrimaryBackend::new(
                &config.id,
                client.clone(),
                config.require_base_url()?,
                config.auth_token.clone(),
            )),
            BackendKind::Fallback => Arc::new(FallbackBackend::new(
                &config.id,
                client.clone(),
                config.require_base_url()?,
            )),
            BackendKind::Mock => Arc::new(MockBackend::echo(&config.id)),
        };
        backends.push(backend);
    }

    Ok(backends)
}
