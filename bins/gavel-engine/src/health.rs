/// Backend Health Tracker
///
/// **Core Responsibility:**
/// Per-backend circuit-breaker state derived from recent successes,
/// failures and probes.
///
/// **State machine:**
/// Healthy -(N consecutive failures)-> Degraded
/// Degraded -(M more consecutive failures)-> Unavailable
/// Degraded -(any success)-> Healthy            (transient blips are common)
/// Unavailable -(successful probe only)-> Healthy (incidental successes are
/// ignored to avoid flapping under load; probes run at most once per
/// cooldown interval)
///
/// Records live in a fixed arena, one per configured backend, each
/// behind its own mutex: a single-writer discipline with snapshot
/// reads. Health is a heuristic - stale snapshots are acceptable.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Healthy,
    Degraded,
    Unavailable,
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::Healthy => write!(f, "healthy"),
            BackendState::Degraded => write!(f, "degraded"),
            BackendState::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Point-in-time view of one backend's health.
#[derive(Debug, Clone)]
pub struct BackendHealth {
    pub backend_id: String,
    pub state: BackendState,
    pub consecutive_failures: u32,
    pub last_success_at: Option<Instant>,
    pub last_probe_at: Option<Instant>,
}

#[derive(Debug)]
struct RecordInner {
    state: BackendState,
    /// Consecutive failures since the last state change.
    consecutive_failures: u32,
    last_success_at: Option<Instant>,
    last_probe_at: Option<Instant>,
}

impl RecordInner {
    fn new() -> Self {
        Self {
            state: BackendState::Healthy,
            consecutive_failures: 0,
            last_success_at: None,
            last_probe_at: None,
        }
    }
}

pub struct HealthTracker {
    records: HashMap<String, Mutex<RecordInner>>,
    config: HealthConfig,
}

impl HealthTracker {
    /// Build the fixed arena - one record per configured backend,
    /// all starting Healthy.
    pub fn new(backend_ids: impl IntoIterator<Item = String>, config: HealthConfig) -> Self {
        let records = backend_ids
            .into_iter()
            .map(|id| (id, Mutex::new(RecordInner::new())))
            .collect();
        Self { records, config }
    }

    fn with_record<T>(&self, backend_id: &str, f: impl FnOnce(&mut RecordInner) -> T) -> Option<T> {
        self.records
            .get(backend_id)
            .map(|record| f(&mut record.lock().unwrap()))
    }

    /// Record a successful execution attempt.
    pub fn record_success(&self, backend_id: &str) {
        self.with_record(backend_id, |record| {
            record.last_success_at = Some(Instant::now());
            match record.state {
                BackendState::Healthy => {
                    record.consecutive_failures = 0;
                }
                BackendState::Degraded => {
                    // Fast recovery on any success.
                    record.state = BackendState::Healthy;
                    record.consecutive_failures = 0;
                    tracing::info!(backend_id, "Backend recovered to healthy");
                }
                // Only an explicit probe recovers an unavailable backend.
                BackendState::Unavailable => {}
            }
        });
    }

    /// Record a failed execution attempt.
    pub fn record_failure(&self, backend_id: &str) {
        self.with_record(backend_id, |record| {
            record.consecutive_failures += 1;
            match record.state {
                BackendState::Healthy => {
                    if record.consecutive_failures >= self.config.degrade_after {
                        record.state = BackendState::Degraded;
                        record.consecutive_failures = 0;
                        tracing::warn!(backend_id, "Backend degraded");
                    }
                }
                BackendState::Degraded => {
                    if record.consecutive_failures >= self.config.unavailable_after {
                        record.state = BackendState::Unavailable;
                        record.consecutive_failures = 0;
                        tracing::warn!(backend_id, "Backend marked unavailable");
                    }
                }
                BackendState::Unavailable => {}
            }
        });
    }

    /// Atomically claim a probe slot for an unavailable backend.
    /// Returns true at most once per cooldown interval; the claim
    /// timestamp restarts the cooldown whether the probe later
    /// succeeds or fails.
    pub fn begin_probe(&self, backend_id: &str) -> bool {
        self.with_record(backend_id, |record| {
            if record.state != BackendState::Unavailable {
                return false;
            }
            let due = match record.last_probe_at {
                Some(at) => at.elapsed() >= self.config.probe_cooldown(),
                None => true,
            };
            if due {
                record.last_probe_at = Some(Instant::now());
            }
            due
        })
        .unwrap_or(false)
    }

    /// Record the outcome of a probe claimed via `begin_probe`.
    pub fn record_probe_result(&self, backend_id: &str, ok: bool) {
        self.with_record(backend_id, |record| {
            if ok {
                record.state = BackendState::Healthy;
                record.consecutive_failures = 0;
                record.last_success_at = Some(Instant::now());
                tracing::info!(backend_id, "Probe succeeded, backend healthy again");
            } else {
                tracing::warn!(backend_id, "Probe failed, backend stays unavailable");
            }
        });
    }

    /// Snapshot one backend's health. Stale the instant it returns.
    pub fn snapshot(&self, backend_id: &str) -> Option<BackendHealth> {
        self.with_record(backend_id, |record| BackendHealth {
            backend_id: backend_id.to_string(),
            state: record.state,
            consecutive_failures: record.consecutive_failures,
            last_success_at: record.last_success_at,
            last_probe_at: record.last_probe_at,
        })
    }

    pub fn state(&self, backend_id: &str) -> Option<BackendState> {
        self.with_record(backend_id, |record| record.state)
    }
}
