/// Backend Selector
///
/// Chooses the best available adapter for one execution attempt, given
/// the current health snapshots and the set of backends already tried
/// for this test case. Preference order: healthy backends in config
/// order, then degraded ones. Unavailable backends are only handed out
/// through a successful on-demand probe.
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backends::ExecutionBackend;
use crate::health::{BackendState, HealthTracker};

pub struct BackendSelector {
    backends: Vec<Arc<dyn ExecutionBackend>>,
    health: Arc<HealthTracker>,
}

impl BackendSelector {
    pub fn new(backends: Vec<Arc<dyn ExecutionBackend>>, health: Arc<HealthTracker>) -> Self {
        Self { backends, health }
    }

    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id().to_string()).collect()
    }

    /// Pick an adapter for the next attempt, excluding backends already
    /// tried for this test case. Returns None when every configured
    /// backend is excluded or unavailable with no probe slot open.
    pub async fn select(
        &self,
        exclude: &HashSet<String>,
    ) -> Option<Arc<dyn ExecutionBackend>> {
        for wanted in [BackendState::Healthy, BackendState::Degraded] {
            for backend in &self.backends {
                if exclude.contains(backend.id()) {
                    continue;
                }
                if self.health.state(backend.id()) == Some(wanted) {
                    debug!(backend_id = backend.id(), state = %wanted, "Selected backend");
                    return Some(backend.clone());
                }
            }
        }

        // Last resort: try to recover an unavailable backend. The
        // tracker hands out at most one probe slot per cooldown.
        for backend in &self.backends {
            if exclude.contains(backend.id()) {
                continue;
            }
            if !self.health.begin_probe(backend.id()) {
                continue;
            }
            info!(backend_id = backend.id(), "Probing unavailable backend");
            match backend.probe().await {
                Ok(()) => {
                    self.health.record_probe_result(backend.id(), true);
                    return Some(backend.clone());
                }
                Err(e) => {
                    debug!(backend_id = backend.id(), error = %e, "Probe failed");
                    self.health.record_probe_result(backend.id(), false);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use crate::config::HealthConfig;

    fn selector_with(
        backends: Vec<Arc<MockBackend>>,
        config: HealthConfig,
    ) -> (BackendSelector, Arc<HealthTracker>) {
        let ids = backends.iter().map(|b| b.id().to_string());
        let health = Arc::new(HealthTracker::new(ids, config));
        let dyn_backends: Vec<Arc<dyn ExecutionBackend>> = backends
            .into_iter()
            .map(|b| b as Arc<dyn ExecutionBackend>)
            .collect();
        (BackendSelector::new(dyn_backends, health.clone()), health)
    }

    #[tokio::test]
    async fn test_prefers_first_healthy_backend() {
        let a = Arc::new(MockBackend::echo("a"));
        let b = Arc::new(MockBackend::echo("b"));
        let (selector, _health) = selector_with(vec![a, b], HealthConfig::default());

        let selected = selector.select(&HashSet::new()).await.unwrap();
        assert_eq!(selected.id(), "a");
    }

    #[tokio::test]
    async fn test_honors_exclusions() {
        let a = Arc::new(MockBackend::echo("a"));
        let b = Arc::new(MockBackend::echo("b"));
        let (selector, _health) = selector_with(vec![a, b], HealthConfig::default());

        let exclude: HashSet<String> = ["a".to_string()].into_iter().collect();
        let selected = selector.select(&exclude).await.unwrap();
        assert_eq!(selected.id(), "b");
    }

    #[tokio::test]
    async fn test_degraded_backend_used_after_healthy() {
        let a = Arc::new(MockBackend::echo("a"));
        let b = Arc::new(MockBackend::echo("b"));
        let (selector, health) = selector_with(vec![a, b], HealthConfig::default());

        for _ in 0..3 {
            health.record_failure("a");
        }

        let selected = selector.select(&HashSet::new()).await.unwrap();
        assert_eq!(selected.id(), "b");

        // With b excluded, degraded a is still usable.
        let exclude: HashSet<String> = ["b".to_string()].into_iter().collect();
        let selected = selector.select(&exclude).await.unwrap();
        assert_eq!(selected.id(), "a");
    }

    #[tokio::test]
    async fn test_unavailable_backend_recovered_through_probe() {
        let a = Arc::new(MockBackend::echo("a"));
        let probe_counter = a.clone();
        let (selector, health) = selector_with(vec![a], HealthConfig::default());

        for _ in 0..6 {
            health.record_failure("a");
        }
        assert_eq!(health.state("a"), Some(BackendState::Unavailable));

        let selected = selector.select(&HashSet::new()).await.unwrap();
        assert_eq!(selected.id(), "a");
        assert_eq!(probe_counter.probes(), 1);
        assert_eq!(health.state("a"), Some(BackendState::Healthy));
    }

    #[tokio::test]
    async fn test_none_when_probe_fails_and_cooldown_holds() {
        let a = Arc::new(MockBackend::echo("a"));
        a.set_probe_ok(false);
        let config = HealthConfig {
            probe_cooldown_secs: 3600,
            ..HealthConfig::default()
        };
        let (selector, health) = selector_with(vec![a], config);

        for _ in 0..6 {
            health.record_failure("a");
        }

        assert!(selector.select(&HashSet::new()).await.is_none());
        // Second call finds the probe slot closed.
        assert!(selector.select(&HashSet::new()).await.is_none());
        assert_eq!(health.state("a"), Some(BackendState::Unavailable));
    }

    #[tokio::test]
    async fn test_none_when_all_excluded() {
        let a = Arc::new(MockBackend::echo("a"));
        let (selector, _health) = selector_with(vec![a], HealthConfig::default());

        let exclude: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert!(selector.select(&exclude).await.is_none());
    }
}
