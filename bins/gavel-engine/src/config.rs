// Engine configuration management for the gavel engine
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// The closed set of backend adapter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Primary,
    Fallback,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub kind: BackendKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl BackendConfig {
    pub fn require_base_url(&self) -> Result<&str> {
        self.base_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("backend '{}' requires a base_url", self.id))
    }
}

/// Cross-backend retry budget for a single test case.
/// Bounded by construction - never unbounded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Distinct backends tried per test case.
    pub max_backends: u32,
    /// Retries on the same backend after its first failed call.
    pub retries_per_backend: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_backends: 2,
            retries_per_backend: 1,
        }
    }
}

impl RetryConfig {
    /// Calls allowed against one backend before moving on.
    pub fn calls_per_backend(&self) -> u32 {
        1 + self.retries_per_backend
    }
}

/// Circuit-breaker thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures before Healthy -> Degraded.
    pub degrade_after: u32,
    /// Consecutive failures since entering Degraded before Unavailable.
    pub unavailable_after: u32,
    /// Minimum interval between probes of an unavailable backend.
    pub probe_cooldown_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degrade_after: 3,
            unavailable_after: 3,
            probe_cooldown_secs: 30,
        }
    }
}

impl HealthConfig {
    pub fn probe_cooldown(&self) -> Duration {
        Duration::from_secs(self.probe_cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Worker pool size within one submission.
    pub per_submission: usize,
    /// Total concurrent backend calls across all submissions.
    pub global_backend_calls: usize,
    /// Submissions evaluated concurrently by one engine process.
    pub max_submissions: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            per_submission: 8,
            global_backend_calls: 32,
            max_submissions: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Per-call grace on top of the problem time limit, capped.
    pub call_grace_cap_ms: u64,
    /// Umbrella deadline = factor x sum of per-test time limits.
    pub umbrella_factor: u64,
    /// Hard cap on the umbrella deadline.
    pub umbrella_cap_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            call_grace_cap_ms: 10_000,
            umbrella_factor: 2,
            umbrella_cap_ms: 120_000,
        }
    }
}

impl DeadlineConfig {
    /// Deadline for a single backend call: twice the time limit, but
    /// never more than limit + grace cap.
    pub fn call_deadline(&self, time_limit_ms: u64) -> Duration {
        let ms = (time_limit_ms * 2).min(time_limit_ms + self.call_grace_cap_ms);
        Duration::from_millis(ms)
    }

    /// Submission-wide umbrella deadline.
    pub fn umbrella_deadline(&self, per_test_limits_sum_ms: u64) -> Duration {
        let ms = (per_test_limits_sum_ms * self.umbrella_factor).min(self.umbrella_cap_ms);
        // A zero-test problem still gets a non-zero window.
        Duration::from_millis(ms.max(1_000))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub deadlines: DeadlineConfig,
}

impl EngineConfig {
    /// Load engine configuration from a JSON file.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Engine config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("Failed to read engine config")?;
        let config: EngineConfig =
            serde_json::from_str(&content).context("Failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load with the default path (config/engine.json), overridable via
    /// the GAVEL_CONFIG environment variable.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("GAVEL_CONFIG").unwrap_or_else(|_| "config/engine.json".to_string());
        Self::load(Path::new(&path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("At least one backend must be configured");
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.id.as_str()) {
                bail!("Duplicate backend id: {}", backend.id);
            }
            if backend.kind != BackendKind::Mock {
                backend.require_base_url()?;
            }
        }

        if self.retry.max_backends == 0 {
            bail!("retry.max_backends must be at least 1");
        }
        if self.concurrency.per_submission == 0 || self.concurrency.global_backend_calls == 0 {
            bail!("concurrency limits must be at least 1");
        }

        Ok(())
    }

    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id.clone()).collect()
    }
}
