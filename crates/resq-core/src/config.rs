use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::key::OperationKey;
use crate::queue::{JsonFileStore, MemoryStore, QueueStore, SqliteStore, DEFAULT_NAMESPACE};
use crate::retry::RetryPolicy;

/// Default retry policy (`[retry]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the computed delay, at most 0.3.
    pub jitter_ratio: f64,
    /// Optional per-attempt timeout; absent means the transport's own timeouts apply.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_ratio: policy.jitter_ratio,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Validated policy built from these values.
    pub fn to_policy(&self) -> Result<RetryPolicy> {
        let policy = RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter_ratio: self.jitter_ratio,
            attempt_timeout: self.attempt_timeout_ms.map(Duration::from_millis),
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// Circuit breaker parameters (`[circuit]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cool_down_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        let d = BreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            cool_down_secs: d.cool_down.as_secs(),
        }
    }
}

/// Where the durable queue persists: SQLite (default), one JSON file per
/// namespace, or nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Sqlite,
    Json,
    Memory,
}

/// `[queue]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub namespace: String,
    pub backend: QueueBackend,
    /// Override for the store location (database file or JSON directory).
    pub path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            backend: QueueBackend::default(),
            path: None,
        }
    }
}

/// `[connectivity]`: HEAD probe used by `resq watch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// None disables probing; the network is then assumed online.
    pub probe_url: Option<String>,
    pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_interval_secs: 15,
        }
    }
}

/// Global configuration loaded from `~/.config/resq/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResqConfig {
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,
    pub queue: QueueConfig,
    pub connectivity: ConnectivityConfig,
    /// Per-operation-key retry overrides, e.g. `[policies."geocode_fallback"]`.
    pub policies: BTreeMap<String, RetryConfig>,
}

impl ResqConfig {
    /// Retry policy for `key`: its override if one exists, else `[retry]`.
    pub fn policy_for(&self, key: &OperationKey) -> Result<RetryPolicy> {
        match self.policies.get(key.as_str()) {
            Some(over) => over
                .to_policy()
                .with_context(|| format!("invalid [policies.\"{key}\"]")),
            None => self.retry.to_policy().context("invalid [retry]"),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.circuit.failure_threshold,
            cool_down: Duration::from_secs(self.circuit.cool_down_secs),
        }
    }

    /// Open the configured queue store.
    pub async fn open_store(&self) -> Result<Arc<dyn QueueStore>> {
        let store: Arc<dyn QueueStore> = match (self.queue.backend, &self.queue.path) {
            (QueueBackend::Sqlite, Some(path)) => Arc::new(SqliteStore::open_at(path).await?),
            (QueueBackend::Sqlite, None) => Arc::new(SqliteStore::open_default().await?),
            (QueueBackend::Json, Some(dir)) => Arc::new(JsonFileStore::new(dir.clone())),
            (QueueBackend::Json, None) => Arc::new(JsonFileStore::new(JsonFileStore::default_dir()?)),
            (QueueBackend::Memory, _) => {
                tracing::warn!("queue backend is memory; queued operations will not survive restart");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(store)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("resq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ResqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ResqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ResqConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
