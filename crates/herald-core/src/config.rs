//! Herald configuration system.
//!
//! Explicit struct with named, typed fields; defaults resolved once at
//! load time via serde field defaults. No merging of loose maps.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HeraldError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeraldConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl HeraldConfig {
    /// Load config from the default path (~/.herald/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HeraldError::Config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| HeraldError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| HeraldError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// The Herald home directory (~/.herald).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".herald")
    }
}

/// Content source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub api_key: String,
    /// Channel/feed identifier watched for new items.
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Minimum spacing between upstream fetches, cache hit or not.
    #[serde(default = "default_min_fetch_interval_secs")]
    pub min_fetch_interval_secs: u64,
    /// Upper bound on a single upstream fetch.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_cache_ttl_secs() -> u64 { 300 }
fn default_min_fetch_interval_secs() -> u64 { 10 }
fn default_fetch_timeout_secs() -> u64 { 30 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            channel_id: String::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            min_fetch_interval_secs: default_min_fetch_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl SourceConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn min_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.min_fetch_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Transport adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
}

/// Reconnect policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive failures before the manager gives up and goes Failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 { 5000 }
fn default_max_delay_ms() -> u64 { 60000 }
fn default_max_attempts() -> u32 { 5 }

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Outbound pacing configuration. The delays keep the broadcast from
/// looking automated to the transport's abuse detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_per_batch")]
    pub max_per_batch: usize,
    #[serde(default = "default_delay_between_recipients_ms")]
    pub delay_between_recipients_ms: u64,
    #[serde(default = "default_delay_between_batches_ms")]
    pub delay_between_batches_ms: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_max_per_batch() -> usize { 10 }
fn default_delay_between_recipients_ms() -> u64 { 3000 }
fn default_delay_between_batches_ms() -> u64 { 10000 }
fn default_send_timeout_secs() -> u64 { 30 }

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_per_batch: default_max_per_batch(),
            delay_between_recipients_ms: default_delay_between_recipients_ms(),
            delay_between_batches_ms: default_delay_between_batches_ms(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl BatchConfig {
    pub fn delay_between_recipients(&self) -> Duration {
        Duration::from_millis(self.delay_between_recipients_ms)
    }

    pub fn delay_between_batches(&self) -> Duration {
        Duration::from_millis(self.delay_between_batches_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// Stale-lock recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Locks older than this are eligible for forced expiry.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_stale_after_secs() -> u64 { 45 }
fn default_sweep_interval_secs() -> u64 { 15 }

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Built-in daily broadcast times, registered at startup and
    /// protected from removal.
    #[serde(default = "default_standard_times")]
    pub standard_times: Vec<String>,
}

fn default_tick_interval_secs() -> u64 { 20 }
fn default_standard_times() -> Vec<String> {
    vec!["0 8 * * *".into(), "0 12 * * *".into(), "0 18 * * *".into()]
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            standard_times: default_standard_times(),
        }
    }
}

/// State store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding state.json.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_state_dir() -> String { "~/.herald".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

impl StoreConfig {
    /// Resolve the state directory, expanding a leading tilde.
    pub fn resolved_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state_dir).into_owned())
    }
}
