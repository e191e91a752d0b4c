use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_SECS: u64 = 60; // one sweep per minute
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 120;
pub const DEFAULT_SUBMISSION_MARGIN_SECS: u64 = 120;
pub const DEFAULT_START_TIME: &str = "22:00:00";
pub const DEFAULT_TIME_ZONE: &str = "UTC";
pub const DEFAULT_EXECUTOR_TIMEOUT_SECS: u64 = 10;

/// Top-level config (oncebuild.toml + ONCEBUILD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OncebuildConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Sweep worker timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between sweep ticks. Ticks are aligned to multiples of this
    /// period (the default lands every tick on `:00`).
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Maximum overrun past `fire_at` that still counts as on time.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// How far in the past a newly submitted `fire_at` may lie before the
    /// request is rejected.
    #[serde(default = "default_submission_margin_secs")]
    pub submission_margin_secs: u64,
}

impl SchedulerConfig {
    pub fn tick_period(&self) -> Duration {
        // A zero period would spin the worker loop.
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn submission_margin(&self) -> Duration {
        Duration::from_secs(self.submission_margin_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            submission_margin_secs: DEFAULT_SUBMISSION_MARGIN_SECS,
        }
    }
}

/// Which snapshot format backs the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// A single JSON document, replaced atomically on every save.
    #[default]
    Json,
    /// A SQLite file whose table is rewritten in one transaction per save.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Snapshot file path. Must not be shared between two running processes.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

/// Defaults offered to callers that do not supply a fire time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Wall-clock time of day, e.g. `"22:00:00"` or `"10:30 PM"`.
    #[serde(default = "default_start_time")]
    pub start_time: String,
    /// `UTC`, `local`, or a fixed offset such as `+02:00`.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            time_zone: default_time_zone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Downstream execution service. When `base_url` is unset, fired builds are
/// only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub base_url: Option<String>,
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: DEFAULT_EXECUTOR_TIMEOUT_SECS,
        }
    }
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_grace_period_secs() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}
fn default_submission_margin_secs() -> u64 {
    DEFAULT_SUBMISSION_MARGIN_SECS
}
fn default_start_time() -> String {
    DEFAULT_START_TIME.to_string()
}
fn default_time_zone() -> String {
    DEFAULT_TIME_ZONE.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_executor_timeout_secs() -> u64 {
    DEFAULT_EXECUTOR_TIMEOUT_SECS
}
fn default_storage_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.oncebuild/scheduled_builds.json", home)
}

impl OncebuildConfig {
    /// Load config from a TOML file with ONCEBUILD_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `ONCEBUILD_SCHEDULER__GRACE_PERIOD_SECS=300`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: OncebuildConfig = Figment::from(Serialized::defaults(OncebuildConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ONCEBUILD_").split("__"))
            .extract()
            .map_err(|e| crate::error::OncebuildError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.oncebuild/oncebuild.toml", home)
}
