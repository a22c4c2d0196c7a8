//! Configuration for corral-daemon

use crate::error::{DaemonError, DaemonResult};
use corral_coordinator::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Inspection API server
    #[serde(default)]
    pub server: ServerConfig,

    /// Coordinator tunables
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// Hostname whitelist
    #[serde(default)]
    pub whitelist: WhitelistConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 5050)),
            enable_cors: true,
        }
    }
}

/// Coordinator settings, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_offer_timeout")]
    pub offer_timeout_secs: u64,

    #[serde(default = "default_reregister_timeout")]
    pub agent_reregister_timeout_secs: u64,

    /// Refusal applied to declines without a filter
    #[serde(default = "default_refuse")]
    pub default_refuse_secs: f64,

    #[serde(default = "default_allocation_interval")]
    pub allocation_interval_secs: f64,

    #[serde(default = "default_kill_grace_period")]
    pub kill_grace_period_secs: u64,

    #[serde(default = "default_max_completed_tasks")]
    pub max_completed_tasks_per_framework: usize,

    #[serde(default = "default_max_completed_frameworks")]
    pub max_completed_frameworks: usize,

    #[serde(default = "default_true")]
    pub registry_strict: bool,

    #[serde(default = "default_filtered_resources")]
    pub filtered_resource_names: Vec<String>,

    /// Capacity of the coordinator's event queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            offer_timeout_secs: default_offer_timeout(),
            agent_reregister_timeout_secs: default_reregister_timeout(),
            default_refuse_secs: default_refuse(),
            allocation_interval_secs: default_allocation_interval(),
            kill_grace_period_secs: default_kill_grace_period(),
            max_completed_tasks_per_framework: default_max_completed_tasks(),
            max_completed_frameworks: default_max_completed_frameworks(),
            registry_strict: true,
            filtered_resource_names: default_filtered_resources(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl CoordinatorSection {
    /// Convert to the coordinator's own configuration, validating it
    pub fn to_coordinator_config(&self) -> DaemonResult<CoordinatorConfig> {
        let config = CoordinatorConfig {
            offer_timeout: Duration::from_secs(self.offer_timeout_secs),
            agent_reregister_timeout: Duration::from_secs(self.agent_reregister_timeout_secs),
            default_refuse_duration: seconds("default_refuse_secs", self.default_refuse_secs)?,
            allocation_interval: seconds("allocation_interval_secs", self.allocation_interval_secs)?,
            kill_grace_period: Duration::from_secs(self.kill_grace_period_secs),
            max_completed_tasks_per_framework: self.max_completed_tasks_per_framework,
            max_completed_frameworks: self.max_completed_frameworks,
            registry_strict: self.registry_strict,
            filtered_resource_names: self.filtered_resource_names.clone(),
        };
        config.validate().map_err(DaemonError::Config)?;
        if self.channel_capacity == 0 {
            return Err(DaemonError::Config("channel_capacity must be nonzero".into()));
        }
        Ok(config)
    }
}

fn seconds(name: &str, value: f64) -> DaemonResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| DaemonError::Config(format!("Invalid {}: {}", name, e)))
}

/// Whitelist configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistConfig {
    /// File listing one hostname per line, or `*` to accept every host
    #[serde(default = "default_whitelist_path")]
    pub path: String,

    /// How often the file is re-read
    #[serde(default = "default_whitelist_interval")]
    pub poll_interval_secs: u64,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self {
            path: default_whitelist_path(),
            poll_interval_secs: default_whitelist_interval(),
        }
    }
}

impl WhitelistConfig {
    /// The file to watch, if any
    pub fn file(&self) -> Option<&str> {
        match self.path.trim() {
            "" | "*" => None,
            path => Some(path),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_offer_timeout() -> u64 {
    30
}

fn default_reregister_timeout() -> u64 {
    600
}

fn default_refuse() -> f64 {
    5.0
}

fn default_allocation_interval() -> f64 {
    1.0
}

fn default_kill_grace_period() -> u64 {
    5
}

fn default_max_completed_tasks() -> usize {
    1000
}

fn default_max_completed_frameworks() -> usize {
    50
}

fn default_filtered_resources() -> Vec<String> {
    vec!["ephemeral_ports".to_string()]
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_whitelist_path() -> String {
    "*".to_string()
}

fn default_whitelist_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `CORRAL_`-prefixed environment variables. Nested keys use a double
    /// underscore, e.g. `CORRAL_COORDINATOR__OFFER_TIMEOUT_SECS=60`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CORRAL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
