//! Coordinator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// How long an offer stays outstanding before it is rescinded.
    pub offer_timeout: Duration,

    /// How long a disconnected (or recovered) agent has to reregister
    /// before it is removed.
    pub agent_reregister_timeout: Duration,

    /// Refusal applied to declined resources when the framework supplies
    /// no filter. Must be nonzero.
    pub default_refuse_duration: Duration,

    /// Period of allocation cycles.
    pub allocation_interval: Duration,

    /// Grace period handed to agents when a framework is shut down.
    pub kill_grace_period: Duration,

    /// Bound on the per-framework history of archived tasks.
    pub max_completed_tasks_per_framework: usize,

    /// Bound on the history of torn-down frameworks.
    pub max_completed_frameworks: usize,

    /// In strict mode a removed agent is refused forever and every removal
    /// is announced to frameworks. Non-strict mode quietly removes recovered
    /// agents that never reregister and admits them again later.
    pub registry_strict: bool,

    /// Resources that are never offered to frameworks.
    pub filtered_resource_names: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            offer_timeout: Duration::from_secs(30),
            agent_reregister_timeout: Duration::from_secs(600),
            default_refuse_duration: Duration::from_secs(5),
            allocation_interval: Duration::from_secs(1),
            kill_grace_period: Duration::from_secs(5),
            max_completed_tasks_per_framework: 1000,
            max_completed_frameworks: 50,
            registry_strict: true,
            filtered_resource_names: vec!["ephemeral_ports".to_string()],
        }
    }
}

impl CoordinatorConfig {
    /// Reject settings the coordinator cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_refuse_duration.is_zero() {
            return Err("default_refuse_duration must be nonzero".into());
        }
        if self.offer_timeout.is_zero() {
            return Err("offer_timeout must be nonzero".into());
        }
        if self.allocation_interval.is_zero() {
            return Err("allocation_interval must be nonzero".into());
        }
        Ok(())
    }
}
