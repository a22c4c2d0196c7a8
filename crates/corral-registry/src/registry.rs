//! Registry trait

use crate::error::Result;
use async_trait::async_trait;
use corral_types::{AgentId, AgentInfo};

/// Durable store of admitted agents
#[async_trait]
pub trait Registry: Send + Sync {
    /// Admit a newly registered agent. `false` if the id is already admitted.
    async fn admit_agent(&self, info: AgentInfo) -> Result<bool>;

    /// Readmit a re-registering agent, storing its new incarnation.
    /// `false` if the registry no longer knows the agent.
    async fn readmit_agent(&self, info: AgentInfo) -> Result<bool>;

    /// Remove an agent. `false` if it was not present.
    async fn remove_agent(&self, id: &AgentId) -> Result<bool>;

    /// Every admitted agent, read once when a coordinator takes over
    async fn recover_agents(&self) -> Result<Vec<AgentInfo>>;
}
