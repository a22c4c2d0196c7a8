//! Read-only view of coordinator state, for inspection

use chrono::{DateTime, Utc};
use corral_types::{
    AgentId, AgentState, FrameworkId, FrameworkState, Offer, Resources, Task,
};
use serde::{Deserialize, Serialize};

/// Point-in-time copy of everything the coordinator tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Whether this coordinator still holds leadership
    pub leader: bool,

    pub taken_at: DateTime<Utc>,

    pub agents: Vec<AgentSnapshot>,

    pub frameworks: Vec<FrameworkSnapshot>,

    pub completed_frameworks: Vec<FrameworkSnapshot>,

    /// Outstanding offers
    pub offers: Vec<Offer>,

    /// Tasks whose framework has not reconnected since failover
    pub orphan_tasks: Vec<Task>,

    /// Frameworks known only through orphan tasks
    pub unregistered_frameworks: Vec<FrameworkId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub hostname: String,
    pub incarnation: u64,
    pub state: AgentState,
    pub active: bool,
    pub resources: Resources,
    pub offered: Resources,
    pub used: Resources,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkSnapshot {
    pub id: FrameworkId,
    pub name: Option<String>,
    pub user: Option<String>,
    pub state: FrameworkState,
    pub tasks: Vec<Task>,
    pub completed_tasks: Vec<Task>,
    pub offers: Vec<Offer>,
}

impl StateSnapshot {
    pub fn agent(&self, id: &AgentId) -> Option<&AgentSnapshot> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn framework(&self, id: &FrameworkId) -> Option<&FrameworkSnapshot> {
        self.frameworks.iter().find(|f| &f.id == id)
    }

    pub fn active_agents(&self) -> usize {
        self.agents.iter().filter(|a| a.active).count()
    }
}
