//! Agent directory
//!
//! Liveness state of every agent known to this coordinator, plus the ids of
//! agents removed in strict mode, which are refused if they ever come back.

use crate::error::{CoordinatorError, Result};
use chrono::{DateTime, Utc};
use corral_types::{AgentId, AgentInfo, AgentState};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// The coordinator's record of an agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub info: AgentInfo,

    pub state: AgentState,

    /// Known only from the registry; has not reregistered with this coordinator
    pub recovered: bool,

    /// When this coordinator first learned of the agent
    pub registered_at: DateTime<Utc>,

    /// Last registration or reregistration
    pub reregistered_at: Option<DateTime<Utc>>,
}

impl AgentRecord {
    /// Whether tasks on this agent may still surface through reregistration
    pub fn is_reconciling(&self) -> bool {
        match self.state {
            AgentState::Reregistering => true,
            AgentState::Disconnected => self.recovered,
            AgentState::Registering | AgentState::Active | AgentState::Removed => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct AgentDirectory {
    agents: BTreeMap<AgentId, AgentRecord>,
    removed: BTreeSet<AgentId>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// First contact from an agent; admission is still in flight
    pub fn register(&mut self, info: AgentInfo, now: DateTime<Utc>) {
        self.agents.insert(
            info.id.clone(),
            AgentRecord {
                info,
                state: AgentState::Registering,
                recovered: false,
                registered_at: now,
                reregistered_at: None,
            },
        );
    }

    /// An agent read back from the registry after failover
    pub fn recover(&mut self, info: AgentInfo, now: DateTime<Utc>) {
        self.agents.insert(
            info.id.clone(),
            AgentRecord {
                info,
                state: AgentState::Disconnected,
                recovered: true,
                registered_at: now,
                reregistered_at: None,
            },
        );
    }

    pub fn get(&self, id: &AgentId) -> Option<&AgentRecord> {
        self.agents.get(id)
    }

    pub fn get_mut(&mut self, id: &AgentId) -> Option<&mut AgentRecord> {
        self.agents.get_mut(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    pub fn state(&self, id: &AgentId) -> Option<AgentState> {
        self.agents.get(id).map(|a| a.state)
    }

    pub fn is_active(&self, id: &AgentId) -> bool {
        self.state(id).map(|s| s.is_active()).unwrap_or(false)
    }

    pub fn transition(&mut self, id: &AgentId, next: AgentState) -> Result<()> {
        let record = self
            .agents
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(id.clone()))?;
        record.state.transition(next)?;
        Ok(())
    }

    /// Drop the record. With `remember`, later registrations under this id
    /// are refused.
    pub fn forget(&mut self, id: &AgentId, remember: bool) -> Option<AgentRecord> {
        if remember {
            self.removed.insert(id.clone());
        }
        self.agents.remove(id)
    }

    pub fn is_removed(&self, id: &AgentId) -> bool {
        self.removed.contains(id)
    }

    /// Whether any agent is mid-reregistration
    pub fn reconciling(&self) -> bool {
        self.agents.values().any(AgentRecord::is_reconciling)
    }

    pub fn count(&self, state: AgentState) -> usize {
        self.agents.values().filter(|a| a.state == state).count()
    }
}
