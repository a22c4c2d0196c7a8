//! Agent types
//!
//! An agent contributes a fixed resource vector to the cluster. Its capacity
//! never changes in place: a different capacity means a new registration.

use crate::error::TransitionError;
use crate::{AgentId, Resources};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Durable description of an agent, as stored in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent identifier (assigned by the coordinator on first admission)
    pub id: AgentId,

    /// Hostname the agent runs on
    pub hostname: String,

    /// Total resources, including system-reserved ones
    pub resources: Resources,

    /// Process incarnation, bumped every time the agent process restarts
    pub incarnation: u64,
}

impl AgentInfo {
    pub fn new(hostname: impl Into<String>, resources: Resources) -> Self {
        Self {
            id: AgentId::generate(),
            hostname: hostname.into(),
            resources,
            incarnation: 0,
        }
    }

    pub fn with_id(mut self, id: AgentId) -> Self {
        self.id = id;
        self
    }

    pub fn with_incarnation(mut self, incarnation: u64) -> Self {
        self.incarnation = incarnation;
        self
    }
}

/// Agent liveness state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Admission to the registry is in flight
    Registering,

    /// Connected and eligible for offers
    Active,

    /// Connection lost (or recovered after failover); waiting for reregistration
    Disconnected,

    /// Reregistered, readmission to the registry is in flight
    Reregistering,

    /// Removed from the cluster; further registration attempts are refused
    Removed,
}

impl AgentState {
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        match self {
            Registering => matches!(next, Active | Removed),
            Active => matches!(next, Disconnected | Removed),
            Disconnected => matches!(next, Active | Reregistering | Removed),
            Reregistering => matches!(next, Active | Disconnected | Removed),
            Removed => false,
        }
    }

    pub fn transition(&mut self, next: AgentState) -> Result<(), TransitionError> {
        if !self.can_transition_to(next) {
            return Err(TransitionError::new("agent", *self, next));
        }
        *self = next;
        Ok(())
    }

    /// Whether the agent is connected and can receive offers
    pub fn is_active(&self) -> bool {
        matches!(self, AgentState::Active)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Registering => "REGISTERING",
            AgentState::Active => "ACTIVE",
            AgentState::Disconnected => "DISCONNECTED",
            AgentState::Reregistering => "REREGISTERING",
            AgentState::Removed => "REMOVED",
        };
        write!(f, "{}", s)
    }
}
