//! Resource ledger
//!
//! Per agent bookkeeping of total, offered and used resources. Every
//! mutation re-checks `used + offered <= total` and leaves the entry
//! untouched when the check fails. Ranges and sets combine by union, so a
//! claim must also fit what is still available: the same port can never be
//! offered or used twice.

use crate::error::{CoordinatorError, Result};
use corral_types::{AgentId, Resources};
use serde::Serialize;
use std::collections::BTreeMap;

/// One agent's accounts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentLedger {
    pub total: Resources,
    pub offered: Resources,
    pub used: Resources,
}

impl AgentLedger {
    fn new(total: Resources) -> Self {
        Self {
            total,
            offered: Resources::new(),
            used: Resources::new(),
        }
    }

    /// Resources neither offered nor used
    pub fn available(&self) -> Result<Resources> {
        Ok(self
            .total
            .checked_sub(&self.used)?
            .checked_sub(&self.offered)?)
    }

    /// Offered must fit in what `used` leaves of `total`, which also
    /// rules out a port or set item being both used and offered.
    fn holds(&self) -> bool {
        match self.total.checked_sub(&self.used) {
            Ok(free) => free.contains(&self.offered),
            Err(_) => false,
        }
    }

    fn claim(&self, agent_id: &AgentId, resources: &Resources) -> Result<()> {
        let available = self.available()?;
        if available.contains(resources) {
            Ok(())
        } else {
            Err(CoordinatorError::invariant(format!(
                "{}: {} is not within available {}",
                agent_id, resources, available
            )))
        }
    }
}

/// Ledger over all known agents
#[derive(Debug, Default)]
pub struct ResourceLedger {
    agents: BTreeMap<AgentId, AgentLedger>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agent(&mut self, agent_id: &AgentId, total: Resources) {
        self.agents
            .entry(agent_id.clone())
            .or_insert_with(|| AgentLedger::new(total));
    }

    pub fn remove_agent(&mut self, agent_id: &AgentId) -> Option<AgentLedger> {
        self.agents.remove(agent_id)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<&AgentLedger> {
        self.agents.get(agent_id)
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentId, &AgentLedger)> {
        self.agents.iter()
    }

    /// Mark resources offered
    pub fn reserve_offer(&mut self, agent_id: &AgentId, resources: &Resources) -> Result<()> {
        self.update(agent_id, |entry| {
            entry.claim(agent_id, resources)?;
            entry.offered.merge(resources).map_err(Into::into)
        })
    }

    /// Return offered resources to the free pool
    pub fn release_offer(&mut self, agent_id: &AgentId, resources: &Resources) -> Result<()> {
        self.update(agent_id, |entry| {
            entry.offered = entry.offered.checked_sub(resources)?;
            Ok(())
        })
    }

    /// Mark resources used by a task
    pub fn add_used(&mut self, agent_id: &AgentId, resources: &Resources) -> Result<()> {
        self.update(agent_id, |entry| {
            entry.claim(agent_id, resources)?;
            entry.used.merge(resources).map_err(Into::into)
        })
    }

    /// Return a task's resources to the free pool
    pub fn release_used(&mut self, agent_id: &AgentId, resources: &Resources) -> Result<()> {
        self.update(agent_id, |entry| {
            entry.used = entry.used.checked_sub(resources)?;
            Ok(())
        })
    }

    /// Every agent satisfies `used + offered <= total`
    pub fn holds(&self) -> bool {
        self.agents.values().all(AgentLedger::holds)
    }

    fn update<F>(&mut self, agent_id: &AgentId, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut AgentLedger) -> Result<()>,
    {
        let entry = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.clone()))?;

        let mut next = entry.clone();
        mutate(&mut next)?;
        if !next.holds() {
            return Err(CoordinatorError::invariant(format!(
                "{}: used {} + offered {} exceeds total {}",
                agent_id, next.used, next.offered, next.total
            )));
        }
        *entry = next;
        Ok(())
    }
}
