//! In-memory registry
//!
//! Suitable for development and testing. Failures can be injected to
//! exercise the coordinator's leadership-loss path.

use crate::error::{RegistryError, Result};
use crate::registry::Registry;
use async_trait::async_trait;
use corral_types::{AgentId, AgentInfo};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// In-memory agent registry
pub struct InMemoryRegistry {
    agents: DashMap<AgentId, AgentInfo>,
    failures_pending: AtomicUsize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            failures_pending: AtomicUsize::new(0),
        }
    }

    /// Seed the registry, as if the agents had been admitted by a previous leader
    pub fn with_agents(agents: impl IntoIterator<Item = AgentInfo>) -> Self {
        let registry = Self::new();
        for info in agents {
            registry.agents.insert(info.id.clone(), info);
        }
        registry
    }

    /// Make the next `count` operations fail with a storage error
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentInfo> {
        self.agents.get(id).map(|a| a.clone())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn check_failure(&self) -> Result<()> {
        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RegistryError::Storage("injected failure".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn admit_agent(&self, info: AgentInfo) -> Result<bool> {
        self.check_failure()?;

        if self.agents.contains_key(&info.id) {
            return Ok(false);
        }

        debug!(agent_id = %info.id, hostname = %info.hostname, "Admitting agent");
        self.agents.insert(info.id.clone(), info);
        Ok(true)
    }

    async fn readmit_agent(&self, info: AgentInfo) -> Result<bool> {
        self.check_failure()?;

        match self.agents.get_mut(&info.id) {
            Some(mut existing) => {
                debug!(agent_id = %info.id, incarnation = info.incarnation, "Readmitting agent");
                *existing = info;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_agent(&self, id: &AgentId) -> Result<bool> {
        self.check_failure()?;
        Ok(self.agents.remove(id).is_some())
    }

    async fn recover_agents(&self) -> Result<Vec<AgentInfo>> {
        self.check_failure()?;
        let mut agents: Vec<AgentInfo> = self.agents.iter().map(|a| a.value().clone()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }
}
