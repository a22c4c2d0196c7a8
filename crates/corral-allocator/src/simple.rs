//! First-fit reference allocator
//!
//! Each cycle offers every active, whitelisted agent's entire free pool to the
//! next framework (in rotation) that has not refused it.

use crate::allocator::{Allocation, Allocator};
use chrono::{DateTime, Utc};
use corral_types::{AgentId, Clock, Filters, FrameworkId, Resources};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
struct AgentSlot {
    hostname: String,
    total: Resources,
    /// Offered or used
    allocated: Resources,
    active: bool,
}

#[derive(Debug)]
struct Refusal {
    agent_id: AgentId,
    resources: Resources,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct FrameworkSlot {
    active: bool,
    refusals: Vec<Refusal>,
}

impl FrameworkSlot {
    /// A refusal applies when the candidate is no more than what was refused
    fn refuses(&self, agent_id: &AgentId, candidate: &Resources) -> bool {
        self.refusals
            .iter()
            .any(|r| &r.agent_id == agent_id && r.resources.contains(candidate))
    }
}

/// First-fit allocator
#[derive(Debug)]
pub struct SimpleAllocator {
    clock: Arc<dyn Clock>,
    agents: BTreeMap<AgentId, AgentSlot>,
    frameworks: BTreeMap<FrameworkId, FrameworkSlot>,
    whitelist: Option<BTreeSet<String>>,
    rotation: usize,
}

impl SimpleAllocator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            agents: BTreeMap::new(),
            frameworks: BTreeMap::new(),
            whitelist: None,
            rotation: 0,
        }
    }

    fn whitelisted(&self, hostname: &str) -> bool {
        match &self.whitelist {
            Some(hosts) => hosts.contains(hostname),
            None => true,
        }
    }

    fn expire_refusals(&mut self, now: DateTime<Utc>) {
        for slot in self.frameworks.values_mut() {
            slot.refusals.retain(|r| r.expires_at > now);
        }
    }

    /// Active frameworks, starting at the current rotation point
    fn candidates(&self) -> Vec<FrameworkId> {
        let active: Vec<FrameworkId> = self
            .frameworks
            .iter()
            .filter(|(_, slot)| slot.active)
            .map(|(id, _)| id.clone())
            .collect();
        if active.is_empty() {
            return active;
        }
        let start = self.rotation % active.len();
        active[start..]
            .iter()
            .chain(active[..start].iter())
            .cloned()
            .collect()
    }
}

impl Allocator for SimpleAllocator {
    fn add_framework(&mut self, framework_id: &FrameworkId) {
        let slot = self.frameworks.entry(framework_id.clone()).or_default();
        slot.active = true;
    }

    fn remove_framework(&mut self, framework_id: &FrameworkId) {
        self.frameworks.remove(framework_id);
    }

    fn activate_framework(&mut self, framework_id: &FrameworkId) {
        if let Some(slot) = self.frameworks.get_mut(framework_id) {
            slot.active = true;
        }
    }

    fn deactivate_framework(&mut self, framework_id: &FrameworkId) {
        if let Some(slot) = self.frameworks.get_mut(framework_id) {
            slot.active = false;
        }
    }

    fn revive_offers(&mut self, framework_id: &FrameworkId) {
        if let Some(slot) = self.frameworks.get_mut(framework_id) {
            slot.refusals.clear();
        }
    }

    fn add_agent(&mut self, agent_id: &AgentId, hostname: &str, total: &Resources, used: &Resources) {
        self.agents.insert(
            agent_id.clone(),
            AgentSlot {
                hostname: hostname.to_string(),
                total: total.clone(),
                allocated: used.clone(),
                active: true,
            },
        );
    }

    fn remove_agent(&mut self, agent_id: &AgentId) {
        self.agents.remove(agent_id);
        for slot in self.frameworks.values_mut() {
            slot.refusals.retain(|r| &r.agent_id != agent_id);
        }
    }

    fn activate_agent(&mut self, agent_id: &AgentId) {
        if let Some(slot) = self.agents.get_mut(agent_id) {
            slot.active = true;
        }
    }

    fn deactivate_agent(&mut self, agent_id: &AgentId) {
        if let Some(slot) = self.agents.get_mut(agent_id) {
            slot.active = false;
        }
    }

    fn update_whitelist(&mut self, whitelist: Option<BTreeSet<String>>) {
        self.whitelist = whitelist;
    }

    fn recover_resources(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &Resources,
        filters: Option<&Filters>,
    ) {
        if resources.is_empty() {
            return;
        }

        let Some(agent) = self.agents.get_mut(agent_id) else {
            debug!(agent_id = %agent_id, "Recovering resources of an untracked agent");
            return;
        };

        match agent.allocated.checked_sub(resources) {
            Ok(remaining) => agent.allocated = remaining,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Recovered more than was allocated");
                return;
            }
        }

        let Some(filters) = filters else {
            return;
        };
        let refuse = filters.refuse_duration(Duration::ZERO);
        if refuse.is_zero() {
            return;
        }
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        let expires_at = chrono::Duration::from_std(refuse)
            .ok()
            .and_then(|d| self.clock.now().checked_add_signed(d));
        if let Some(expires_at) = expires_at {
            debug!(
                framework_id = %framework_id,
                agent_id = %agent_id,
                refuse_secs = refuse.as_secs_f64(),
                "Installing refusal filter"
            );
            framework.refusals.push(Refusal {
                agent_id: agent_id.clone(),
                resources: resources.clone(),
                expires_at,
            });
        }
    }

    fn offer_resources(&mut self, agent_id: &AgentId) -> Vec<(FrameworkId, Resources)> {
        let now = self.clock.now();
        self.expire_refusals(now);

        let available = match self.agents.get(agent_id) {
            Some(agent) if agent.active && self.whitelisted(&agent.hostname) => {
                match agent.total.checked_sub(&agent.allocated) {
                    Ok(available) => available,
                    Err(e) => {
                        warn!(agent_id = %agent_id, error = %e, "Agent over-allocated");
                        return Vec::new();
                    }
                }
            }
            _ => return Vec::new(),
        };
        if available.is_empty() {
            return Vec::new();
        }

        let chosen = self.candidates().into_iter().find(|fw| {
            self.frameworks
                .get(fw)
                .map(|slot| !slot.refuses(agent_id, &available))
                .unwrap_or(false)
        });
        let Some(framework_id) = chosen else {
            return Vec::new();
        };

        let Some(agent) = self.agents.get_mut(agent_id) else {
            return Vec::new();
        };
        if let Err(e) = agent.allocated.merge(&available) {
            warn!(agent_id = %agent_id, error = %e, "Failed to mark resources allocated");
            return Vec::new();
        }
        self.rotation = self.rotation.wrapping_add(1);

        vec![(framework_id, available)]
    }

    fn allocate(&mut self) -> Vec<Allocation> {
        let agent_ids: Vec<AgentId> = self.agents.keys().cloned().collect();
        let mut allocations = Vec::new();
        for agent_id in agent_ids {
            for (framework_id, resources) in self.offer_resources(&agent_id) {
                allocations.push(Allocation {
                    framework_id,
                    agent_id: agent_id.clone(),
                    resources,
                });
            }
        }
        allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_types::ManualClock;

    fn setup() -> (Arc<ManualClock>, SimpleAllocator, AgentId, FrameworkId) {
        let clock = Arc::new(ManualClock::default());
        let mut allocator = SimpleAllocator::new(clock.clone());
        let agent = AgentId::new("a1");
        let framework = FrameworkId::new("f1");
        let total = Resources::new().with_scalar("cpus", 2.0).with_scalar("mem", 1024.0);
        allocator.add_agent(&agent, "host-1", &total, &Resources::new());
        allocator.add_framework(&framework);
        (clock, allocator, agent, framework)
    }

    #[test]
    fn test_offers_entire_free_pool_once() {
        let (_, mut allocator, agent, framework) = setup();

        let allocations = allocator.allocate();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].framework_id, framework);
        assert_eq!(allocations[0].agent_id, agent);
        assert_eq!(allocations[0].resources.cpus(), 2.0);

        assert!(allocator.allocate().is_empty());
    }

    #[test]
    fn test_recovered_resources_reoffered() {
        let (_, mut allocator, agent, framework) = setup();
        let offered = allocator.allocate().remove(0).resources;

        allocator.recover_resources(&framework, &agent, &offered, None);
        assert_eq!(allocator.allocate().len(), 1);
    }

    #[test]
    fn test_refusal_filter_until_expiry() {
        let (clock, mut allocator, agent, framework) = setup();
        let offered = allocator.allocate().remove(0).resources;

        let filters = Filters::refuse_for(Duration::from_secs(5));
        allocator.recover_resources(&framework, &agent, &offered, Some(&filters));
        assert!(allocator.allocate().is_empty());

        clock.advance(Duration::from_secs(6));
        assert_eq!(allocator.allocate().len(), 1);
    }

    #[test]
    fn test_refusal_goes_to_other_framework() {
        let (_, mut allocator, agent, f1) = setup();
        let f2 = FrameworkId::new("f2");
        allocator.add_framework(&f2);

        let first = allocator.allocate().remove(0);
        let filters = Filters::refuse_for(Duration::from_secs(60));
        allocator.recover_resources(&first.framework_id, &agent, &first.resources, Some(&filters));

        let second = allocator.allocate().remove(0);
        assert_ne!(second.framework_id, first.framework_id);
        assert!(second.framework_id == f1 || second.framework_id == f2);
    }

    #[test]
    fn test_revive_clears_refusals() {
        let (_, mut allocator, agent, framework) = setup();
        let offered = allocator.allocate().remove(0).resources;

        let filters = Filters::refuse_for(Duration::from_secs(60));
        allocator.recover_resources(&framework, &agent, &offered, Some(&filters));
        allocator.revive_offers(&framework);
        assert_eq!(allocator.allocate().len(), 1);
    }

    #[test]
    fn test_inactive_and_non_whitelisted_agents_skipped() {
        let (_, mut allocator, agent, _) = setup();

        allocator.deactivate_agent(&agent);
        assert!(allocator.allocate().is_empty());

        allocator.activate_agent(&agent);
        allocator.update_whitelist(Some(BTreeSet::from(["other".to_string()])));
        assert!(allocator.allocate().is_empty());

        allocator.update_whitelist(Some(BTreeSet::from(["host-1".to_string()])));
        assert_eq!(allocator.allocate().len(), 1);
    }

    #[test]
    fn test_used_resources_not_offered() {
        let clock = Arc::new(ManualClock::default());
        let mut allocator = SimpleAllocator::new(clock);
        let agent = AgentId::new("a1");
        let total = Resources::new().with_scalar("cpus", 4.0);
        let used = Resources::new().with_scalar("cpus", 3.0);
        allocator.add_agent(&agent, "host-1", &total, &used);
        allocator.add_framework(&FrameworkId::new("f1"));

        let allocations = allocator.allocate();
        assert_eq!(allocations[0].resources.cpus(), 1.0);
    }
}
