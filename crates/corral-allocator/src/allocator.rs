//! Allocator trait

use corral_types::{AgentId, Filters, FrameworkId, Resources};
use std::collections::BTreeSet;
use std::fmt::Debug;

/// A slice of one agent's resources earmarked for one framework
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    pub resources: Resources,
}

/// Resource allocation policy
pub trait Allocator: Send + Debug {
    // ========== Frameworks ==========

    fn add_framework(&mut self, framework_id: &FrameworkId);

    fn remove_framework(&mut self, framework_id: &FrameworkId);

    fn activate_framework(&mut self, framework_id: &FrameworkId);

    fn deactivate_framework(&mut self, framework_id: &FrameworkId);

    /// Drop every refusal filter the framework holds
    fn revive_offers(&mut self, framework_id: &FrameworkId);

    // ========== Agents ==========

    /// Start tracking an agent. `used` is what its existing tasks consume.
    fn add_agent(&mut self, agent_id: &AgentId, hostname: &str, total: &Resources, used: &Resources);

    fn remove_agent(&mut self, agent_id: &AgentId);

    fn activate_agent(&mut self, agent_id: &AgentId);

    fn deactivate_agent(&mut self, agent_id: &AgentId);

    /// Replace the hostname whitelist. `None` accepts every host.
    fn update_whitelist(&mut self, whitelist: Option<BTreeSet<String>>);

    // ========== Resources ==========

    /// Return resources to the agent's free pool. With `filters`, the
    /// framework is not offered those resources again until the refusal
    /// elapses.
    fn recover_resources(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &Resources,
        filters: Option<&Filters>,
    );

    /// Allocations of one agent's free resources
    fn offer_resources(&mut self, agent_id: &AgentId) -> Vec<(FrameworkId, Resources)>;

    /// Allocations across every agent, for one allocation cycle
    fn allocate(&mut self) -> Vec<Allocation>;
}
