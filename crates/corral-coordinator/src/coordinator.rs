//! Coordinator core
//!
//! A synchronous state machine. Each public method processes one event to
//! completion against the trackers and never performs I/O: messages for
//! frameworks and agents accumulate in an outbox, and durable writes are
//! queued as [`RegistryRequest`]s whose answers come back through
//! [`Coordinator::registry_completed`]. The actor in [`crate::actor`] drives
//! it; tests drive it directly with a manual clock.

use crate::agents::AgentDirectory;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::frameworks::{FrameworkDirectory, Registration};
use crate::ledger::ResourceLedger;
use crate::offers::OfferTracker;
use crate::snapshot::{AgentSnapshot, FrameworkSnapshot, StateSnapshot};
use crate::tasks::{StatusOutcome, TaskRegistry};
use crate::timers::{TimerKind, TimerQueue};
use chrono::{DateTime, Utc};
use corral_allocator::Allocator;
use corral_registry::RegistryError;
use corral_types::{
    AgentId, AgentInfo, AgentMessage, AgentState, Clock, Filters, FrameworkId, FrameworkInfo,
    FrameworkMessage, FrameworkState, Offer, OfferDisposition, OfferId, Outbound, RescindReason,
    Resources, StatusId, StatusReason, StatusUpdate, Task, TaskId, TaskInfo, TaskKey, TaskState,
    TaskStatus,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Correlates a registry request with its completion
pub type Ticket = u64;

/// A durable write the coordinator is waiting on
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryRequest {
    Admit(AgentInfo),
    Readmit(AgentInfo),
    Remove(AgentId),
}

#[derive(Debug)]
enum PendingOperation {
    /// First registration of a new agent
    Admit { agent_id: AgentId },
    /// Reregistration; the reported tasks are reconciled once confirmed
    Reregister {
        agent_id: AgentId,
        tasks: Vec<Task>,
        refuse_on_false: bool,
    },
    /// Removal after the reregistration timeout
    Remove { agent_id: AgentId, announce: bool },
}

impl PendingOperation {
    fn describe(&self) -> &'static str {
        match self {
            PendingOperation::Admit { .. } => "agent admission",
            PendingOperation::Reregister { .. } => "agent readmission",
            PendingOperation::Remove { .. } => "agent removal",
        }
    }
}

/// The coordination core
#[derive(Debug)]
pub struct Coordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    allocator: Box<dyn Allocator>,
    ledger: ResourceLedger,
    offers: OfferTracker,
    tasks: TaskRegistry,
    agents: AgentDirectory,
    frameworks: FrameworkDirectory,
    timers: TimerQueue,
    outbox: Vec<Outbound>,
    registry_requests: Vec<(Ticket, RegistryRequest)>,
    pending: BTreeMap<Ticket, PendingOperation>,
    next_ticket: Ticket,
    /// Set once leadership is relinquished
    deposed: Option<String>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
        allocator: Box<dyn Allocator>,
    ) -> Self {
        let tasks = TaskRegistry::new(config.max_completed_tasks_per_framework);
        let frameworks = FrameworkDirectory::new(config.max_completed_frameworks);
        Self {
            config,
            clock,
            allocator,
            ledger: ResourceLedger::new(),
            offers: OfferTracker::new(),
            tasks,
            agents: AgentDirectory::new(),
            frameworks,
            timers: TimerQueue::new(),
            outbox: Vec::new(),
            registry_requests: Vec::new(),
            pending: BTreeMap::new(),
            next_ticket: 0,
            deposed: None,
        }
    }

    // ========== Outputs ==========

    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_registry_requests(&mut self) -> Vec<(Ticket, RegistryRequest)> {
        std::mem::take(&mut self.registry_requests)
    }

    pub fn is_leader(&self) -> bool {
        self.deposed.is_none()
    }

    /// Why leadership was relinquished, if it was
    pub fn deposed_reason(&self) -> Option<&str> {
        self.deposed.as_deref()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn task(&self, framework_id: &FrameworkId, task_id: &TaskId) -> Option<&Task> {
        self.tasks
            .get(&TaskKey::new(framework_id.clone(), task_id.clone()))
    }

    pub fn agent_state(&self, agent_id: &AgentId) -> Option<AgentState> {
        self.agents.state(agent_id)
    }

    pub fn framework_state(&self, framework_id: &FrameworkId) -> Option<FrameworkState> {
        self.frameworks.state(framework_id)
    }

    pub fn outstanding_offers(&self) -> Vec<Offer> {
        self.offers.iter().cloned().collect()
    }

    /// Earliest armed timer, for the driver to sleep until
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    // ========== Startup ==========

    /// Load agents recovered from the registry. Each starts disconnected with
    /// its reregistration timeout armed.
    pub fn recover(&mut self, agents: Vec<AgentInfo>) {
        let now = self.clock.now();
        let deadline = self.deadline(self.config.agent_reregister_timeout);
        let count = agents.len();
        for info in agents {
            let id = info.id.clone();
            let total = self.filtered(&info.resources);
            self.agents.recover(info, now);
            self.ledger.add_agent(&id, total);
            self.timers
                .schedule(TimerKind::AgentReregistration(id), deadline);
        }
        info!(count = count, "Recovered agents from registry");
    }

    // ========== Frameworks ==========

    #[instrument(skip(self, info), fields(name = %info.name))]
    pub fn register_framework(&mut self, info: FrameworkInfo) -> Result<FrameworkId> {
        self.ensure_leader()?;
        let id = FrameworkId::generate();
        self.frameworks.register(&id, info, self.clock.now())?;
        self.allocator.add_framework(&id);
        self.send_framework(
            &id,
            FrameworkMessage::Registered {
                framework_id: id.clone(),
            },
        );
        info!(framework_id = %id, "Framework registered");
        Ok(id)
    }

    #[instrument(skip(self, info), fields(framework_id = %framework_id))]
    pub fn reregister_framework(
        &mut self,
        framework_id: &FrameworkId,
        info: FrameworkInfo,
    ) -> Result<()> {
        self.ensure_leader()?;
        let registration = match self.frameworks.register(framework_id, info, self.clock.now()) {
            Ok(registration) => registration,
            Err(e @ CoordinatorError::FrameworkRemoved(_)) => {
                self.send_framework(
                    framework_id,
                    FrameworkMessage::Error {
                        message: "Framework has been removed".to_string(),
                    },
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match registration {
            Registration::New | Registration::Adopted => self.allocator.add_framework(framework_id),
            Registration::Reconnected => self.allocator.activate_framework(framework_id),
            Registration::Refreshed => {}
        }
        self.send_framework(
            framework_id,
            FrameworkMessage::Reregistered {
                framework_id: framework_id.clone(),
            },
        );
        info!(framework_id = %framework_id, registration = ?registration, "Framework reregistered");
        Ok(())
    }

    /// Transport lost the framework. Its tasks keep running.
    #[instrument(skip(self), fields(framework_id = %framework_id))]
    pub fn framework_disconnected(&mut self, framework_id: &FrameworkId) -> Result<()> {
        self.ensure_leader()?;
        self.frameworks.disconnect(framework_id)?;
        self.allocator.deactivate_framework(framework_id);
        for offer_id in self.offers.for_framework(framework_id) {
            self.rescind_offer(&offer_id, RescindReason::FrameworkDeactivated, false)?;
        }
        info!(framework_id = %framework_id, "Framework disconnected");
        Ok(())
    }

    /// Tear the framework down: kill its tasks, shut it down on every agent
    /// hosting them, and forget it.
    #[instrument(skip(self), fields(framework_id = %framework_id))]
    pub fn unregister_framework(&mut self, framework_id: &FrameworkId) -> Result<()> {
        self.ensure_leader()?;
        match self.frameworks.state(framework_id) {
            Some(FrameworkState::Registered) | Some(FrameworkState::Disconnected) => {}
            Some(_) => return Err(CoordinatorError::FrameworkNotRegistered(framework_id.clone())),
            None if self.frameworks.is_completed(framework_id) => {
                return Err(CoordinatorError::FrameworkRemoved(framework_id.clone()))
            }
            None => return Err(CoordinatorError::FrameworkNotFound(framework_id.clone())),
        }

        for offer_id in self.offers.for_framework(framework_id) {
            self.rescind_offer(&offer_id, RescindReason::FrameworkRemoved, false)?;
        }

        let mut hosts = BTreeSet::new();
        for key in self.tasks.for_framework(framework_id) {
            let live_on = self
                .tasks
                .get(&key)
                .filter(|task| !task.is_terminal())
                .map(|task| task.agent_id.clone());
            if let Some(agent_id) = live_on {
                hosts.insert(agent_id);
                self.force_terminal(
                    &key,
                    TaskState::Killed,
                    StatusReason::FrameworkRemoved,
                    "Framework was removed",
                    false,
                )?;
            }
            self.tasks.archive(&key);
        }

        for agent_id in hosts {
            if self.agents.contains(&agent_id) {
                self.send_agent(
                    &agent_id,
                    AgentMessage::ShutdownFramework {
                        framework_id: framework_id.clone(),
                        grace_period: self.config.kill_grace_period,
                    },
                );
            }
        }

        self.tasks.forget_kills_for(framework_id);
        self.frameworks.complete(framework_id, self.clock.now())?;
        self.allocator.remove_framework(framework_id);
        info!(framework_id = %framework_id, "Framework removed");
        Ok(())
    }

    /// Accept a set of offers on one agent and launch tasks against their
    /// combined resources.
    #[instrument(skip(self, offer_ids, tasks, filters), fields(framework_id = %framework_id, offers = offer_ids.len(), tasks = tasks.len()))]
    pub fn launch_tasks(
        &mut self,
        framework_id: &FrameworkId,
        offer_ids: Vec<OfferId>,
        tasks: Vec<TaskInfo>,
        filters: Filters,
    ) -> Result<()> {
        self.ensure_leader()?;
        self.frameworks.require_registered(framework_id)?;

        let agent_id = match self.offers.validate(framework_id, &offer_ids) {
            Ok(agent_id) if self.agents.is_active(&agent_id) => agent_id,
            Ok(agent_id) => {
                let reason = format!("{} is not active", agent_id);
                return self.reject_launch(framework_id, &offer_ids, tasks, &reason);
            }
            Err(invalid) => {
                let reason = invalid.to_string();
                return self.reject_launch(framework_id, &offer_ids, tasks, &reason);
            }
        };

        let mut available = Resources::new();
        for offer_id in &offer_ids {
            let offer = self
                .settle_offer(offer_id, OfferDisposition::Accepted)?
                .ok_or_else(|| CoordinatorError::invariant(format!("{} vanished", offer_id)))?;
            available.merge(&offer.resources)?;
        }

        let framework_info = self
            .frameworks
            .get(framework_id)
            .and_then(|f| f.info.clone())
            .unwrap_or_default();
        let now = self.clock.now();

        for info in tasks {
            let key = TaskKey::new(framework_id.clone(), info.task_id.clone());
            let problem = if info.agent_id != agent_id {
                Some(format!(
                    "Task targets {} but the offers are for {}",
                    info.agent_id, agent_id
                ))
            } else if self.tasks.contains(&key) {
                Some("Task id is already in use".to_string())
            } else if !available.contains(&info.resources) {
                Some("Task uses more resources than offered".to_string())
            } else {
                None
            };
            if let Some(message) = problem {
                warn!(task = %key, reason = %message, "Rejecting invalid task");
                self.reject_task(framework_id, info, TaskState::Error, StatusReason::InvalidTask, &message);
                continue;
            }

            available = available.checked_sub(&info.resources)?;
            self.ledger.add_used(&agent_id, &info.resources)?;
            self.tasks
                .insert(Task::from_info(framework_id.clone(), info.clone(), now));
            self.frameworks.add_task(framework_id, &info.task_id);
            info!(task = %key, agent_id = %agent_id, "Launching task");
            self.send_agent(
                &agent_id,
                AgentMessage::RunTask {
                    framework_id: framework_id.clone(),
                    framework: framework_info.clone(),
                    task: info,
                },
            );
        }

        if !available.is_empty() {
            let filters = self.resolve_filters(&filters);
            self.allocator
                .recover_resources(framework_id, &agent_id, &available, Some(&filters));
        }
        Ok(())
    }

    #[instrument(skip(self, filters), fields(framework_id = %framework_id, offer_id = %offer_id))]
    pub fn decline_offer(
        &mut self,
        framework_id: &FrameworkId,
        offer_id: &OfferId,
        filters: Filters,
    ) -> Result<()> {
        self.ensure_leader()?;
        self.frameworks.require_registered(framework_id)?;

        let owned = self
            .offers
            .get(offer_id)
            .map(|offer| &offer.framework_id == framework_id)
            .unwrap_or(false);
        if !owned {
            debug!(offer_id = %offer_id, "Ignoring decline of an offer that is not outstanding");
            return Ok(());
        }

        let Some(offer) = self.settle_offer(offer_id, OfferDisposition::Declined)? else {
            return Ok(());
        };
        let filters = self.resolve_filters(&filters);
        self.allocator.recover_resources(
            framework_id,
            &offer.agent_id,
            &offer.resources,
            Some(&filters),
        );
        debug!(
            offer_id = %offer_id,
            refuse_seconds = ?filters.refuse_seconds,
            "Offer declined"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(framework_id = %framework_id))]
    pub fn revive_offers(&mut self, framework_id: &FrameworkId) -> Result<()> {
        self.ensure_leader()?;
        self.frameworks.require_registered(framework_id)?;
        self.allocator.revive_offers(framework_id);
        debug!(framework_id = %framework_id, "Offers revived");
        Ok(())
    }

    #[instrument(skip(self), fields(framework_id = %framework_id, task_id = %task_id))]
    pub fn kill_task(&mut self, framework_id: &FrameworkId, task_id: &TaskId) -> Result<()> {
        self.ensure_leader()?;
        self.frameworks.require_registered(framework_id)?;
        let key = TaskKey::new(framework_id.clone(), task_id.clone());

        let live_on = self
            .tasks
            .get(&key)
            .map(|task| (!task.is_terminal()).then(|| task.agent_id.clone()));
        match live_on {
            Some(Some(agent_id)) => {
                info!(task = %key, agent_id = %agent_id, "Forwarding kill");
                self.send_agent(
                    &agent_id,
                    AgentMessage::KillTask {
                        framework_id: framework_id.clone(),
                        task_id: task_id.clone(),
                    },
                );
            }
            Some(None) => debug!(task = %key, "Kill of a terminal task ignored"),
            None if self.agents.reconciling() => {
                info!(task = %key, "Task unknown while agents reregister; deferring kill");
                self.tasks.record_kill(key);
            }
            None => self.send_unknown_task_lost(&key),
        }
        Ok(())
    }

    /// A framework acknowledged a status update
    #[instrument(skip(self), fields(framework_id = %framework_id, task_id = %task_id))]
    pub fn acknowledge(
        &mut self,
        framework_id: &FrameworkId,
        task_id: &TaskId,
        status_id: StatusId,
    ) -> Result<()> {
        self.ensure_leader()?;
        self.frameworks.require_registered(framework_id)?;
        let key = TaskKey::new(framework_id.clone(), task_id.clone());

        let Some(agent_id) = self.tasks.get(&key).map(|task| task.agent_id.clone()) else {
            debug!(task = %key, "Acknowledgement for an unknown task");
            return Ok(());
        };
        if self.agents.is_active(&agent_id) {
            self.send_agent(
                &agent_id,
                AgentMessage::StatusUpdateAcknowledgement {
                    framework_id: framework_id.clone(),
                    task_id: task_id.clone(),
                    status_id,
                },
            );
        }
        if self.tasks.terminal_update(&key) == Some(status_id) {
            self.tasks.archive(&key);
            self.frameworks.remove_task(framework_id, task_id);
            debug!(task = %key, "Terminal task archived");
        }
        Ok(())
    }

    // ========== Agents ==========

    /// First contact from an agent. It becomes active once the registry
    /// confirms admission.
    #[instrument(skip(self, resources), fields(hostname = %hostname))]
    pub fn register_agent(
        &mut self,
        hostname: &str,
        resources: Resources,
        incarnation: u64,
    ) -> Result<AgentId> {
        self.ensure_leader()?;
        let info = AgentInfo::new(hostname, resources).with_incarnation(incarnation);
        let agent_id = info.id.clone();
        self.agents.register(info.clone(), self.clock.now());
        self.request(
            RegistryRequest::Admit(info),
            PendingOperation::Admit {
                agent_id: agent_id.clone(),
            },
        );
        debug!(agent_id = %agent_id, "Admitting agent");
        Ok(agent_id)
    }

    /// An agent that already has an id reconnects, reporting its tasks
    #[instrument(skip(self, info, reported), fields(agent_id = %info.id, incarnation = info.incarnation, tasks = reported.len()))]
    pub fn reregister_agent(&mut self, info: AgentInfo, reported: Vec<Task>) -> Result<()> {
        self.ensure_leader()?;
        let agent_id = info.id.clone();

        if self.agents.is_removed(&agent_id) {
            warn!(agent_id = %agent_id, "Refusing reregistration of a removed agent");
            self.refuse_agent(&agent_id, "Agent was removed from the cluster");
            return Ok(());
        }

        let known = self
            .agents
            .get(&agent_id)
            .map(|a| (a.state, a.info.incarnation, a.recovered));
        match known {
            None => {
                // Not known to this coordinator: confirm against the registry.
                let now = self.clock.now();
                self.agents.recover(info.clone(), now);
                self.agents.transition(&agent_id, AgentState::Reregistering)?;
                let total = self.filtered(&info.resources);
                self.ledger.add_agent(&agent_id, total);
                let strict = self.config.registry_strict;
                let request = if strict {
                    RegistryRequest::Readmit(info)
                } else {
                    RegistryRequest::Admit(info)
                };
                self.request(
                    request,
                    PendingOperation::Reregister {
                        agent_id,
                        tasks: reported,
                        refuse_on_false: strict,
                    },
                );
            }
            Some((_, recorded, _)) if info.incarnation < recorded => {
                warn!(
                    agent_id = %agent_id,
                    incarnation = info.incarnation,
                    recorded = recorded,
                    "Refusing stale agent incarnation"
                );
                self.send_agent(
                    &agent_id,
                    AgentMessage::Shutdown {
                        reason: "A newer incarnation of this agent is registered".to_string(),
                    },
                );
            }
            Some((AgentState::Registering, ..)) | Some((AgentState::Reregistering, ..)) => {
                debug!(agent_id = %agent_id, "Registration already in flight");
            }
            Some((AgentState::Removed, ..)) => {
                warn!(agent_id = %agent_id, "Refusing reregistration during removal");
                self.send_agent(
                    &agent_id,
                    AgentMessage::Shutdown {
                        reason: "Agent is being removed".to_string(),
                    },
                );
            }
            Some((AgentState::Active, ..)) => {
                self.update_agent_info(&info);
                self.reconcile(&agent_id, reported)?;
                self.sync_allocator_agent(&agent_id);
                self.send_agent(
                    &agent_id,
                    AgentMessage::Reregistered {
                        agent_id: agent_id.clone(),
                    },
                );
            }
            Some((AgentState::Disconnected, _, true)) => {
                self.timers
                    .cancel(&TimerKind::AgentReregistration(agent_id.clone()));
                self.agents.transition(&agent_id, AgentState::Reregistering)?;
                self.update_agent_info(&info);
                let info = self
                    .agents
                    .get(&agent_id)
                    .map(|a| a.info.clone())
                    .unwrap_or(info);
                self.request(
                    RegistryRequest::Readmit(info),
                    PendingOperation::Reregister {
                        agent_id: agent_id.clone(),
                        tasks: reported,
                        refuse_on_false: self.config.registry_strict,
                    },
                );
                debug!(agent_id = %agent_id, "Readmitting recovered agent");
            }
            Some((AgentState::Disconnected, _, false)) => {
                self.timers
                    .cancel(&TimerKind::AgentReregistration(agent_id.clone()));
                self.agents.transition(&agent_id, AgentState::Active)?;
                self.update_agent_info(&info);
                self.reconcile(&agent_id, reported)?;
                self.sync_allocator_agent(&agent_id);
                self.send_agent(
                    &agent_id,
                    AgentMessage::Reregistered {
                        agent_id: agent_id.clone(),
                    },
                );
                info!(agent_id = %agent_id, "Agent reconnected");
            }
        }
        Ok(())
    }

    /// Transport lost the agent. Its tasks are kept until the reregistration
    /// timeout elapses.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub fn agent_disconnected(&mut self, agent_id: &AgentId) -> Result<()> {
        self.ensure_leader()?;
        let state = self
            .agents
            .state(agent_id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.clone()))?;

        match state {
            AgentState::Active => {
                self.agents.transition(agent_id, AgentState::Disconnected)?;
                self.allocator.deactivate_agent(agent_id);
                for offer_id in self.offers.for_agent(agent_id) {
                    self.rescind_offer(&offer_id, RescindReason::AgentDeactivated, true)?;
                }
                info!(agent_id = %agent_id, "Agent disconnected");
            }
            AgentState::Reregistering => {
                self.agents.transition(agent_id, AgentState::Disconnected)?;
                debug!(agent_id = %agent_id, "Agent disconnected during readmission");
            }
            AgentState::Registering | AgentState::Disconnected | AgentState::Removed => {
                debug!(agent_id = %agent_id, state = %state, "Ignoring disconnect");
                return Ok(());
            }
        }

        let deadline = self.deadline(self.config.agent_reregister_timeout);
        self.timers
            .schedule(TimerKind::AgentReregistration(agent_id.clone()), deadline);
        Ok(())
    }

    /// A status update relayed by an agent
    #[instrument(skip(self, update), fields(agent_id = %agent_id, task = %update.task_key(), state = %update.effective_state()))]
    pub fn status_update(&mut self, agent_id: &AgentId, update: StatusUpdate) -> Result<()> {
        self.ensure_leader()?;
        match self.agents.state(agent_id) {
            Some(AgentState::Removed) => {
                warn!(agent_id = %agent_id, "Ignoring status update from a removed agent");
                return Ok(());
            }
            Some(_) => {}
            None if self.agents.is_removed(agent_id) => {
                warn!(agent_id = %agent_id, "Ignoring status update from a removed agent");
                return Ok(());
            }
            None => return Err(CoordinatorError::AgentNotFound(agent_id.clone())),
        }

        let key = update.task_key();
        let state = update.effective_state();
        let now = self.clock.now();

        if let Some(owner) = self.tasks.get(&key).map(|t| t.agent_id.clone()) {
            if &owner != agent_id {
                warn!(
                    task = %key,
                    owner = %owner,
                    "Ignoring status update relayed by an agent that does not run the task"
                );
                return Ok(());
            }
        }

        match self.tasks.apply(&key, state, update.status.clone(), now) {
            Some(StatusOutcome::Progressed { first_terminal }) => {
                debug!(task = %key, state = %state, "Task state updated");
                if first_terminal {
                    if let Some((agent, resources)) = self
                        .tasks
                        .get(&key)
                        .map(|t| (t.agent_id.clone(), t.resources.clone()))
                    {
                        self.recover_task_resources(&key.framework_id, &agent, &resources)?;
                    }
                    info!(task = %key, state = %state, "Task reached terminal state");
                }
            }
            Some(StatusOutcome::Stale) => {
                debug!(task = %key, state = %state, "Stale status update");
            }
            None => {
                warn!(task = %key, "Status update for an unknown task");
            }
        }

        if state.is_terminal() {
            self.tasks.record_terminal_update(&key, update.id);
        }

        if self.frameworks.is_registered(&key.framework_id) {
            self.send_framework(
                &key.framework_id,
                FrameworkMessage::StatusUpdate { update },
            );
        }
        Ok(())
    }

    /// Replace the hostname whitelist. `None` accepts every host.
    pub fn update_whitelist(&mut self, whitelist: Option<BTreeSet<String>>) -> Result<()> {
        self.ensure_leader()?;
        match &whitelist {
            Some(hosts) => info!(hosts = hosts.len(), "Whitelist updated"),
            None => info!("Whitelist disabled; all hosts accepted"),
        }
        self.allocator.update_whitelist(whitelist);
        Ok(())
    }

    // ========== Time ==========

    /// Fire every due timer. A failing timer is logged and does not stop
    /// the ones due after it.
    pub fn tick(&mut self) -> Result<()> {
        self.ensure_leader()?;
        for kind in self.timers.pop_due(self.clock.now()) {
            let fired = match &kind {
                TimerKind::OfferExpiry(offer_id) => self.expire_offer(offer_id),
                TimerKind::AgentReregistration(agent_id) => self.reregistration_timeout(agent_id),
            };
            if let Err(e) = fired {
                error!(timer = ?kind, error = %e, "Timer handling failed");
            }
        }
        self.resolve_pending_kills();
        Ok(())
    }

    /// Run one allocation cycle, turning allocator decisions into offers.
    /// Returns the number of offers made.
    pub fn allocate(&mut self) -> Result<usize> {
        self.ensure_leader()?;
        let mut by_framework: BTreeMap<FrameworkId, Vec<Offer>> = BTreeMap::new();

        for allocation in self.allocator.allocate() {
            let framework_id = allocation.framework_id;
            let agent_id = allocation.agent_id;
            if !self.frameworks.is_registered(&framework_id) || !self.agents.is_active(&agent_id) {
                self.allocator
                    .recover_resources(&framework_id, &agent_id, &allocation.resources, None);
                continue;
            }

            let resources = self.filtered(&allocation.resources);
            match self.create_offer(&framework_id, &agent_id, resources) {
                Ok(offer) => by_framework.entry(framework_id).or_default().push(offer),
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "Allocation does not fit the ledger");
                    self.allocator.recover_resources(
                        &framework_id,
                        &agent_id,
                        &allocation.resources,
                        None,
                    );
                }
            }
        }

        let mut count = 0;
        for (framework_id, offers) in by_framework {
            count += offers.len();
            debug!(framework_id = %framework_id, offers = offers.len(), "Sending offers");
            self.send_framework(&framework_id, FrameworkMessage::ResourceOffers { offers });
        }
        Ok(count)
    }

    /// Offer `resources` of `agent_id` to `framework_id` and arm its expiry
    pub fn create_offer(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: Resources,
    ) -> Result<Offer> {
        let hostname = self
            .agents
            .get(agent_id)
            .map(|a| a.info.hostname.clone())
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.clone()))?;
        self.ledger.reserve_offer(agent_id, &resources)?;

        let offer = Offer {
            id: OfferId::generate(),
            framework_id: framework_id.clone(),
            agent_id: agent_id.clone(),
            hostname,
            resources,
            created_at: self.clock.now(),
            disposition: OfferDisposition::Outstanding,
        };
        self.offers.insert(offer.clone());
        let deadline = self.deadline(self.config.offer_timeout);
        self.timers
            .schedule(TimerKind::OfferExpiry(offer.id), deadline);
        Ok(offer)
    }

    // ========== Registry completions ==========

    /// Deliver the answer to a registry request
    pub fn registry_completed(
        &mut self,
        ticket: Ticket,
        result: std::result::Result<bool, RegistryError>,
    ) -> Result<()> {
        let Some(operation) = self.pending.remove(&ticket) else {
            warn!(ticket = ticket, "Completion for an unknown registry request");
            return Ok(());
        };
        self.ensure_leader()?;

        let admitted = match result {
            Ok(admitted) => admitted,
            Err(e) => {
                let reason = format!("Registry failure during {}: {}", operation.describe(), e);
                self.relinquish(reason.clone());
                return Err(CoordinatorError::LeadershipLost(reason));
            }
        };

        match operation {
            PendingOperation::Admit { agent_id } => {
                self.complete_admission(&agent_id, admitted)?;
            }
            PendingOperation::Reregister {
                agent_id,
                tasks,
                refuse_on_false,
            } => {
                if self.agents.state(&agent_id) != Some(AgentState::Reregistering) {
                    debug!(agent_id = %agent_id, "Agent left reregistration before readmission completed");
                } else if admitted || !refuse_on_false {
                    self.complete_reregistration(&agent_id, tasks)?;
                } else {
                    warn!(agent_id = %agent_id, "Registry does not know the agent; refusing");
                    self.ledger.remove_agent(&agent_id);
                    self.agents.forget(&agent_id, true);
                    self.refuse_agent(&agent_id, "Agent is not admitted to the cluster");
                }
            }
            PendingOperation::Remove { agent_id, announce } => {
                if !admitted {
                    warn!(agent_id = %agent_id, "Registry did not hold the removed agent");
                }
                self.finish_removal(&agent_id, announce)?;
            }
        }

        self.resolve_pending_kills();
        Ok(())
    }

    // ========== Inspection ==========

    pub fn snapshot(&self) -> StateSnapshot {
        let agents = self
            .agents
            .iter()
            .map(|record| {
                let ledger = self.ledger.get(&record.info.id).cloned().unwrap_or_default();
                AgentSnapshot {
                    id: record.info.id.clone(),
                    hostname: record.info.hostname.clone(),
                    incarnation: record.info.incarnation,
                    state: record.state,
                    active: record.state.is_active(),
                    resources: record.info.resources.clone(),
                    offered: ledger.offered,
                    used: ledger.used,
                }
            })
            .collect();

        let frameworks = self
            .frameworks
            .iter()
            .map(|record| FrameworkSnapshot {
                id: record.id.clone(),
                name: record.info.as_ref().map(|i| i.name.clone()),
                user: record.info.as_ref().map(|i| i.user.clone()),
                state: record.state,
                tasks: self
                    .tasks
                    .for_framework(&record.id)
                    .iter()
                    .filter_map(|key| self.tasks.get(key).cloned())
                    .collect(),
                completed_tasks: self.tasks.completed(&record.id).cloned().collect(),
                offers: self
                    .offers
                    .for_framework(&record.id)
                    .iter()
                    .filter_map(|id| self.offers.get(id).cloned())
                    .collect(),
            })
            .collect();

        let completed_frameworks = self
            .frameworks
            .completed()
            .map(|record| FrameworkSnapshot {
                id: record.id.clone(),
                name: record.info.as_ref().map(|i| i.name.clone()),
                user: record.info.as_ref().map(|i| i.user.clone()),
                state: record.state,
                tasks: Vec::new(),
                completed_tasks: self.tasks.completed(&record.id).cloned().collect(),
                offers: Vec::new(),
            })
            .collect();

        let unregistered_frameworks = self.frameworks.orphans();
        let orphan_tasks = self
            .tasks
            .iter()
            .filter(|task| unregistered_frameworks.contains(&task.framework_id))
            .cloned()
            .collect();

        StateSnapshot {
            leader: self.is_leader(),
            taken_at: self.clock.now(),
            agents,
            frameworks,
            completed_frameworks,
            offers: self.offers.iter().cloned().collect(),
            orphan_tasks,
            unregistered_frameworks,
        }
    }

    // ========== Internals ==========

    fn ensure_leader(&self) -> Result<()> {
        match &self.deposed {
            Some(reason) => Err(CoordinatorError::LeadershipLost(reason.clone())),
            None => Ok(()),
        }
    }

    fn relinquish(&mut self, reason: String) {
        error!(reason = %reason, "Relinquishing leadership");
        for framework_id in self.frameworks.registered() {
            self.send_framework(&framework_id, FrameworkMessage::Disconnected);
        }
        self.deposed = Some(reason);
    }

    fn send_framework(&mut self, framework_id: &FrameworkId, message: FrameworkMessage) {
        self.outbox
            .push(Outbound::framework(framework_id.clone(), message));
    }

    fn send_agent(&mut self, agent_id: &AgentId, message: AgentMessage) {
        self.outbox.push(Outbound::agent(agent_id.clone(), message));
    }

    fn refuse_agent(&mut self, agent_id: &AgentId, reason: &str) {
        self.send_agent(
            agent_id,
            AgentMessage::Shutdown {
                reason: reason.to_string(),
            },
        );
    }

    fn request(&mut self, request: RegistryRequest, operation: PendingOperation) -> Ticket {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending.insert(ticket, operation);
        self.registry_requests.push((ticket, request));
        ticket
    }

    fn filtered(&self, resources: &Resources) -> Resources {
        resources.without(&self.config.filtered_resource_names)
    }

    fn deadline(&self, after: Duration) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(after)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn resolve_filters(&self, filters: &Filters) -> Filters {
        Filters::refuse_for(filters.refuse_duration(self.config.default_refuse_duration))
    }

    fn update_agent_info(&mut self, info: &AgentInfo) {
        let now = self.clock.now();
        if let Some(record) = self.agents.get_mut(&info.id) {
            if record.info.resources != info.resources {
                warn!(
                    agent_id = %info.id,
                    "Agent reported different resources; keeping the admitted ones"
                );
            }
            record.info.hostname = info.hostname.clone();
            record.info.incarnation = record.info.incarnation.max(info.incarnation);
            record.reregistered_at = Some(now);
        }
    }

    /// Tell the allocator about an active agent's current allocation
    fn sync_allocator_agent(&mut self, agent_id: &AgentId) {
        let Some(record) = self.agents.get(agent_id) else {
            return;
        };
        let hostname = record.info.hostname.clone();
        let total = self.filtered(&record.info.resources);
        let allocated = match self.ledger.get(agent_id) {
            Some(entry) => match entry.used.checked_add(&entry.offered) {
                Ok(allocated) => allocated,
                Err(e) => {
                    error!(agent_id = %agent_id, error = %e, "Ledger entry is inconsistent");
                    return;
                }
            },
            None => Resources::new(),
        };
        self.allocator.add_agent(agent_id, &hostname, &total, &allocated);
    }

    fn complete_admission(&mut self, agent_id: &AgentId, admitted: bool) -> Result<()> {
        if self.agents.state(agent_id) != Some(AgentState::Registering) {
            debug!(agent_id = %agent_id, "Admission completed for an agent no longer registering");
            return Ok(());
        }
        if !admitted {
            warn!(agent_id = %agent_id, "Registry refused admission");
            self.agents.forget(agent_id, false);
            self.refuse_agent(agent_id, "Agent id is already admitted");
            return Ok(());
        }

        self.agents.transition(agent_id, AgentState::Active)?;
        let total = self
            .agents
            .get(agent_id)
            .map(|a| self.filtered(&a.info.resources))
            .unwrap_or_default();
        self.ledger.add_agent(agent_id, total);
        self.sync_allocator_agent(agent_id);
        self.send_agent(
            agent_id,
            AgentMessage::Registered {
                agent_id: agent_id.clone(),
            },
        );
        info!(agent_id = %agent_id, "Agent admitted");
        Ok(())
    }

    fn complete_reregistration(&mut self, agent_id: &AgentId, reported: Vec<Task>) -> Result<()> {
        self.agents.transition(agent_id, AgentState::Active)?;
        if let Some(record) = self.agents.get_mut(agent_id) {
            record.recovered = false;
        }
        self.reconcile(agent_id, reported)?;
        self.sync_allocator_agent(agent_id);
        self.send_agent(
            agent_id,
            AgentMessage::Reregistered {
                agent_id: agent_id.clone(),
            },
        );
        info!(agent_id = %agent_id, "Agent reregistered");
        Ok(())
    }

    /// Fold an agent's task report into the registry
    fn reconcile(&mut self, agent_id: &AgentId, reported: Vec<Task>) -> Result<()> {
        let mut reported_keys = BTreeSet::new();

        for task in reported {
            if &task.agent_id != agent_id {
                warn!(agent_id = %agent_id, task = %task.key(), "Agent reported a task of another agent");
                continue;
            }
            let key = task.key();
            reported_keys.insert(key.clone());
            if self.tasks.contains(&key) {
                continue;
            }

            let framework_id = task.framework_id.clone();
            if self.frameworks.is_completed(&framework_id) {
                self.send_agent(
                    agent_id,
                    AgentMessage::ShutdownFramework {
                        framework_id,
                        grace_period: self.config.kill_grace_period,
                    },
                );
                continue;
            }

            if !task.is_terminal() {
                let resources = self.filtered(&task.resources);
                if let Err(e) = self.ledger.add_used(agent_id, &resources) {
                    error!(task = %key, error = %e, "Reported task does not fit the agent");
                    continue;
                }
            }
            let state = self.frameworks.ensure_orphan(&framework_id);
            self.frameworks.add_task(&framework_id, &task.task_id);
            self.tasks.insert(task);
            info!(task = %key, framework_state = %state, "Adopted reported task");
        }

        for key in self.tasks.for_agent(agent_id) {
            if reported_keys.contains(&key) {
                continue;
            }
            let vanished = self
                .tasks
                .get(&key)
                .map(|t| !t.is_terminal() && t.state != TaskState::Staging)
                .unwrap_or(false);
            if vanished {
                warn!(task = %key, "Task missing from agent report");
                self.force_terminal(
                    &key,
                    TaskState::Lost,
                    StatusReason::ReconciliationLost,
                    "Task was not reported by its agent on reregistration",
                    true,
                )?;
            }
        }
        Ok(())
    }

    fn reregistration_timeout(&mut self, agent_id: &AgentId) -> Result<()> {
        let Some(record) = self.agents.get(agent_id) else {
            return Ok(());
        };
        if record.state != AgentState::Disconnected {
            return Ok(());
        }
        let announce = self.config.registry_strict || !record.recovered;

        warn!(agent_id = %agent_id, "Agent did not reregister in time; removing");
        self.agents.transition(agent_id, AgentState::Removed)?;
        self.allocator.deactivate_agent(agent_id);
        for offer_id in self.offers.for_agent(agent_id) {
            self.rescind_offer(&offer_id, RescindReason::AgentRemoved, true)?;
        }
        self.request(
            RegistryRequest::Remove(agent_id.clone()),
            PendingOperation::Remove {
                agent_id: agent_id.clone(),
                announce,
            },
        );
        Ok(())
    }

    /// The registry has forgotten the agent: lose its tasks and drop it
    fn finish_removal(&mut self, agent_id: &AgentId, announce: bool) -> Result<()> {
        for key in self.tasks.for_agent(agent_id) {
            let live = self.tasks.get(&key).map(|t| !t.is_terminal()).unwrap_or(false);
            if live {
                self.force_terminal(
                    &key,
                    TaskState::Lost,
                    StatusReason::AgentRemoved,
                    "Agent was removed",
                    true,
                )?;
            }
        }
        if announce {
            for framework_id in self.frameworks.registered() {
                self.send_framework(
                    &framework_id,
                    FrameworkMessage::AgentLost {
                        agent_id: agent_id.clone(),
                    },
                );
            }
        }
        self.allocator.remove_agent(agent_id);
        self.ledger.remove_agent(agent_id);
        self.agents.forget(agent_id, announce);
        info!(agent_id = %agent_id, announced = announce, "Agent removed");
        Ok(())
    }

    /// Drive a live task to a terminal state chosen by the coordinator
    fn force_terminal(
        &mut self,
        key: &TaskKey,
        state: TaskState,
        reason: StatusReason,
        message: &str,
        notify: bool,
    ) -> Result<()> {
        let Some((agent_id, resources)) = self
            .tasks
            .get(key)
            .map(|t| (t.agent_id.clone(), t.resources.clone()))
        else {
            return Ok(());
        };
        let now = self.clock.now();
        let status = TaskStatus::new(key.task_id.clone(), state, now)
            .with_agent(agent_id.clone())
            .with_reason(reason, message);
        let update = StatusUpdate::new(key.framework_id.clone(), status.clone());

        if let Some(StatusOutcome::Progressed { first_terminal: true }) =
            self.tasks.apply(key, state, status, now)
        {
            self.recover_task_resources(&key.framework_id, &agent_id, &resources)?;
        }
        self.tasks.record_terminal_update(key, update.id);

        if notify && self.frameworks.is_registered(&key.framework_id) {
            self.send_framework(
                &key.framework_id,
                FrameworkMessage::StatusUpdate { update },
            );
        }
        Ok(())
    }

    fn recover_task_resources(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &Resources,
    ) -> Result<()> {
        let resources = self.filtered(resources);
        if self.ledger.contains(agent_id) {
            self.ledger.release_used(agent_id, &resources)?;
        }
        self.allocator
            .recover_resources(framework_id, agent_id, &resources, None);
        Ok(())
    }

    /// Tasks of a rejected launch batch are recorded as terminal and reported
    fn reject_task(
        &mut self,
        framework_id: &FrameworkId,
        info: TaskInfo,
        state: TaskState,
        reason: StatusReason,
        message: &str,
    ) {
        let now = self.clock.now();
        let key = TaskKey::new(framework_id.clone(), info.task_id.clone());
        let status = TaskStatus::new(info.task_id.clone(), state, now)
            .with_agent(info.agent_id.clone())
            .with_reason(reason, message);
        let update = StatusUpdate::new(framework_id.clone(), status.clone());

        if !self.tasks.contains(&key) {
            let mut task = Task::from_info(framework_id.clone(), info, now);
            task.state = state;
            task.last_status = Some(status);
            self.frameworks.add_task(framework_id, &task.task_id);
            self.tasks.insert(task);
            self.tasks.record_terminal_update(&key, update.id);
        }

        self.send_framework(framework_id, FrameworkMessage::StatusUpdate { update });
    }

    fn reject_launch(
        &mut self,
        framework_id: &FrameworkId,
        offer_ids: &[OfferId],
        tasks: Vec<TaskInfo>,
        reason: &str,
    ) -> Result<()> {
        warn!(framework_id = %framework_id, reason = %reason, "Launch with invalid offers");

        let unique: BTreeSet<OfferId> = offer_ids.iter().copied().collect();
        for offer_id in unique {
            let owned = self
                .offers
                .get(&offer_id)
                .map(|offer| &offer.framework_id == framework_id)
                .unwrap_or(false);
            if !owned {
                continue;
            }
            let rejected = OfferDisposition::Rescinded {
                reason: RescindReason::InvalidOffers,
            };
            if let Some(offer) = self.settle_offer(&offer_id, rejected)? {
                self.allocator.recover_resources(
                    framework_id,
                    &offer.agent_id,
                    &offer.resources,
                    None,
                );
            }
        }

        let message = format!("Invalid offers: {}", reason);
        for info in tasks {
            self.reject_task(
                framework_id,
                info,
                TaskState::Lost,
                StatusReason::InvalidOffers,
                &message,
            );
        }
        Ok(())
    }

    /// Give an outstanding offer its disposition and return its resources
    /// to the ledger. The ledger is released first, so an offer whose
    /// release fails stays outstanding rather than half disposed.
    fn settle_offer(
        &mut self,
        offer_id: &OfferId,
        disposition: OfferDisposition,
    ) -> Result<Option<Offer>> {
        let Some((agent_id, resources)) = self
            .offers
            .get(offer_id)
            .map(|offer| (offer.agent_id.clone(), offer.resources.clone()))
        else {
            return Ok(None);
        };
        self.ledger.release_offer(&agent_id, &resources)?;
        self.timers.cancel(&TimerKind::OfferExpiry(*offer_id));
        Ok(self.offers.resolve(offer_id, disposition))
    }

    fn rescind_offer(&mut self, offer_id: &OfferId, reason: RescindReason, notify: bool) -> Result<()> {
        self.withdraw_offer(offer_id, OfferDisposition::Rescinded { reason }, notify)
    }

    /// The offer went unanswered for the offer timeout
    fn expire_offer(&mut self, offer_id: &OfferId) -> Result<()> {
        self.withdraw_offer(offer_id, OfferDisposition::Expired, true)
    }

    fn withdraw_offer(
        &mut self,
        offer_id: &OfferId,
        disposition: OfferDisposition,
        notify: bool,
    ) -> Result<()> {
        let Some(offer) = self.settle_offer(offer_id, disposition)? else {
            return Ok(());
        };
        self.allocator.recover_resources(
            &offer.framework_id,
            &offer.agent_id,
            &offer.resources,
            None,
        );
        if notify && self.frameworks.is_registered(&offer.framework_id) {
            self.send_framework(
                &offer.framework_id,
                FrameworkMessage::RescindOffer {
                    offer_id: *offer_id,
                },
            );
        }
        info!(offer_id = %offer_id, disposition = %disposition, "Offer withdrawn");
        Ok(())
    }

    fn send_unknown_task_lost(&mut self, key: &TaskKey) {
        let status = TaskStatus::new(key.task_id.clone(), TaskState::Lost, self.clock.now())
            .with_reason(StatusReason::TaskUnknown, "Task is unknown to the coordinator");
        let update = StatusUpdate::new(key.framework_id.clone(), status);
        info!(task = %key, "Kill of an unknown task answered with TASK_LOST");
        self.send_framework(
            &key.framework_id,
            FrameworkMessage::StatusUpdate { update },
        );
    }

    /// Settle kills deferred while agents were reregistering
    fn resolve_pending_kills(&mut self) {
        if !self.tasks.has_pending_kills() || self.agents.reconciling() {
            return;
        }
        for key in self.tasks.take_pending_kills() {
            let live_on = self
                .tasks
                .get(&key)
                .map(|task| (!task.is_terminal()).then(|| task.agent_id.clone()));
            match live_on {
                Some(Some(agent_id)) => {
                    info!(task = %key, "Forwarding deferred kill");
                    self.send_agent(
                        &agent_id,
                        AgentMessage::KillTask {
                            framework_id: key.framework_id.clone(),
                            task_id: key.task_id.clone(),
                        },
                    );
                }
                Some(None) => {}
                None => {
                    if self.frameworks.is_registered(&key.framework_id) {
                        self.send_unknown_task_lost(&key);
                    }
                }
            }
        }
    }
}
