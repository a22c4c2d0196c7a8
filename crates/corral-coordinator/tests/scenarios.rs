//! End-to-end scenarios driving the coordinator with a manual clock, the
//! first-fit allocator and the in-memory registry.

use corral_allocator::SimpleAllocator;
use corral_coordinator::{Coordinator, CoordinatorConfig, CoordinatorError, RegistryRequest};
use corral_registry::{InMemoryRegistry, Registry};
use corral_types::{
    AgentId, AgentInfo, AgentMessage, AgentState, Clock, Filters, FrameworkId, FrameworkInfo,
    FrameworkMessage, FrameworkState, ManualClock, Offer, OfferId, Outbound, Resources,
    StatusReason, StatusUpdate, Task, TaskId, TaskInfo, TaskState, TaskStatus, Value,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

// ========== Harness ==========

struct Harness {
    coordinator: Coordinator,
    clock: Arc<ManualClock>,
    registry: Arc<InMemoryRegistry>,
    runtime: tokio::runtime::Runtime,
}

impl Harness {
    fn new() -> Self {
        Self::with(CoordinatorConfig::default(), InMemoryRegistry::new())
    }

    fn with(config: CoordinatorConfig, registry: InMemoryRegistry) -> Self {
        let clock = Arc::new(ManualClock::default());
        let allocator = Box::new(SimpleAllocator::new(clock.clone()));
        let coordinator = Coordinator::new(config, clock.clone(), allocator);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        Self {
            coordinator,
            clock,
            registry: Arc::new(registry),
            runtime,
        }
    }

    /// Answer queued registry requests until none remain
    fn settle(&mut self) -> corral_coordinator::Result<()> {
        loop {
            let requests = self.coordinator.drain_registry_requests();
            if requests.is_empty() {
                return Ok(());
            }
            for (ticket, request) in requests {
                let registry = Arc::clone(&self.registry);
                let result = self.runtime.block_on(async move {
                    match request {
                        RegistryRequest::Admit(info) => registry.admit_agent(info).await,
                        RegistryRequest::Readmit(info) => registry.readmit_agent(info).await,
                        RegistryRequest::Remove(id) => registry.remove_agent(&id).await,
                    }
                });
                self.coordinator.registry_completed(ticket, result)?;
            }
        }
    }

    fn drain(&mut self) -> Vec<Outbound> {
        self.coordinator.drain_outbox()
    }

    fn add_framework(&mut self, name: &str) -> FrameworkId {
        let id = self
            .coordinator
            .register_framework(FrameworkInfo::new(name, "svc"))
            .unwrap();
        self.drain();
        id
    }

    fn add_agent(&mut self, hostname: &str, cpus: f64, mem: f64) -> AgentId {
        self.add_agent_with(hostname, resources(cpus, mem))
    }

    fn add_agent_with(&mut self, hostname: &str, total: Resources) -> AgentId {
        let id = self
            .coordinator
            .register_agent(hostname, total, 0)
            .unwrap();
        self.settle().unwrap();
        assert_eq!(self.coordinator.agent_state(&id), Some(AgentState::Active));
        self.drain();
        id
    }

    fn offers(&mut self) -> Vec<Offer> {
        self.coordinator.allocate().unwrap();
        let messages = self.drain();
        offers_in(&messages)
    }

    fn advance(&mut self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
        self.coordinator.tick().unwrap();
    }

    fn update(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        task_id: &str,
        state: TaskState,
    ) -> StatusUpdate {
        let status = TaskStatus::new(TaskId::new(task_id), state, self.clock.now())
            .with_agent(agent_id.clone());
        let update = StatusUpdate::new(framework_id.clone(), status);
        self.coordinator
            .status_update(agent_id, update.clone())
            .unwrap();
        update
    }

    fn used_cpus(&self, agent_id: &AgentId) -> f64 {
        self.coordinator
            .ledger()
            .get(agent_id)
            .map(|entry| entry.used.cpus())
            .unwrap_or(0.0)
    }

    fn offered_cpus(&self, agent_id: &AgentId) -> f64 {
        self.coordinator
            .ledger()
            .get(agent_id)
            .map(|entry| entry.offered.cpus())
            .unwrap_or(0.0)
    }
}

fn resources(cpus: f64, mem: f64) -> Resources {
    Resources::new()
        .with_scalar("cpus", cpus)
        .with_scalar("mem", mem)
}

fn task(id: &str, agent_id: &AgentId, cpus: f64, mem: f64) -> TaskInfo {
    TaskInfo::new(id, agent_id.clone(), resources(cpus, mem))
}

fn running(framework_id: &FrameworkId, info: TaskInfo) -> Task {
    let mut task = Task::from_info(framework_id.clone(), info, chrono::Utc::now());
    task.state = TaskState::Running;
    task
}

fn offers_in(messages: &[Outbound]) -> Vec<Offer> {
    messages
        .iter()
        .filter_map(|m| match m {
            Outbound::Framework {
                message: FrameworkMessage::ResourceOffers { offers },
                ..
            } => Some(offers.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn status_updates(messages: &[Outbound]) -> Vec<StatusUpdate> {
    messages
        .iter()
        .filter_map(|m| match m {
            Outbound::Framework {
                message: FrameworkMessage::StatusUpdate { update },
                ..
            } => Some(update.clone()),
            _ => None,
        })
        .collect()
}

fn to_agent(messages: &[Outbound], agent_id: &AgentId) -> Vec<AgentMessage> {
    messages
        .iter()
        .filter_map(|m| match m {
            Outbound::Agent {
                agent_id: to,
                message,
            } if to == agent_id => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn agent_lost_count(messages: &[Outbound]) -> usize {
    messages
        .iter()
        .filter(|m| {
            matches!(
                m,
                Outbound::Framework {
                    message: FrameworkMessage::AgentLost { .. },
                    ..
                }
            )
        })
        .count()
}

fn offer_ids(offers: &[Offer]) -> Vec<OfferId> {
    offers.iter().map(|o| o.id).collect()
}

// ========== Offers and launches ==========

#[test]
fn test_offer_reserves_ledger_until_launch() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 4.0, 4096.0);

    let offers = h.offers();
    assert_eq!(offers.len(), 1);
    assert_eq!(h.offered_cpus(&agent_id), 4.0);

    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&offers),
            vec![task("t1", &agent_id, 1.0, 512.0)],
            Filters::refuse_for(Duration::ZERO),
        )
        .unwrap();
    let messages = h.drain();

    assert!(matches!(
        to_agent(&messages, &agent_id).as_slice(),
        [AgentMessage::RunTask { .. }]
    ));
    assert_eq!(h.offered_cpus(&agent_id), 0.0);
    assert_eq!(h.used_cpus(&agent_id), 1.0);
    assert!(h.coordinator.ledger().holds());

    // The leftover is offered again on the next cycle
    let again = h.offers();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].resources.cpus(), 3.0);
}

#[test]
fn test_offers_on_different_agents_are_invalid_together() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let a1 = h.add_agent("host-1", 2.0, 1024.0);
    let a2 = h.add_agent("host-2", 2.0, 1024.0);

    let offers = h.offers();
    assert_eq!(offers.len(), 2);

    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&offers),
            vec![task("t1", &a1, 1.0, 128.0)],
            Filters::default(),
        )
        .unwrap();
    let messages = h.drain();

    let updates = status_updates(&messages);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status.state, TaskState::Lost);
    assert_eq!(updates[0].status.reason, Some(StatusReason::InvalidOffers));
    assert!(to_agent(&messages, &a1).is_empty());
    assert!(to_agent(&messages, &a2).is_empty());

    // Both offers are gone and their resources released
    assert!(h.coordinator.outstanding_offers().is_empty());
    assert_eq!(h.offered_cpus(&a1), 0.0);
    assert_eq!(h.offered_cpus(&a2), 0.0);
    assert_eq!(h.used_cpus(&a1), 0.0);
}

#[test]
fn test_duplicate_offer_ids_are_invalid() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 2.0, 1024.0);
    let offers = h.offers();
    let id = offers[0].id;

    h.coordinator
        .launch_tasks(
            &framework_id,
            vec![id, id],
            vec![task("t1", &agent_id, 1.0, 128.0)],
            Filters::default(),
        )
        .unwrap();
    let messages = h.drain();

    let updates = status_updates(&messages);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status.reason, Some(StatusReason::InvalidOffers));
    assert!(to_agent(&messages, &agent_id).is_empty());
    assert_eq!(h.offered_cpus(&agent_id), 0.0);
    assert!(h.coordinator.ledger().holds());
}

#[test]
fn test_combined_offers_fit_larger_task() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 2.0, 1024.0);

    // Split the agent into two outstanding offers of 1 cpu / 512 each
    let first = h.offers();
    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&first),
            vec![task("t0", &agent_id, 1.0, 512.0)],
            Filters::refuse_for(Duration::ZERO),
        )
        .unwrap();
    h.drain();
    let second = h.offers();
    h.update(&framework_id, &agent_id, "t0", TaskState::Finished);
    h.drain();
    let third = h.offers();
    assert_eq!(second.len(), 1);
    assert_eq!(third.len(), 1);
    assert_eq!(second[0].resources.cpus(), 1.0);
    assert_eq!(third[0].resources.cpus(), 1.0);

    h.coordinator
        .launch_tasks(
            &framework_id,
            vec![second[0].id, third[0].id],
            vec![task("t1", &agent_id, 2.0, 1024.0)],
            Filters::default(),
        )
        .unwrap();
    let messages = h.drain();

    assert!(matches!(
        to_agent(&messages, &agent_id).as_slice(),
        [AgentMessage::RunTask { .. }]
    ));
    assert!(status_updates(&messages).is_empty());
    assert_eq!(h.used_cpus(&agent_id), 2.0);
    assert_eq!(h.offered_cpus(&agent_id), 0.0);
}

#[test]
fn test_invalid_task_rejected_without_failing_batch() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 2.0, 1024.0);
    let offers = h.offers();

    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&offers),
            vec![
                task("big", &agent_id, 8.0, 128.0),
                task("small", &agent_id, 1.0, 128.0),
            ],
            Filters::default(),
        )
        .unwrap();
    let messages = h.drain();

    let updates = status_updates(&messages);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status.task_id, TaskId::new("big"));
    assert_eq!(updates[0].status.state, TaskState::Error);
    assert_eq!(updates[0].status.reason, Some(StatusReason::InvalidTask));
    assert_eq!(to_agent(&messages, &agent_id).len(), 1);
    assert_eq!(h.used_cpus(&agent_id), 1.0);
}

#[test]
fn test_decline_filter_blocks_reoffer_until_elapsed() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    h.add_agent("host-1", 2.0, 1024.0);

    let offers = h.offers();
    h.coordinator
        .decline_offer(
            &framework_id,
            &offers[0].id,
            Filters::refuse_for(Duration::from_secs(10)),
        )
        .unwrap();

    assert!(h.offers().is_empty());
    h.advance(9);
    assert!(h.offers().is_empty());
    h.advance(2);
    assert_eq!(h.offers().len(), 1);
}

#[test]
fn test_decline_without_filter_uses_default_refusal() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    h.add_agent("host-1", 2.0, 1024.0);

    let offers = h.offers();
    h.coordinator
        .decline_offer(&framework_id, &offers[0].id, Filters::default())
        .unwrap();
    assert!(h.offers().is_empty());

    h.advance(6);
    assert_eq!(h.offers().len(), 1);
}

#[test]
fn test_revive_clears_refusals() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    h.add_agent("host-1", 2.0, 1024.0);

    let offers = h.offers();
    h.coordinator
        .decline_offer(
            &framework_id,
            &offers[0].id,
            Filters::refuse_for(Duration::from_secs(3600)),
        )
        .unwrap();
    assert!(h.offers().is_empty());

    h.coordinator.revive_offers(&framework_id).unwrap();
    assert_eq!(h.offers().len(), 1);
}

#[test]
fn test_offer_expires_and_is_rescinded() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 2.0, 1024.0);
    let offers = h.offers();

    h.clock.advance(Duration::from_secs(31));
    h.coordinator.tick().unwrap();
    let messages = h.drain();

    assert!(messages.contains(&Outbound::framework(
        framework_id.clone(),
        FrameworkMessage::RescindOffer {
            offer_id: offers[0].id
        }
    )));
    assert!(h.coordinator.outstanding_offers().is_empty());
    assert_eq!(h.offered_cpus(&agent_id), 0.0);

    // Launching against the rescinded offer fails as invalid
    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&offers),
            vec![task("t1", &agent_id, 1.0, 128.0)],
            Filters::default(),
        )
        .unwrap();
    let updates = status_updates(&h.drain());
    assert_eq!(updates[0].status.reason, Some(StatusReason::InvalidOffers));
}

#[test]
fn test_whitelist_excludes_hosts() {
    let mut h = Harness::new();
    h.add_framework("batch");
    h.add_agent("host-1", 2.0, 1024.0);

    h.coordinator
        .update_whitelist(Some(["host-2".to_string()].into_iter().collect()))
        .unwrap();
    assert!(h.offers().is_empty());

    h.coordinator.update_whitelist(None).unwrap();
    assert_eq!(h.offers().len(), 1);
}

#[test]
fn test_filtered_resources_never_offered() {
    let mut h = Harness::new();
    h.add_framework("batch");
    let agent_id = h
        .coordinator
        .register_agent(
            "host-1",
            resources(2.0, 1024.0).with_ranges("ephemeral_ports", &[(30000, 31000)]),
            0,
        )
        .unwrap();
    h.settle().unwrap();
    h.drain();

    let offers = h.offers();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].agent_id, agent_id);
    assert!(offers[0].resources.get("ephemeral_ports").is_none());
}

#[test]
fn test_same_port_never_offered_twice() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h
        .coordinator
        .register_agent(
            "host-1",
            resources(2.0, 1024.0).with_ranges("ports", &[(31000, 31000)]),
            0,
        )
        .unwrap();
    h.settle().unwrap();
    h.drain();

    let port = Resources::new().with_ranges("ports", &[(31000, 31000)]);
    h.coordinator
        .create_offer(&framework_id, &agent_id, port.clone())
        .unwrap();
    let err = h
        .coordinator
        .create_offer(&framework_id, &agent_id, port)
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Invariant(_)));
    assert_eq!(h.coordinator.outstanding_offers().len(), 1);
    assert!(h.coordinator.ledger().holds());
}

// ========== Status updates ==========

#[test]
fn test_terminal_update_recovers_without_ack() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 4.0, 4096.0);
    let offers = h.offers();
    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&offers),
            vec![task("t1", &agent_id, 2.0, 1024.0)],
            Filters::refuse_for(Duration::ZERO),
        )
        .unwrap();
    h.drain();
    assert_eq!(h.used_cpus(&agent_id), 2.0);

    h.update(&framework_id, &agent_id, "t1", TaskState::Running);
    h.update(&framework_id, &agent_id, "t1", TaskState::Failed);
    let messages = h.drain();

    assert_eq!(status_updates(&messages).len(), 2);
    assert_eq!(h.used_cpus(&agent_id), 0.0);
    // Still tracked until acknowledged
    let task = h
        .coordinator
        .task(&framework_id, &TaskId::new("t1"))
        .unwrap();
    assert_eq!(task.state, TaskState::Failed);

    let offers = h.offers();
    assert_eq!(offers[0].resources.cpus(), 4.0);
}

#[test]
fn test_latest_state_retransmission_recovers_once() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 4.0, 4096.0);
    let offers = h.offers();
    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&offers),
            vec![task("t1", &agent_id, 2.0, 1024.0)],
            Filters::refuse_for(Duration::ZERO),
        )
        .unwrap();
    h.drain();

    // A retransmitted RUNNING update whose latest state is already FINISHED
    let status = TaskStatus::new(TaskId::new("t1"), TaskState::Running, h.clock.now())
        .with_agent(agent_id.clone());
    let update =
        StatusUpdate::new(framework_id.clone(), status).with_latest_state(TaskState::Finished);
    h.coordinator.status_update(&agent_id, update).unwrap();
    assert_eq!(h.used_cpus(&agent_id), 0.0);
    let recorded = h
        .coordinator
        .task(&framework_id, &TaskId::new("t1"))
        .unwrap();
    assert_eq!(recorded.state, TaskState::Finished);
    assert_eq!(
        recorded.last_status.as_ref().map(|s| s.state),
        Some(TaskState::Finished)
    );

    // The FINISHED update itself arrives later and recovers nothing more
    h.update(&framework_id, &agent_id, "t1", TaskState::Finished);
    assert_eq!(h.used_cpus(&agent_id), 0.0);
    assert!(h.coordinator.ledger().holds());

    let offers = h.offers();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].resources.cpus(), 4.0);
}

#[test]
fn test_update_relayed_by_another_agent_is_ignored() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let owner = h.add_agent("host-1", 2.0, 1024.0);
    let offers = h.offers();
    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&offers),
            vec![task("t1", &owner, 1.0, 512.0)],
            Filters::refuse_for(Duration::ZERO),
        )
        .unwrap();
    h.update(&framework_id, &owner, "t1", TaskState::Running);
    let other = h.add_agent("host-2", 2.0, 1024.0);
    h.drain();

    h.update(&framework_id, &other, "t1", TaskState::Finished);

    assert!(status_updates(&h.drain()).is_empty());
    assert_eq!(
        h.coordinator
            .task(&framework_id, &TaskId::new("t1"))
            .map(|t| t.state),
        Some(TaskState::Running)
    );
    assert_eq!(h.used_cpus(&owner), 1.0);
}

#[test]
fn test_acknowledged_terminal_task_is_archived() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 2.0, 1024.0);
    let offers = h.offers();
    h.coordinator
        .launch_tasks(
            &framework_id,
            offer_ids(&offers),
            vec![task("t1", &agent_id, 1.0, 128.0)],
            Filters::default(),
        )
        .unwrap();
    h.drain();

    let running = h.update(&framework_id, &agent_id, "t1", TaskState::Running);
    let finished = h.update(&framework_id, &agent_id, "t1", TaskState::Finished);
    h.drain();

    // Acknowledging a non-terminal update keeps the task
    h.coordinator
        .acknowledge(&framework_id, &TaskId::new("t1"), running.id)
        .unwrap();
    assert!(h.coordinator.task(&framework_id, &TaskId::new("t1")).is_some());

    h.coordinator
        .acknowledge(&framework_id, &TaskId::new("t1"), finished.id)
        .unwrap();
    let messages = h.drain();

    assert!(to_agent(&messages, &agent_id).contains(&AgentMessage::StatusUpdateAcknowledgement {
        framework_id: framework_id.clone(),
        task_id: TaskId::new("t1"),
        status_id: finished.id,
    }));
    assert!(h.coordinator.task(&framework_id, &TaskId::new("t1")).is_none());

    let snapshot = h.coordinator.snapshot();
    let framework = snapshot.framework(&framework_id).unwrap();
    assert!(framework.tasks.is_empty());
    assert_eq!(framework.completed_tasks.len(), 1);
}

// ========== Agent failover ==========

fn launch_one(h: &mut Harness, framework_id: &FrameworkId, agent_id: &AgentId, id: &str) -> TaskInfo {
    let offers = h.offers();
    let info = task(id, agent_id, 1.0, 256.0);
    h.coordinator
        .launch_tasks(
            framework_id,
            offer_ids(&offers),
            vec![info.clone()],
            Filters::refuse_for(Duration::ZERO),
        )
        .unwrap();
    h.update(framework_id, agent_id, id, TaskState::Running);
    h.drain();
    info
}

#[test]
fn test_reregistration_before_timeout_keeps_tasks() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 4.0, 4096.0);
    let info = launch_one(&mut h, &framework_id, &agent_id, "t1");

    h.coordinator.agent_disconnected(&agent_id).unwrap();
    h.advance(300);

    let agent = AgentInfo::new("host-1", resources(4.0, 4096.0)).with_id(agent_id.clone());
    h.coordinator
        .reregister_agent(agent, vec![running(&framework_id, info)])
        .unwrap();
    h.settle().unwrap();
    let messages = h.drain();

    assert_eq!(h.coordinator.agent_state(&agent_id), Some(AgentState::Active));
    assert!(to_agent(&messages, &agent_id).contains(&AgentMessage::Reregistered {
        agent_id: agent_id.clone()
    }));
    assert_eq!(agent_lost_count(&messages), 0);
    assert!(status_updates(&messages).is_empty());

    // The original timeout no longer fires
    h.advance(600);
    let messages = h.drain();
    assert_eq!(agent_lost_count(&messages), 0);
    assert_eq!(
        h.coordinator
            .task(&framework_id, &TaskId::new("t1"))
            .unwrap()
            .state,
        TaskState::Running
    );
    assert_eq!(h.used_cpus(&agent_id), 1.0);
}

#[test]
fn test_reregistration_timeout_loses_tasks_once() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 4.0, 4096.0);
    launch_one(&mut h, &framework_id, &agent_id, "t1");
    launch_one(&mut h, &framework_id, &agent_id, "t2");

    h.coordinator.agent_disconnected(&agent_id).unwrap();
    h.advance(601);
    assert_eq!(h.coordinator.agent_state(&agent_id), Some(AgentState::Removed));
    h.settle().unwrap();
    let messages = h.drain();

    assert_eq!(agent_lost_count(&messages), 1);
    let updates = status_updates(&messages);
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|u| u.status.state == TaskState::Lost
        && u.status.reason == Some(StatusReason::AgentRemoved)));
    assert!(h.coordinator.agent_state(&agent_id).is_none());
    assert!(!h.registry.contains(&agent_id));
    assert!(h.coordinator.ledger().get(&agent_id).is_none());

    h.advance(600);
    assert_eq!(agent_lost_count(&h.drain()), 0);

    // A removed agent is refused if it comes back
    let agent = AgentInfo::new("host-1", resources(4.0, 4096.0)).with_id(agent_id.clone());
    h.coordinator.reregister_agent(agent, Vec::new()).unwrap();
    let messages = h.drain();
    assert!(matches!(
        to_agent(&messages, &agent_id).as_slice(),
        [AgentMessage::Shutdown { .. }]
    ));
}

#[test]
fn test_disconnect_rescinds_agent_offers() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 2.0, 1024.0);
    let offers = h.offers();

    h.coordinator.agent_disconnected(&agent_id).unwrap();
    let messages = h.drain();

    assert!(messages.contains(&Outbound::framework(
        framework_id,
        FrameworkMessage::RescindOffer {
            offer_id: offers[0].id
        }
    )));
    assert_eq!(h.offered_cpus(&agent_id), 0.0);
    assert!(h.offers().is_empty());
}

#[test]
fn test_stale_incarnation_refused() {
    let mut h = Harness::new();
    h.add_framework("batch");
    let agent_id = h
        .coordinator
        .register_agent("host-1", resources(2.0, 1024.0), 2)
        .unwrap();
    h.settle().unwrap();
    h.drain();

    let stale = AgentInfo::new("host-1", resources(2.0, 1024.0))
        .with_id(agent_id.clone())
        .with_incarnation(1);
    h.coordinator.reregister_agent(stale, Vec::new()).unwrap();
    let messages = h.drain();

    assert!(matches!(
        to_agent(&messages, &agent_id).as_slice(),
        [AgentMessage::Shutdown { .. }]
    ));
    assert_eq!(h.coordinator.agent_state(&agent_id), Some(AgentState::Active));
}

#[test]
fn test_unreported_task_lost_on_reregistration() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 4.0, 4096.0);
    let kept = launch_one(&mut h, &framework_id, &agent_id, "t1");
    launch_one(&mut h, &framework_id, &agent_id, "t2");

    let agent = AgentInfo::new("host-1", resources(4.0, 4096.0)).with_id(agent_id.clone());
    h.coordinator
        .reregister_agent(agent, vec![running(&framework_id, kept)])
        .unwrap();
    let updates = status_updates(&h.drain());

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status.task_id, TaskId::new("t2"));
    assert_eq!(updates[0].status.state, TaskState::Lost);
    assert_eq!(updates[0].status.reason, Some(StatusReason::ReconciliationLost));
    assert_eq!(h.used_cpus(&agent_id), 1.0);
}

// ========== Failover recovery ==========

fn recovered(config: CoordinatorConfig, in_registry: bool) -> (Harness, AgentInfo) {
    let info = AgentInfo::new("host-1", resources(4.0, 4096.0));
    let registry = if in_registry {
        InMemoryRegistry::with_agents([info.clone()])
    } else {
        InMemoryRegistry::new()
    };
    let mut h = Harness::with(config, registry);
    h.coordinator.recover(vec![info.clone()]);
    (h, info)
}

#[test]
fn test_orphan_tasks_adopted_by_reregistering_framework() {
    let (mut h, info) = recovered(CoordinatorConfig::default(), true);
    let agent_id = info.id.clone();
    let old_framework = FrameworkId::new("fw-before-failover");
    let reported = running(&old_framework, task("t1", &agent_id, 1.0, 256.0));

    h.coordinator
        .reregister_agent(info.clone(), vec![reported])
        .unwrap();
    assert_eq!(
        h.coordinator.agent_state(&agent_id),
        Some(AgentState::Reregistering)
    );
    h.settle().unwrap();
    assert_eq!(h.coordinator.agent_state(&agent_id), Some(AgentState::Active));

    let snapshot = h.coordinator.snapshot();
    assert_eq!(snapshot.unregistered_frameworks, vec![old_framework.clone()]);
    assert_eq!(snapshot.orphan_tasks.len(), 1);
    assert_eq!(snapshot.agent(&agent_id).unwrap().used.cpus(), 1.0);
    assert_eq!(
        h.coordinator.framework_state(&old_framework),
        Some(FrameworkState::Orphan)
    );

    h.coordinator
        .reregister_framework(&old_framework, FrameworkInfo::new("batch", "svc"))
        .unwrap();
    let snapshot = h.coordinator.snapshot();
    assert!(snapshot.unregistered_frameworks.is_empty());
    assert!(snapshot.orphan_tasks.is_empty());
    assert_eq!(snapshot.framework(&old_framework).unwrap().tasks.len(), 1);

    // Status updates now reach the adopted framework
    h.drain();
    h.update(&old_framework, &agent_id, "t1", TaskState::Finished);
    assert_eq!(status_updates(&h.drain()).len(), 1);
}

#[test]
fn test_kill_deferred_while_agents_reregister() {
    let (mut h, info) = recovered(CoordinatorConfig::default(), true);
    let agent_id = info.id.clone();
    let framework_id = h.add_framework("batch");

    // Unknown until the agent reports it
    h.coordinator
        .kill_task(&framework_id, &TaskId::new("t1"))
        .unwrap();
    assert!(h.drain().is_empty());

    let reported = running(&framework_id, task("t1", &agent_id, 1.0, 256.0));
    h.coordinator.reregister_agent(info, vec![reported]).unwrap();
    h.settle().unwrap();
    let messages = h.drain();

    assert!(to_agent(&messages, &agent_id).contains(&AgentMessage::KillTask {
        framework_id: framework_id.clone(),
        task_id: TaskId::new("t1"),
    }));
}

#[test]
fn test_kill_of_unknown_task_answered_lost() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    h.add_agent("host-1", 2.0, 1024.0);

    h.coordinator
        .kill_task(&framework_id, &TaskId::new("ghost"))
        .unwrap();
    let updates = status_updates(&h.drain());

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status.state, TaskState::Lost);
    assert_eq!(updates[0].status.reason, Some(StatusReason::TaskUnknown));
}

#[test]
fn test_deferred_kill_resolved_after_recovered_agent_times_out() {
    let (mut h, _info) = recovered(CoordinatorConfig::default(), true);
    let framework_id = h.add_framework("batch");

    h.coordinator
        .kill_task(&framework_id, &TaskId::new("t1"))
        .unwrap();
    assert!(h.drain().is_empty());

    h.advance(601);
    h.settle().unwrap();
    let updates = status_updates(&h.drain());
    assert!(updates
        .iter()
        .any(|u| u.status.task_id == TaskId::new("t1")
            && u.status.reason == Some(StatusReason::TaskUnknown)));
}

#[test]
fn test_strict_mode_refuses_agent_missing_from_registry() {
    let (mut h, info) = recovered(CoordinatorConfig::default(), false);
    let agent_id = info.id.clone();

    h.coordinator.reregister_agent(info, Vec::new()).unwrap();
    h.settle().unwrap();
    let messages = h.drain();

    assert!(matches!(
        to_agent(&messages, &agent_id).as_slice(),
        [AgentMessage::Shutdown { .. }]
    ));
    assert!(h.coordinator.agent_state(&agent_id).is_none());
}

#[test]
fn test_non_strict_mode_admits_and_removes_quietly() {
    let config = CoordinatorConfig {
        registry_strict: false,
        ..Default::default()
    };
    let (mut h, info) = recovered(config.clone(), false);
    let agent_id = info.id.clone();

    h.coordinator.reregister_agent(info, Vec::new()).unwrap();
    h.settle().unwrap();
    assert_eq!(h.coordinator.agent_state(&agent_id), Some(AgentState::Active));

    // A recovered agent that never returns is dropped without agentLost
    let (mut h, info) = recovered(config, false);
    h.add_framework("batch");
    h.advance(601);
    h.settle().unwrap();
    assert_eq!(agent_lost_count(&h.drain()), 0);
    assert!(h.coordinator.agent_state(&info.id).is_none());
}

// ========== Framework lifecycle ==========

#[test]
fn test_teardown_kills_tasks_and_shuts_down_framework() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    let agent_id = h.add_agent("host-1", 4.0, 4096.0);
    launch_one(&mut h, &framework_id, &agent_id, "t1");
    launch_one(&mut h, &framework_id, &agent_id, "t2");
    assert_eq!(h.used_cpus(&agent_id), 2.0);

    h.coordinator.unregister_framework(&framework_id).unwrap();
    let messages = h.drain();

    let shutdowns: Vec<_> = to_agent(&messages, &agent_id)
        .into_iter()
        .filter(|m| matches!(m, AgentMessage::ShutdownFramework { .. }))
        .collect();
    assert_eq!(
        shutdowns,
        vec![AgentMessage::ShutdownFramework {
            framework_id: framework_id.clone(),
            grace_period: Duration::from_secs(5),
        }]
    );
    assert_eq!(h.used_cpus(&agent_id), 0.0);
    assert!(h.coordinator.framework_state(&framework_id).is_none());
    assert!(h.coordinator.outstanding_offers().is_empty());

    let snapshot = h.coordinator.snapshot();
    let completed = &snapshot.completed_frameworks[0];
    assert_eq!(completed.id, framework_id);
    assert_eq!(completed.completed_tasks.len(), 2);
    assert!(completed
        .completed_tasks
        .iter()
        .all(|t| t.state == TaskState::Killed));

    let err = h
        .coordinator
        .reregister_framework(&framework_id, FrameworkInfo::new("batch", "svc"))
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::FrameworkRemoved(_)));
}

#[test]
fn test_disconnected_framework_rejects_calls_and_gets_no_offers() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    h.add_agent("host-1", 2.0, 1024.0);

    h.coordinator.framework_disconnected(&framework_id).unwrap();
    assert!(h.offers().is_empty());
    assert!(matches!(
        h.coordinator.revive_offers(&framework_id),
        Err(CoordinatorError::FrameworkNotRegistered(_))
    ));

    h.coordinator
        .reregister_framework(&framework_id, FrameworkInfo::new("batch", "svc"))
        .unwrap();
    assert_eq!(h.offers().len(), 1);
}

// ========== Registry failures ==========

#[test]
fn test_registry_failure_relinquishes_leadership() {
    let mut h = Harness::new();
    let framework_id = h.add_framework("batch");
    h.registry.fail_next(1);

    h.coordinator
        .register_agent("host-1", resources(2.0, 1024.0), 0)
        .unwrap();
    let err = h.settle().unwrap_err();

    assert!(matches!(err, CoordinatorError::LeadershipLost(_)));
    assert!(!h.coordinator.is_leader());
    assert!(h.drain().contains(&Outbound::framework(
        framework_id,
        FrameworkMessage::Disconnected
    )));
    assert!(matches!(
        h.coordinator.register_framework(FrameworkInfo::new("late", "svc")),
        Err(CoordinatorError::LeadershipLost(_))
    ));
    assert!(!h.coordinator.snapshot().leader);
}

// ========== Ledger invariant ==========

#[derive(Debug, Clone)]
enum Op {
    Allocate,
    Launch { cpus: u8 },
    Decline { refuse_secs: u8 },
    Finish,
    Disconnect { agent: usize },
    Reregister { agent: usize },
    Advance { secs: u16 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Allocate),
        3 => (1u8..=5).prop_map(|cpus| Op::Launch { cpus }),
        1 => (0u8..=20).prop_map(|refuse_secs| Op::Decline { refuse_secs }),
        2 => Just(Op::Finish),
        1 => (0usize..2).prop_map(|agent| Op::Disconnect { agent }),
        1 => (0usize..2).prop_map(|agent| Op::Reregister { agent }),
        2 => (1u16..=700).prop_map(|secs| Op::Advance { secs }),
    ]
}

fn apply(h: &mut Harness, framework_id: &FrameworkId, agents: &[AgentId], next_task: &mut u32, op: Op) {
    match op {
        Op::Allocate => {
            let _ = h.coordinator.allocate();
        }
        Op::Launch { cpus } => {
            let Some(offer) = h.coordinator.outstanding_offers().into_iter().next() else {
                return;
            };
            *next_task += 1;
            let mut info = task(&format!("t{}", next_task), &offer.agent_id, f64::from(cpus), 64.0);
            if let Some(Value::Ranges(ports)) = offer.resources.get("ports") {
                if let Some(first) = ports.ranges().first() {
                    info.resources = info
                        .resources
                        .with_ranges("ports", &[(first.begin, first.begin)]);
                }
            }
            let _ = h.coordinator.launch_tasks(
                framework_id,
                vec![offer.id],
                vec![info],
                Filters::refuse_for(Duration::ZERO),
            );
        }
        Op::Decline { refuse_secs } => {
            if let Some(offer) = h.coordinator.outstanding_offers().into_iter().next() {
                let _ = h.coordinator.decline_offer(
                    framework_id,
                    &offer.id,
                    Filters::refuse_for(Duration::from_secs(u64::from(refuse_secs))),
                );
            }
        }
        Op::Finish => {
            let live = h
                .coordinator
                .snapshot()
                .framework(framework_id)
                .and_then(|f| f.tasks.iter().find(|t| !t.is_terminal()).cloned());
            if let Some(task) = live {
                let status = TaskStatus::new(task.task_id.clone(), TaskState::Finished, h.clock.now())
                    .with_agent(task.agent_id.clone());
                let _ = h
                    .coordinator
                    .status_update(&task.agent_id, StatusUpdate::new(framework_id.clone(), status));
            }
        }
        Op::Disconnect { agent } => {
            let _ = h.coordinator.agent_disconnected(&agents[agent]);
        }
        Op::Reregister { agent } => {
            let snapshot = h.coordinator.snapshot();
            let Some(record) = snapshot.agent(&agents[agent]) else {
                return;
            };
            let info = AgentInfo::new(record.hostname.clone(), record.resources.clone())
                .with_id(record.id.clone())
                .with_incarnation(record.incarnation);
            let reported = snapshot
                .framework(framework_id)
                .map(|f| {
                    f.tasks
                        .iter()
                        .filter(|t| t.agent_id == record.id && !t.is_terminal())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let _ = h.coordinator.reregister_agent(info, reported);
        }
        Op::Advance { secs } => {
            h.clock.advance(Duration::from_secs(u64::from(secs)));
            let _ = h.coordinator.tick();
        }
    }
    let _ = h.settle();
    h.drain();
}

fn port_count(resources: &Resources) -> u64 {
    match resources.get("ports") {
        Some(Value::Ranges(ports)) => ports.ranges().iter().map(|r| r.end - r.begin + 1).sum(),
        _ => 0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ledger_never_overcommits(ops in prop::collection::vec(op(), 1..60)) {
        let mut h = Harness::new();
        let framework_id = h.add_framework("batch");
        let agents = vec![
            h.add_agent_with(
                "host-1",
                resources(4.0, 4096.0).with_ranges("ports", &[(31000, 31003)]),
            ),
            h.add_agent_with(
                "host-2",
                resources(2.0, 2048.0).with_ranges("ports", &[(31000, 31001)]),
            ),
        ];
        let mut next_task = 0;

        for op in ops {
            apply(&mut h, &framework_id, &agents, &mut next_task, op);

            prop_assert!(h.coordinator.ledger().holds());
            let outstanding = h.coordinator.outstanding_offers();
            for (agent_id, entry) in h.coordinator.ledger().iter() {
                let offered: f64 = outstanding
                    .iter()
                    .filter(|o| &o.agent_id == agent_id)
                    .map(|o| o.resources.cpus())
                    .sum();
                prop_assert!((entry.offered.cpus() - offered).abs() < 1e-9);

                // Outstanding offers never share a port
                let offered_ports: u64 = outstanding
                    .iter()
                    .filter(|o| &o.agent_id == agent_id)
                    .map(|o| port_count(&o.resources))
                    .sum();
                prop_assert_eq!(port_count(&entry.offered), offered_ports);
            }
        }
    }
}
