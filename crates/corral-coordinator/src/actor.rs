//! Actor runtime
//!
//! Serializes every event through one task that owns the [`Coordinator`].
//! Registry writes run as spawned futures whose answers come back through the
//! same queue, so the coordinator never waits on I/O while handling an event.
//! Outbound messages are published on a broadcast channel for the transport.

use crate::coordinator::{Coordinator, RegistryRequest, Ticket};
use crate::error::{CoordinatorError, Result};
use crate::snapshot::StateSnapshot;
use corral_registry::{Registry, RegistryError};
use corral_types::{
    AgentId, AgentInfo, Filters, FrameworkId, FrameworkInfo, OfferId, Outbound, Resources,
    StatusId, StatusUpdate, Task, TaskId, TaskInfo,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// How often due timers are checked
const TIMER_RESOLUTION: Duration = Duration::from_millis(100);

/// Capacity of the outbound broadcast channel
const OUTBOUND_CAPACITY: usize = 1024;

/// Requests that need only an acknowledgement
#[derive(Debug, Clone)]
pub enum Command {
    ReregisterFramework {
        framework_id: FrameworkId,
        info: FrameworkInfo,
    },
    UnregisterFramework {
        framework_id: FrameworkId,
    },
    FrameworkDisconnected {
        framework_id: FrameworkId,
    },
    LaunchTasks {
        framework_id: FrameworkId,
        offer_ids: Vec<OfferId>,
        tasks: Vec<TaskInfo>,
        filters: Filters,
    },
    DeclineOffer {
        framework_id: FrameworkId,
        offer_id: OfferId,
        filters: Filters,
    },
    ReviveOffers {
        framework_id: FrameworkId,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    Acknowledge {
        framework_id: FrameworkId,
        task_id: TaskId,
        status_id: StatusId,
    },
    ReregisterAgent {
        info: AgentInfo,
        tasks: Vec<Task>,
    },
    AgentDisconnected {
        agent_id: AgentId,
    },
    StatusUpdate {
        agent_id: AgentId,
        update: StatusUpdate,
    },
    UpdateWhitelist {
        whitelist: Option<BTreeSet<String>>,
    },
}

impl Command {
    fn apply(self, coordinator: &mut Coordinator) -> Result<()> {
        match self {
            Command::ReregisterFramework { framework_id, info } => {
                coordinator.reregister_framework(&framework_id, info)
            }
            Command::UnregisterFramework { framework_id } => {
                coordinator.unregister_framework(&framework_id)
            }
            Command::FrameworkDisconnected { framework_id } => {
                coordinator.framework_disconnected(&framework_id)
            }
            Command::LaunchTasks {
                framework_id,
                offer_ids,
                tasks,
                filters,
            } => coordinator.launch_tasks(&framework_id, offer_ids, tasks, filters),
            Command::DeclineOffer {
                framework_id,
                offer_id,
                filters,
            } => coordinator.decline_offer(&framework_id, &offer_id, filters),
            Command::ReviveOffers { framework_id } => coordinator.revive_offers(&framework_id),
            Command::KillTask {
                framework_id,
                task_id,
            } => coordinator.kill_task(&framework_id, &task_id),
            Command::Acknowledge {
                framework_id,
                task_id,
                status_id,
            } => coordinator.acknowledge(&framework_id, &task_id, status_id),
            Command::ReregisterAgent { info, tasks } => coordinator.reregister_agent(info, tasks),
            Command::AgentDisconnected { agent_id } => coordinator.agent_disconnected(&agent_id),
            Command::StatusUpdate { agent_id, update } => {
                coordinator.status_update(&agent_id, update)
            }
            Command::UpdateWhitelist { whitelist } => coordinator.update_whitelist(whitelist),
        }
    }
}

enum Event {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<()>>,
    },
    RegisterFramework {
        info: FrameworkInfo,
        reply: oneshot::Sender<Result<FrameworkId>>,
    },
    RegisterAgent {
        hostname: String,
        resources: Resources,
        incarnation: u64,
        reply: oneshot::Sender<Result<AgentId>>,
    },
    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },
    RegistryCompleted {
        ticket: Ticket,
        result: std::result::Result<bool, RegistryError>,
    },
}

/// Clonable handle for submitting events to the coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Event>,
    outbound: broadcast::Sender<Outbound>,
}

impl CoordinatorHandle {
    /// Receive every message the coordinator sends from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound.subscribe()
    }

    pub async fn register_framework(&self, info: FrameworkInfo) -> Result<FrameworkId> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::RegisterFramework { info, reply }).await?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)?
    }

    pub async fn register_agent(
        &self,
        hostname: impl Into<String>,
        resources: Resources,
        incarnation: u64,
    ) -> Result<AgentId> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::RegisterAgent {
            hostname: hostname.into(),
            resources,
            incarnation,
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)?
    }

    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Snapshot { reply }).await?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Submit a command and wait for it to be processed
    pub async fn execute(&self, command: Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Command { command, reply }).await?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)?
    }

    pub async fn launch_tasks(
        &self,
        framework_id: FrameworkId,
        offer_ids: Vec<OfferId>,
        tasks: Vec<TaskInfo>,
        filters: Filters,
    ) -> Result<()> {
        self.execute(Command::LaunchTasks {
            framework_id,
            offer_ids,
            tasks,
            filters,
        })
        .await
    }

    pub async fn status_update(&self, agent_id: AgentId, update: StatusUpdate) -> Result<()> {
        self.execute(Command::StatusUpdate { agent_id, update }).await
    }

    pub async fn update_whitelist(&self, whitelist: Option<BTreeSet<String>>) -> Result<()> {
        self.execute(Command::UpdateWhitelist { whitelist }).await
    }

    async fn send(&self, event: Event) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }
}

/// Owns the coordinator and runs its event loop
pub struct CoordinatorActor {
    coordinator: Coordinator,
    registry: Arc<dyn Registry>,
    rx: mpsc::Receiver<Event>,
    /// Weak so that dropping every handle ends the loop
    tx: mpsc::WeakSender<Event>,
    outbound: broadcast::Sender<Outbound>,
}

impl CoordinatorActor {
    pub fn new(
        coordinator: Coordinator,
        registry: Arc<dyn Registry>,
        capacity: usize,
    ) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        let actor = Self {
            coordinator,
            registry,
            rx,
            tx: tx.downgrade(),
            outbound: outbound.clone(),
        };
        let handle = CoordinatorHandle { tx, outbound };
        (actor, handle)
    }

    /// Load the fleet from the registry. Called once, before [`run`](Self::run).
    pub async fn recover(&mut self) -> Result<usize> {
        let agents = self.registry.recover_agents().await.map_err(|e| {
            error!(error = %e, "Failed to recover agents from registry");
            CoordinatorError::LeadershipLost(format!("Registry recovery failed: {}", e))
        })?;
        let count = agents.len();
        self.coordinator.recover(agents);
        Ok(count)
    }

    /// Process events until shutdown. Returns `LeadershipLost` if a registry
    /// failure forced the coordinator to step down.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut allocation = tokio::time::interval(self.coordinator.config().allocation_interval);
        allocation.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut timers = tokio::time::interval(TIMER_RESOLUTION);
        timers.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Coordinator started");

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => {
                            info!("All coordinator handles dropped");
                            break;
                        }
                    }
                }
                _ = timers.tick() => {
                    if let Err(e) = self.coordinator.tick() {
                        warn!(error = %e, "Timer processing failed");
                    }
                }
                _ = allocation.tick() => {
                    match self.coordinator.allocate() {
                        Ok(0) => {}
                        Ok(count) => debug!(offers = count, "Allocation cycle"),
                        Err(e) => warn!(error = %e, "Allocation cycle failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Coordinator shutting down");
                    break;
                }
            }

            self.flush();

            if let Some(reason) = self.coordinator.deposed_reason() {
                return Err(CoordinatorError::LeadershipLost(reason.to_string()));
            }
        }

        self.flush();
        Ok(())
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Command { command, reply } => {
                let result = command.apply(&mut self.coordinator);
                if let Err(e) = &result {
                    debug!(error = %e, "Command rejected");
                }
                let _ = reply.send(result);
            }
            Event::RegisterFramework { info, reply } => {
                let _ = reply.send(self.coordinator.register_framework(info));
            }
            Event::RegisterAgent {
                hostname,
                resources,
                incarnation,
                reply,
            } => {
                let result = self
                    .coordinator
                    .register_agent(&hostname, resources, incarnation);
                let _ = reply.send(result);
            }
            Event::Snapshot { reply } => {
                let _ = reply.send(self.coordinator.snapshot());
            }
            Event::RegistryCompleted { ticket, result } => {
                if let Err(e) = self.coordinator.registry_completed(ticket, result) {
                    error!(ticket = ticket, error = %e, "Registry completion failed");
                }
            }
        }
    }

    /// Publish queued messages and start queued registry writes
    fn flush(&mut self) {
        for message in self.coordinator.drain_outbox() {
            if self.outbound.send(message).is_err() {
                debug!("No transport subscribed; message dropped");
            }
        }

        for (ticket, request) in self.coordinator.drain_registry_requests() {
            let Some(tx) = self.tx.upgrade() else {
                debug!(ticket = ticket, "No coordinator handles left; registry write skipped");
                continue;
            };
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                let result = match request {
                    RegistryRequest::Admit(info) => registry.admit_agent(info).await,
                    RegistryRequest::Readmit(info) => registry.readmit_agent(info).await,
                    RegistryRequest::Remove(agent_id) => registry.remove_agent(&agent_id).await,
                };
                if tx
                    .send(Event::RegistryCompleted { ticket, result })
                    .await
                    .is_err()
                {
                    debug!(ticket = ticket, "Coordinator stopped before registry completion");
                }
            });
        }
    }
}
