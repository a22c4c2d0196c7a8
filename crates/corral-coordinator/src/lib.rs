//! Corral Coordinator - Offer and task lifecycle core
//!
//! The coordinator mediates between agents, which contribute resources and
//! run tasks, and frameworks, which receive resource offers and launch tasks
//! against them. It owns:
//!
//! - the resource ledger (`used + offered <= total` for every agent)
//! - outstanding offers and their expiry
//! - the task registry, including terminal-update bookkeeping
//! - agent and framework liveness, with failover reconciliation
//!
//! [`Coordinator`] is a synchronous state machine: every event is processed
//! to completion, producing [`Outbound`](corral_types::Outbound) messages and
//! [`RegistryRequest`]s. [`CoordinatorActor`] runs it on a tokio task,
//! resolving registry requests concurrently and feeding their answers back
//! as ordinary events.
//!
//! # Example
//!
//! ```rust,ignore
//! use corral_coordinator::{Coordinator, CoordinatorActor, CoordinatorConfig};
//!
//! let coordinator = Coordinator::new(CoordinatorConfig::default(), clock, allocator);
//! let (mut actor, handle) = CoordinatorActor::new(coordinator, registry, 1024);
//! actor.recover().await?;
//! tokio::spawn(actor.run(shutdown_rx));
//!
//! let framework_id = handle.register_framework(info).await?;
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod actor;
pub mod agents;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod frameworks;
pub mod ledger;
pub mod offers;
pub mod snapshot;
pub mod tasks;
pub mod timers;

// Re-exports
pub use actor::{Command, CoordinatorActor, CoordinatorHandle};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, RegistryRequest, Ticket};
pub use error::{CoordinatorError, Result};
pub use ledger::{AgentLedger, ResourceLedger};
pub use snapshot::{AgentSnapshot, FrameworkSnapshot, StateSnapshot};
