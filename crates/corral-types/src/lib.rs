//! Corral Types - Core types for the cluster resource coordinator
//!
//! Corral matches resources pooled by a fleet of agents against demand from
//! competing frameworks. This crate holds the vocabulary every other Corral
//! crate speaks.
//!
//! ## Key Concepts
//!
//! - **Resources**: named scalars, port ranges and string sets
//! - **Agent**: a fleet member contributing resources and running tasks
//! - **Framework**: a client receiving offers and launching tasks
//! - **Offer**: a time-boxed grant of one agent's resources to one framework
//! - **Task**: a unit of work with a forward-only state machine
//! - **Clock**: virtualizable time for every coordinator timer

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod agent;
pub mod clock;
pub mod error;
pub mod filters;
pub mod framework;
pub mod ids;
pub mod messages;
pub mod offer;
pub mod resources;
pub mod task;

// Re-export main types
pub use agent::{AgentInfo, AgentState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::TransitionError;
pub use filters::Filters;
pub use framework::{FrameworkInfo, FrameworkState};
pub use ids::{AgentId, FrameworkId, OfferId, StatusId, TaskId, TaskKey};
pub use messages::{AgentMessage, FrameworkMessage, Outbound};
pub use offer::{Offer, OfferDisposition, RescindReason};
pub use resources::{Range, RangeSet, ResourceError, ResourceResult, Resources, Value};
pub use task::{
    DiscoveryInfo, StatusReason, StatusUpdate, Task, TaskInfo, TaskState, TaskStatus,
};
