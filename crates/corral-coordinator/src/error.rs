//! Error types for the coordinator

use corral_types::{AgentId, FrameworkId, ResourceError, TransitionError};
use thiserror::Error;

/// Coordinator error type
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The framework has never registered with this coordinator
    #[error("Framework not found: {0}")]
    FrameworkNotFound(FrameworkId),

    /// The framework exists but is not currently registered
    #[error("Framework not registered: {0}")]
    FrameworkNotRegistered(FrameworkId),

    /// The framework was torn down and cannot come back
    #[error("Framework removed: {0}")]
    FrameworkRemoved(FrameworkId),

    /// The agent is unknown
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Resource accounting would break `used + offered <= total`
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Resource arithmetic failed
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// A state machine refused a transition
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// A durable-store failure forced the coordinator to step down
    #[error("Leadership lost: {0}")]
    LeadershipLost(String),

    /// The coordinator actor is gone
    #[error("Coordinator channel closed")]
    ChannelClosed,
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl CoordinatorError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }
}
