//! Framework types

use crate::error::TransitionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Framework description supplied at (re)registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    /// Human-readable name
    pub name: String,

    /// User the framework's tasks run as
    pub user: String,

    /// Hostname of the scheduler process
    #[serde(default)]
    pub hostname: Option<String>,

    /// Web UI exposed by the framework, if any
    #[serde(default)]
    pub webui_url: Option<String>,
}

impl FrameworkInfo {
    pub fn new(name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            hostname: None,
            webui_url: None,
        }
    }
}

/// Framework registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkState {
    /// Connected and receiving offers
    Registered,

    /// Connection lost; tasks keep running until the framework comes back
    Disconnected,

    /// Known only through tasks reported by agents after failover
    Orphan,

    /// Torn down; kept for history only
    Completed,
}

impl FrameworkState {
    pub fn can_transition_to(&self, next: FrameworkState) -> bool {
        use FrameworkState::*;
        match self {
            Registered => matches!(next, Disconnected | Completed),
            Disconnected => matches!(next, Registered | Completed),
            Orphan => matches!(next, Registered),
            Completed => false,
        }
    }

    pub fn transition(&mut self, next: FrameworkState) -> Result<(), TransitionError> {
        if !self.can_transition_to(next) {
            return Err(TransitionError::new("framework", *self, next));
        }
        *self = next;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, FrameworkState::Registered)
    }
}

impl fmt::Display for FrameworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameworkState::Registered => "REGISTERED",
            FrameworkState::Disconnected => "DISCONNECTED",
            FrameworkState::Orphan => "ORPHAN",
            FrameworkState::Completed => "COMPLETED",
        };
        write!(f, "{}", s)
    }
}
