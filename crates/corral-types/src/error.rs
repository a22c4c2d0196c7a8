//! Errors shared by the record types

use thiserror::Error;

/// An attempted state change that the entity's state machine forbids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal {entity} transition from {from} to {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

impl TransitionError {
    pub fn new(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
