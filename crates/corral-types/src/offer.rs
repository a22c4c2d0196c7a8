//! Offer types
//!
//! An offer is a time-boxed grant of part of one agent's unallocated
//! resources to one framework. It changes disposition exactly once.

use crate::error::TransitionError;
use crate::{AgentId, FrameworkId, OfferId, Resources};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Offer identifier
    pub id: OfferId,

    /// Framework the offer was made to
    pub framework_id: FrameworkId,

    /// Agent the resources live on
    pub agent_id: AgentId,

    /// Hostname of that agent
    pub hostname: String,

    /// Offered resources
    pub resources: Resources,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Current disposition
    pub disposition: OfferDisposition,
}

/// Why the coordinator withdrew an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescindReason {
    /// Named in a launch batch rejected for invalid offers
    InvalidOffers,
    /// The agent was removed
    AgentRemoved,
    /// The agent disconnected
    AgentDeactivated,
    /// The framework disconnected
    FrameworkDeactivated,
    /// The framework was torn down
    FrameworkRemoved,
}

/// Offer disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OfferDisposition {
    /// Awaiting an answer
    Outstanding,
    /// Used by a valid launch batch
    Accepted,
    /// Declined by the framework
    Declined,
    /// Withdrawn by the coordinator
    Rescinded { reason: RescindReason },
    /// Not answered within the offer timeout
    Expired,
}

impl OfferDisposition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferDisposition::Outstanding)
    }

    /// Exactly one transition is allowed: out of `Outstanding`.
    pub fn transition(&mut self, next: OfferDisposition) -> Result<(), TransitionError> {
        match (*self, next) {
            (OfferDisposition::Outstanding, OfferDisposition::Outstanding) => {
                Err(TransitionError::new("offer", *self, next))
            }
            (OfferDisposition::Outstanding, _) => {
                *self = next;
                Ok(())
            }
            (
                OfferDisposition::Accepted
                | OfferDisposition::Declined
                | OfferDisposition::Rescinded { .. }
                | OfferDisposition::Expired,
                _,
            ) => Err(TransitionError::new("offer", *self, next)),
        }
    }
}

impl fmt::Display for OfferDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferDisposition::Outstanding => write!(f, "OUTSTANDING"),
            OfferDisposition::Accepted => write!(f, "ACCEPTED"),
            OfferDisposition::Declined => write!(f, "DECLINED"),
            OfferDisposition::Rescinded { reason } => write!(f, "RESCINDED({:?})", reason),
            OfferDisposition::Expired => write!(f, "EXPIRED"),
        }
    }
}
