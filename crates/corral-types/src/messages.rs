//! Protocol messages sent by the coordinator
//!
//! The coordinator never talks to the network itself. It emits [`Outbound`]
//! envelopes which the transport layer delivers (and retransmits) to the
//! addressed framework or agent.

use crate::{
    AgentId, FrameworkId, FrameworkInfo, Offer, OfferId, StatusId, StatusUpdate, TaskId, TaskInfo,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Notifications and replies to frameworks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameworkMessage {
    Registered { framework_id: FrameworkId },
    Reregistered { framework_id: FrameworkId },
    ResourceOffers { offers: Vec<Offer> },
    RescindOffer { offer_id: OfferId },
    StatusUpdate { update: StatusUpdate },
    AgentLost { agent_id: AgentId },
    Error { message: String },
    /// The coordinator lost leadership; the framework should find the new one
    Disconnected,
}

/// Commands and replies to agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Registered {
        agent_id: AgentId,
    },
    Reregistered {
        agent_id: AgentId,
    },
    RunTask {
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        task: TaskInfo,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    ShutdownFramework {
        framework_id: FrameworkId,
        grace_period: Duration,
    },
    StatusUpdateAcknowledgement {
        framework_id: FrameworkId,
        task_id: TaskId,
        status_id: StatusId,
    },
    /// Refusal: the agent process must exit
    Shutdown {
        reason: String,
    },
}

/// An addressed message awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "to", rename_all = "snake_case")]
pub enum Outbound {
    Framework {
        framework_id: FrameworkId,
        message: FrameworkMessage,
    },
    Agent {
        agent_id: AgentId,
        message: AgentMessage,
    },
}

impl Outbound {
    pub fn framework(framework_id: FrameworkId, message: FrameworkMessage) -> Self {
        Outbound::Framework {
            framework_id,
            message,
        }
    }

    pub fn agent(agent_id: AgentId, message: AgentMessage) -> Self {
        Outbound::Agent { agent_id, message }
    }
}
