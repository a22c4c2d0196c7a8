//! Task types
//!
//! Tasks are identified by (framework, task id). Their state only moves
//! forward: STAGING -> STARTING -> RUNNING -> one of the terminal states.

use crate::{AgentId, FrameworkId, Resources, StatusId, TaskId, TaskKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        match self {
            TaskState::Staging | TaskState::Starting | TaskState::Running => false,
            TaskState::Finished
            | TaskState::Failed
            | TaskState::Killed
            | TaskState::Lost
            | TaskState::Error => true,
        }
    }

    fn progress(&self) -> u8 {
        match self {
            TaskState::Staging => 0,
            TaskState::Starting => 1,
            TaskState::Running => 2,
            TaskState::Finished
            | TaskState::Failed
            | TaskState::Killed
            | TaskState::Lost
            | TaskState::Error => 3,
        }
    }

    /// Whether a task currently in this state moves to `next`.
    ///
    /// Terminal states absorb everything; a terminal `next` always applies to a
    /// non-terminal task; otherwise `next` must be strictly further along.
    pub fn accepts(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.progress() > self.progress()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Staging => "TASK_STAGING",
            TaskState::Starting => "TASK_STARTING",
            TaskState::Running => "TASK_RUNNING",
            TaskState::Finished => "TASK_FINISHED",
            TaskState::Failed => "TASK_FAILED",
            TaskState::Killed => "TASK_KILLED",
            TaskState::Lost => "TASK_LOST",
            TaskState::Error => "TASK_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Reason codes attached to coordinator-generated status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusReason {
    /// The launch batch named missing, terminal, duplicate or cross-agent offers
    InvalidOffers,
    /// The task asked for more than the offers provided, or reused a task id
    InvalidTask,
    /// The agent hosting the task was removed
    AgentRemoved,
    /// The agent reregistered without reporting the task
    ReconciliationLost,
    /// A kill named a task the coordinator has never seen
    TaskUnknown,
    /// The framework was torn down
    FrameworkRemoved,
}

/// Discovery metadata published with a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub name: Option<String>,
    pub environment: Option<String>,
    #[serde(default)]
    pub ports: Vec<u64>,
}

/// A framework's request to run a task, part of a launch batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    pub agent_id: AgentId,
    pub resources: Resources,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub discovery: Option<DiscoveryInfo>,
}

impl TaskInfo {
    pub fn new(task_id: impl Into<String>, agent_id: AgentId, resources: Resources) -> Self {
        let task_id = TaskId::new(task_id);
        Self {
            name: task_id.as_str().to_string(),
            task_id,
            agent_id,
            resources,
            labels: BTreeMap::new(),
            discovery: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A single observation of a task's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub agent_id: Option<AgentId>,
    pub state: TaskState,
    pub reason: Option<StatusReason>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    pub fn new(task_id: TaskId, state: TaskState, timestamp: DateTime<Utc>) -> Self {
        Self {
            task_id,
            agent_id: None,
            state,
            reason: None,
            message: None,
            timestamp,
        }
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_reason(mut self, reason: StatusReason, message: impl Into<String>) -> Self {
        self.reason = Some(reason);
        self.message = Some(message.into());
        self
    }
}

/// A status update as it travels agent -> coordinator -> framework.
///
/// Retransmissions carry the task's newest known state in `latest_state`,
/// which can be further along than the nominal `status.state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: StatusId,
    pub framework_id: FrameworkId,
    pub status: TaskStatus,
    #[serde(default)]
    pub latest_state: Option<TaskState>,
}

impl StatusUpdate {
    pub fn new(framework_id: FrameworkId, status: TaskStatus) -> Self {
        Self {
            id: StatusId::generate(),
            framework_id,
            status,
            latest_state: None,
        }
    }

    pub fn with_latest_state(mut self, state: TaskState) -> Self {
        self.latest_state = Some(state);
        self
    }

    /// The state that governs the coordinator's bookkeeping
    pub fn effective_state(&self) -> TaskState {
        self.latest_state.unwrap_or(self.status.state)
    }

    pub fn task_key(&self) -> TaskKey {
        TaskKey::new(self.framework_id.clone(), self.status.task_id.clone())
    }
}

/// The coordinator's record of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub framework_id: FrameworkId,
    pub task_id: TaskId,
    pub name: String,
    pub agent_id: AgentId,
    pub resources: Resources,
    pub state: TaskState,
    pub labels: BTreeMap<String, String>,
    pub discovery: Option<DiscoveryInfo>,
    pub last_status: Option<TaskStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn from_info(framework_id: FrameworkId, info: TaskInfo, now: DateTime<Utc>) -> Self {
        Self {
            framework_id,
            task_id: info.task_id,
            name: info.name,
            agent_id: info.agent_id,
            resources: info.resources,
            state: TaskState::Staging,
            labels: info.labels,
            discovery: info.discovery,
            last_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.framework_id.clone(), self.task_id.clone())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
