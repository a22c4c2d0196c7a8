//! Task registry
//!
//! Owns live task records keyed by (framework, task id), the per-agent index,
//! the kills waiting on reconciliation, and a bounded per-framework history
//! of archived tasks.

use chrono::{DateTime, Utc};
use corral_types::{AgentId, FrameworkId, StatusId, Task, TaskKey, TaskState, TaskStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Result of applying a state observation to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The task moved; `first_terminal` is set the one time it becomes terminal
    Progressed { first_terminal: bool },
    /// The observation was not newer than the recorded state
    Stale,
}

#[derive(Debug)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskKey, Task>,
    by_agent: BTreeMap<AgentId, BTreeSet<TaskKey>>,
    /// Id of the terminal status update whose acknowledgement archives the task
    terminal_updates: HashMap<TaskKey, StatusId>,
    pending_kills: BTreeSet<TaskKey>,
    completed: BTreeMap<FrameworkId, VecDeque<Task>>,
    max_completed: usize,
}

impl TaskRegistry {
    pub fn new(max_completed: usize) -> Self {
        Self {
            tasks: BTreeMap::new(),
            by_agent: BTreeMap::new(),
            terminal_updates: HashMap::new(),
            pending_kills: BTreeSet::new(),
            completed: BTreeMap::new(),
            max_completed,
        }
    }

    /// Returns false, leaving the registry untouched, if the key is taken
    pub fn insert(&mut self, task: Task) -> bool {
        let key = task.key();
        if self.tasks.contains_key(&key) {
            return false;
        }
        self.by_agent
            .entry(task.agent_id.clone())
            .or_default()
            .insert(key.clone());
        self.tasks.insert(key, task);
        true
    }

    pub fn get(&self, key: &TaskKey) -> Option<&Task> {
        self.tasks.get(key)
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn for_agent(&self, agent_id: &AgentId) -> Vec<TaskKey> {
        self.by_agent
            .get(agent_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn for_framework(&self, framework_id: &FrameworkId) -> Vec<TaskKey> {
        self.tasks
            .keys()
            .filter(|key| &key.framework_id == framework_id)
            .cloned()
            .collect()
    }

    /// Apply `state` if it progresses the task. `None` for an unknown task.
    /// The recorded status carries `state` even when the observation's
    /// nominal state is older.
    pub fn apply(
        &mut self,
        key: &TaskKey,
        state: TaskState,
        mut status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Option<StatusOutcome> {
        let task = self.tasks.get_mut(key)?;
        if !task.state.accepts(state) {
            return Some(StatusOutcome::Stale);
        }
        status.state = state;
        task.state = state;
        task.last_status = Some(status);
        task.updated_at = now;
        Some(StatusOutcome::Progressed {
            first_terminal: state.is_terminal(),
        })
    }

    /// Remember which update carries the task's terminal state. The first
    /// one recorded wins.
    pub fn record_terminal_update(&mut self, key: &TaskKey, status_id: StatusId) {
        if self.tasks.contains_key(key) {
            self.terminal_updates.entry(key.clone()).or_insert(status_id);
        }
    }

    pub fn terminal_update(&self, key: &TaskKey) -> Option<StatusId> {
        self.terminal_updates.get(key).copied()
    }

    /// Move a task to its framework's completed history
    pub fn archive(&mut self, key: &TaskKey) -> Option<Task> {
        let task = self.tasks.remove(key)?;
        if let Some(keys) = self.by_agent.get_mut(&task.agent_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_agent.remove(&task.agent_id);
            }
        }
        self.terminal_updates.remove(key);
        self.pending_kills.remove(key);

        let history = self.completed.entry(task.framework_id.clone()).or_default();
        history.push_back(task.clone());
        while history.len() > self.max_completed {
            history.pop_front();
        }
        Some(task)
    }

    pub fn completed(&self, framework_id: &FrameworkId) -> impl Iterator<Item = &Task> {
        self.completed.get(framework_id).into_iter().flatten()
    }

    // ========== Pending kills ==========

    pub fn record_kill(&mut self, key: TaskKey) {
        self.pending_kills.insert(key);
    }

    pub fn has_pending_kills(&self) -> bool {
        !self.pending_kills.is_empty()
    }

    pub fn take_pending_kills(&mut self) -> Vec<TaskKey> {
        std::mem::take(&mut self.pending_kills).into_iter().collect()
    }

    pub fn forget_kills_for(&mut self, framework_id: &FrameworkId) {
        self.pending_kills.retain(|key| &key.framework_id != framework_id);
    }
}
