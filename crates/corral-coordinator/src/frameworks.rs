//! Framework directory
//!
//! Registration state of every framework and the task ids it owns. A
//! framework first seen through tasks reported by a reregistering agent is an
//! orphan until it reregisters itself. Orphans never time out.

use crate::error::{CoordinatorError, Result};
use chrono::{DateTime, Utc};
use corral_types::{FrameworkId, FrameworkInfo, FrameworkState, TaskId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkRecord {
    pub id: FrameworkId,

    /// Absent for orphans, which have never spoken to this coordinator
    pub info: Option<FrameworkInfo>,

    pub state: FrameworkState,

    pub tasks: BTreeSet<TaskId>,

    pub registered_at: Option<DateTime<Utc>>,

    pub unregistered_at: Option<DateTime<Utc>>,
}

/// How a (re)registration changed the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Never seen before
    New,
    /// Was an orphan; its inherited tasks are now owned normally
    Adopted,
    /// Was disconnected
    Reconnected,
    /// Already registered; a scheduler failover or a retry
    Refreshed,
}

#[derive(Debug)]
pub struct FrameworkDirectory {
    frameworks: BTreeMap<FrameworkId, FrameworkRecord>,
    completed: VecDeque<FrameworkRecord>,
    max_completed: usize,
}

impl FrameworkDirectory {
    pub fn new(max_completed: usize) -> Self {
        Self {
            frameworks: BTreeMap::new(),
            completed: VecDeque::new(),
            max_completed,
        }
    }

    /// Register or reregister `id`
    pub fn register(
        &mut self,
        id: &FrameworkId,
        info: FrameworkInfo,
        now: DateTime<Utc>,
    ) -> Result<Registration> {
        if self.completed.iter().any(|f| &f.id == id) {
            return Err(CoordinatorError::FrameworkRemoved(id.clone()));
        }

        let Some(record) = self.frameworks.get_mut(id) else {
            self.frameworks.insert(
                id.clone(),
                FrameworkRecord {
                    id: id.clone(),
                    info: Some(info),
                    state: FrameworkState::Registered,
                    tasks: BTreeSet::new(),
                    registered_at: Some(now),
                    unregistered_at: None,
                },
            );
            return Ok(Registration::New);
        };

        let registration = match record.state {
            FrameworkState::Orphan => Registration::Adopted,
            FrameworkState::Disconnected => Registration::Reconnected,
            FrameworkState::Registered => Registration::Refreshed,
            FrameworkState::Completed => return Err(CoordinatorError::FrameworkRemoved(id.clone())),
        };
        if registration != Registration::Refreshed {
            record.state.transition(FrameworkState::Registered)?;
        }
        record.info = Some(info);
        record.registered_at = Some(now);
        Ok(registration)
    }

    /// Ensure a record exists for a framework known only through its tasks
    pub fn ensure_orphan(&mut self, id: &FrameworkId) -> FrameworkState {
        self.frameworks
            .entry(id.clone())
            .or_insert_with(|| FrameworkRecord {
                id: id.clone(),
                info: None,
                state: FrameworkState::Orphan,
                tasks: BTreeSet::new(),
                registered_at: None,
                unregistered_at: None,
            })
            .state
    }

    pub fn disconnect(&mut self, id: &FrameworkId) -> Result<()> {
        let record = self
            .frameworks
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::FrameworkNotFound(id.clone()))?;
        record.state.transition(FrameworkState::Disconnected)?;
        Ok(())
    }

    /// Mark the framework completed and move it to the bounded history
    pub fn complete(&mut self, id: &FrameworkId, now: DateTime<Utc>) -> Result<FrameworkRecord> {
        let mut record = self
            .frameworks
            .remove(id)
            .ok_or_else(|| CoordinatorError::FrameworkNotFound(id.clone()))?;
        if let Err(e) = record.state.transition(FrameworkState::Completed) {
            self.frameworks.insert(id.clone(), record);
            return Err(e.into());
        }
        record.unregistered_at = Some(now);

        self.completed.push_back(record.clone());
        while self.completed.len() > self.max_completed {
            self.completed.pop_front();
        }
        Ok(record)
    }

    pub fn get(&self, id: &FrameworkId) -> Option<&FrameworkRecord> {
        self.frameworks.get(id)
    }

    pub fn state(&self, id: &FrameworkId) -> Option<FrameworkState> {
        self.frameworks.get(id).map(|f| f.state)
    }

    pub fn is_registered(&self, id: &FrameworkId) -> bool {
        self.state(id).map(|s| s.is_connected()).unwrap_or(false)
    }

    pub fn is_completed(&self, id: &FrameworkId) -> bool {
        self.completed.iter().any(|f| &f.id == id)
    }

    /// Registered, or the request names a framework that does not exist
    pub fn require_registered(&self, id: &FrameworkId) -> Result<()> {
        match self.state(id) {
            Some(FrameworkState::Registered) => Ok(()),
            Some(_) => Err(CoordinatorError::FrameworkNotRegistered(id.clone())),
            None if self.is_completed(id) => Err(CoordinatorError::FrameworkRemoved(id.clone())),
            None => Err(CoordinatorError::FrameworkNotFound(id.clone())),
        }
    }

    pub fn add_task(&mut self, id: &FrameworkId, task_id: &TaskId) {
        if let Some(record) = self.frameworks.get_mut(id) {
            record.tasks.insert(task_id.clone());
        }
    }

    pub fn remove_task(&mut self, id: &FrameworkId, task_id: &TaskId) {
        if let Some(record) = self.frameworks.get_mut(id) {
            record.tasks.remove(task_id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameworkRecord> {
        self.frameworks.values()
    }

    pub fn registered(&self) -> Vec<FrameworkId> {
        self.frameworks
            .values()
            .filter(|f| f.state.is_connected())
            .map(|f| f.id.clone())
            .collect()
    }

    pub fn orphans(&self) -> Vec<FrameworkId> {
        self.frameworks
            .values()
            .filter(|f| f.state == FrameworkState::Orphan)
            .map(|f| f.id.clone())
            .collect()
    }

    pub fn completed(&self) -> impl Iterator<Item = &FrameworkRecord> {
        self.completed.iter()
    }
}
