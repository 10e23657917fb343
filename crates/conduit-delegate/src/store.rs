//! Task status table.
//!
//! Shared through an `Arc` by the orchestrator, its background watchers and
//! anyone polling. Every mutation happens under the map's per-entry lock, so
//! readers always see a whole task and a status never moves backwards.
//!
//! Retention is bounded two ways: finished tasks expire after a TTL, and the
//! table never grows past its capacity (oldest finished tasks are evicted
//! first, then the oldest tasks overall).

use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_core::{RunId, TaskId};
use conduit_settings::DelegateSettings;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::types::{Task, TaskStatus};

/// Retention bounds for [`TaskStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// How long a finished task stays pollable.
    pub ttl: Duration,
    /// Maximum number of tasks held.
    pub capacity: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            capacity: 1024,
        }
    }
}

impl From<&DelegateSettings> for RetentionPolicy {
    fn from(settings: &DelegateSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.task_ttl_secs),
            capacity: settings.max_tasks,
        }
    }
}

/// Concurrency-safe task table.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<TaskId, Task>,
    retention: RetentionPolicy,
}

impl TaskStore {
    /// Empty store with the given retention.
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            tasks: DashMap::new(),
            retention,
        }
    }

    /// Add a task, pruning expired and over-capacity entries first.
    pub fn insert(&self, task: Task) {
        let _ = self.prune();
        while self.tasks.len() >= self.retention.capacity.max(1) {
            if !self.evict_one() {
                break;
            }
        }
        debug!(task_id = %task.task_id, run_id = %task.run_id, "task queued");
        let _ = self.tasks.insert(task.task_id.clone(), task);
    }

    /// Snapshot of a task.
    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Snapshot of the task tracking `run_id`.
    pub fn find_by_run(&self, run_id: &RunId) -> Option<Task> {
        self.tasks
            .iter()
            .find(|t| &t.run_id == run_id)
            .map(|t| t.clone())
    }

    /// Queued → running. Returns whether the status changed.
    pub fn mark_running(&self, task_id: &TaskId) -> bool {
        self.transition(task_id, TaskStatus::Running, |_| {})
    }

    /// Record the answer. Only the first terminal write wins.
    pub fn complete(&self, task_id: &TaskId, answer: impl Into<String>) -> bool {
        let answer = answer.into();
        self.transition(task_id, TaskStatus::Completed, |task| {
            task.result = Some(answer);
        })
    }

    /// Record the failure. Only the first terminal write wins.
    pub fn fail(&self, task_id: &TaskId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.transition(task_id, TaskStatus::Failed, |task| {
            task.error = Some(error);
        })
    }

    /// Number of tasks held.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove every task.
    pub fn clear(&self) {
        self.tasks.clear();
    }

    /// Drop finished tasks older than the TTL. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    /// [`TaskStore::prune`] against an explicit clock.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.retention.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365_000));
        let before = self.tasks.len();
        self.tasks
            .retain(|_, task| !(task.status.is_terminal() && now - task.updated_at >= ttl));
        let removed = before.saturating_sub(self.tasks.len());
        if removed > 0 {
            info!(removed, "pruned expired tasks");
        }
        removed
    }

    fn transition(&self, task_id: &TaskId, to: TaskStatus, apply: impl FnOnce(&mut Task)) -> bool {
        let Some(mut task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if task.status.is_terminal() || task.status >= to {
            return false;
        }
        task.status = to;
        task.updated_at = Utc::now();
        apply(&mut *task);
        info!(task_id = %task_id, status = to.as_str(), "task status changed");
        true
    }

    /// Evict the oldest finished task, else the oldest task.
    fn evict_one(&self) -> bool {
        let victim = self
            .tasks
            .iter()
            .filter(|t| t.status.is_terminal())
            .min_by_key(|t| t.updated_at)
            .map(|t| t.task_id.clone())
            .or_else(|| {
                self.tasks
                    .iter()
                    .min_by_key(|t| t.created_at)
                    .map(|t| t.task_id.clone())
            });
        match victim {
            Some(task_id) => {
                debug!(task_id = %task_id, "evicting task to stay within capacity");
                self.tasks.remove(&task_id).is_some()
            }
            None => false,
        }
    }
}
