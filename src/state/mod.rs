//! In-memory task store.
//!
//! [`TaskStore`] owns the authoritative copy of every [`Task`]. Readers get
//! clones, so a record handed out is never mutated behind the caller's back.

mod types;

pub use types::*;

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use webpforge_common::{Error, Result, TaskId};

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Pending task.
    pub fn create(&self, input: PathBuf, output: PathBuf, config: CompressionConfig) -> Task {
        self.insert(Task::new(input, output, config))
    }

    /// Create a Pending task unless its output path is already claimed.
    ///
    /// A path is claimed by any Pending, Processing or Completed task writing
    /// to it. Failed and Cancelled tasks release their path.
    pub fn create_exclusive(
        &self,
        input: PathBuf,
        output: PathBuf,
        config: CompressionConfig,
    ) -> Result<Task> {
        let mut tasks = self.tasks.write();
        if let Some(holder) = tasks.values().find(|t| t.holds_output(&output)) {
            return Err(Error::conflict(format!(
                "output {} is in use by task {}",
                output.display(),
                holder.id
            )));
        }
        let task = Task::new(input, output, config);
        tracing::debug!(task_id = %task.id, "Task created");
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    /// Store a fully built task, returning a copy.
    pub fn insert(&self, task: Task) -> Task {
        tracing::debug!(task_id = %task.id, "Task created");
        self.tasks.write().insert(task.id, task.clone());
        task
    }

    pub fn get(&self, id: TaskId) -> Result<Task> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("task", id))
    }

    /// Replace the stored record with `task`.
    pub fn update(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => {
                tracing::warn!(task_id = %task.id, "Update for unknown task");
                Err(Error::not_found("task", task.id))
            }
        }
    }

    /// Apply `f` to the stored record under the write lock and return a copy
    /// of the result.
    pub fn modify(&self, id: TaskId, f: impl FnOnce(&mut Task)) -> Result<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or_else(|| {
            tracing::warn!(task_id = %id, "Modify for unknown task");
            Error::not_found("task", id)
        })?;
        f(task);
        Ok(task.clone())
    }

    /// Move a Pending task to Processing.
    ///
    /// Returns `None` when the task is no longer Pending, e.g. because it was
    /// cancelled while queued.
    pub fn claim(&self, id: TaskId) -> Result<Option<Task>> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("task", id))?;
        if task.status != TaskStatus::Pending {
            return Ok(None);
        }
        task.start();
        Ok(Some(task.clone()))
    }

    /// Handle a cancellation request.
    ///
    /// A Pending task is cancelled immediately. A Processing task is returned
    /// unchanged: its worker observes the request and finalises it. Terminal
    /// tasks yield [`Error::Conflict`] and are not touched.
    pub fn cancel(&self, id: TaskId, reason: &str) -> Result<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("task", id))?;
        match task.status {
            TaskStatus::Pending => {
                task.cancel(reason);
                Ok(task.clone())
            }
            TaskStatus::Processing => Ok(task.clone()),
            status => Err(Error::conflict(format!(
                "task {id} cannot be cancelled in status {status:?}"
            ))),
        }
    }

    /// Tasks ordered newest first.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<Task> {
        let tasks = self.tasks.read();
        let mut all: Vec<&Task> = tasks.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        all.into_iter().skip(offset).take(limit).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Remove a task. Processing tasks cannot be deleted.
    pub fn delete(&self, id: TaskId) -> Result<Task> {
        let mut tasks = self.tasks.write();
        let status = tasks
            .get(&id)
            .map(|t| t.status)
            .ok_or_else(|| Error::not_found("task", id))?;
        if status == TaskStatus::Processing {
            return Err(Error::conflict(format!(
                "task {id} is processing and cannot be deleted"
            )));
        }
        tasks.remove(&id).ok_or_else(|| Error::not_found("task", id))
    }

    /// Remove terminal tasks created strictly before `now - age` and return them.
    pub fn drain_older_than(&self, age: Duration) -> Vec<Task> {
        let cutoff = match chrono::Duration::from_std(age)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
        {
            Some(cutoff) => cutoff,
            None => return Vec::new(),
        };

        let mut tasks = self.tasks.write();
        let expired: Vec<TaskId> = tasks
            .values()
            .filter(|t| t.is_terminal() && t.created_at < cutoff)
            .map(|t| t.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| tasks.remove(&id))
            .collect()
    }

    /// Remove terminal tasks older than `age`, returning how many were removed.
    pub fn purge_older_than(&self, age: Duration) -> usize {
        self.drain_older_than(age).len()
    }

    pub fn stats(&self) -> TaskStats {
        let tasks = self.tasks.read();
        let mut stats = TaskStats::default();
        let mut ratio_sum = 0.0;

        for task in tasks.values() {
            stats.record(task);
            if let Some(result) = &task.result {
                stats.bytes_saved += result.bytes_saved();
                ratio_sum += result.compression_ratio;
            }
        }

        if stats.completed > 0 {
            stats.average_compression_ratio = ratio_sum / stats.completed as f64;
        }
        stats
    }
}
