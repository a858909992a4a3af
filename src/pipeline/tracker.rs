use parking_lot::Mutex;
use std::sync::Arc;

use crate::progress::ProgressBroker;
use crate::state::{Task, TaskStore};

/// Start of the compression phase on the 0-100 scale.
pub const COMPRESS_START: f32 = 50.0;
/// Share of the scale covered by compression.
pub const COMPRESS_SPAN: f32 = 40.0;

struct Inner {
    task: Task,
    frames_done: usize,
}

/// The running task's record plus its progress outlets.
///
/// Every report writes the store first and then publishes, under one lock,
/// so concurrent frame workers cannot publish out of order.
pub struct ProgressTracker {
    inner: Mutex<Inner>,
    store: Arc<TaskStore>,
    broker: Arc<ProgressBroker>,
}

impl ProgressTracker {
    pub fn new(task: Task, store: Arc<TaskStore>, broker: Arc<ProgressBroker>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                task,
                frames_done: 0,
            }),
            store,
            broker,
        }
    }

    pub fn snapshot(&self) -> Task {
        self.inner.lock().task.clone()
    }

    pub fn report(&self, progress: f32, message: &str) {
        let mut inner = self.inner.lock();
        inner.task.update_progress(progress, message);
        self.persist_and_publish(&inner.task);
    }

    /// Count one more compressed frame out of `total`.
    pub fn frame_done(&self, total: usize) {
        let mut inner = self.inner.lock();
        inner.frames_done += 1;
        let done = inner.frames_done;
        let progress = COMPRESS_START + done as f32 / total.max(1) as f32 * COMPRESS_SPAN;
        inner
            .task
            .update_progress(progress, &format!("Compressed frame {done}/{total}"));
        self.persist_and_publish(&inner.task);
    }

    /// Apply a terminal transition and emit the final event.
    pub fn finish(&self, transition: impl FnOnce(&mut Task)) -> Task {
        let mut inner = self.inner.lock();
        transition(&mut inner.task);
        self.persist_and_publish(&inner.task);
        inner.task.clone()
    }

    fn persist_and_publish(&self, task: &Task) {
        tracing::debug!(task_id = %task.id, "[{:.0}%] {}", task.progress, task.message);
        if let Err(e) = self.store.update(task) {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to persist progress");
        }
        self.broker.publish(task.id, task.progress, &task.message);
    }
}
