//! Task-level worker pool.
//!
//! [`TaskProcessor`] bounds how many conversions run at once. Submissions
//! never wait: when the queue is full the task is failed on the spot.

use dashmap::DashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use webpforge_common::{Result, TaskId};

use crate::pipeline::{TaskPipeline, CANCELLED_REASON};
use crate::pool::{SubmitError, WorkerPool};
use crate::progress::ProgressBroker;
use crate::state::{Task, TaskStatus, TaskStore};

/// Failure reason for tasks abandoned by a shutdown.
pub const SHUTDOWN_REASON: &str = "service shutting down";

pub struct TaskProcessor {
    pool: WorkerPool<TaskId>,
    store: Arc<TaskStore>,
    broker: Arc<ProgressBroker>,
    pipeline: Arc<TaskPipeline>,
    cancellations: Arc<DashMap<TaskId, CancellationToken>>,
}

impl TaskProcessor {
    /// A processor running up to `workers` tasks with `2 * workers` queue slots.
    pub fn new(
        workers: usize,
        store: Arc<TaskStore>,
        broker: Arc<ProgressBroker>,
        pipeline: Arc<TaskPipeline>,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            pool: WorkerPool::new("tasks", workers, workers * 2),
            store,
            broker,
            pipeline,
            cancellations: Arc::new(DashMap::new()),
        }
    }

    pub fn start(&self) {
        let store = self.store.clone();
        let pipeline = self.pipeline.clone();
        let cancellations = self.cancellations.clone();

        self.pool.start(move |worker_id, task_id: TaskId| {
            let store = store.clone();
            let pipeline = pipeline.clone();
            let cancellations = cancellations.clone();
            async move {
                let token = cancellations
                    .get(&task_id)
                    .map(|t| t.clone())
                    .unwrap_or_default();

                match store.claim(task_id) {
                    Ok(Some(task)) => {
                        tracing::debug!(worker_id, task_id = %task_id, "Worker claimed task");
                        pipeline.run(task, token).await;
                    }
                    Ok(None) => {
                        tracing::debug!(task_id = %task_id, "Skipping task that is no longer pending");
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, error = %e, "Queued task disappeared");
                    }
                }

                cancellations.remove(&task_id);
                ControlFlow::Continue(())
            }
        });

        tracing::info!(workers = self.pool.workers(), "Task processor started");
    }

    /// Queue a Pending task.
    ///
    /// A full queue or a stopped processor fails the task immediately and
    /// returns the matching error; the task is never left Pending.
    pub fn submit(&self, task_id: TaskId) -> Result<()> {
        self.cancellations.insert(task_id, CancellationToken::new());

        match self.pool.try_submit(task_id) {
            Ok(()) => {
                tracing::debug!(task_id = %task_id, "Task queued");
                Ok(())
            }
            Err(rejected) => {
                self.cancellations.remove(&task_id);
                let error = rejected.to_error();
                let reason = match rejected {
                    SubmitError::Full(_) => {
                        tracing::warn!(task_id = %task_id, capacity = self.pool.capacity(), "Task queue full");
                        error.to_string()
                    }
                    SubmitError::Stopped(_) => {
                        tracing::warn!(task_id = %task_id, "Task submitted after processor stopped");
                        SHUTDOWN_REASON.to_string()
                    }
                };
                self.fail_pending(task_id, &reason);
                Err(error)
            }
        }
    }

    /// Request cancellation of a Pending or Processing task.
    ///
    /// A Pending task is Cancelled at once. A Processing task keeps its status
    /// until its worker reaches the next checkpoint.
    pub fn cancel(&self, task_id: TaskId) -> Result<Task> {
        let task = self.store.cancel(task_id, CANCELLED_REASON)?;

        if let Some(token) = self.cancellations.get(&task_id) {
            token.cancel();
        }

        if task.status == TaskStatus::Cancelled {
            self.broker.publish(task_id, task.progress, &task.message);
        }
        tracing::info!(task_id = %task_id, status = ?task.status, "Cancellation requested");
        Ok(task)
    }

    /// Stop taking tasks, let running tasks finish, and fail the ones still
    /// queued.
    pub async fn stop(&self) {
        let abandoned = self.pool.stop().await;
        for task_id in abandoned {
            self.cancellations.remove(&task_id);
            self.fail_pending(task_id, SHUTDOWN_REASON);
        }
        tracing::info!("Task processor stopped");
    }

    fn fail_pending(&self, task_id: TaskId, reason: &str) {
        let result = self.store.modify(task_id, |t| {
            if t.status == TaskStatus::Pending {
                t.fail(reason);
            }
        });
        match result {
            Ok(task) => self.broker.publish(task_id, task.progress, &task.message),
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "Could not fail rejected task"),
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    pub fn queue_capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.pool.active()
    }

    pub fn is_accepting(&self) -> bool {
        self.pool.is_open()
    }
}
