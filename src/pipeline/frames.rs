//! Frame-level worker pool.
//!
//! Each task that compresses in parallel builds a [`FramePool`] sized to
//! its frame count, feeds it every extracted frame, and waits for all of
//! them before reassembly.

use parking_lot::Mutex;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use webpforge_av::FrameUnit;
use webpforge_common::{Error, Result};

use super::control::TaskControl;
use crate::pool::WorkerPool;

/// A frame that could not be compressed.
#[derive(Debug)]
pub struct FrameFailure {
    pub index: usize,
    pub error: Error,
}

/// What a frame worker does after a frame fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop taking frames; frames not yet started are skipped.
    AbortOnFirst,
    /// Keep going and report every failure.
    CollectAll,
}

pub struct FramePool {
    pool: WorkerPool<FrameUnit>,
    policy: FailurePolicy,
    results: Arc<Mutex<Vec<FrameUnit>>>,
    failures: Arc<Mutex<Vec<FrameFailure>>>,
    aborted: CancellationToken,
}

impl FramePool {
    /// A pool of `workers` frame workers with room for two queued frames each.
    pub fn new(workers: usize, policy: FailurePolicy) -> Self {
        Self {
            pool: WorkerPool::new("frames", workers, workers.max(1) * 2),
            policy,
            results: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
            aborted: CancellationToken::new(),
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    /// Launch the workers. Before each frame a worker checks `control`; a
    /// cancelled or expired task is recorded as a failure for that frame and
    /// the worker stops.
    pub fn start<P, Fut>(&self, control: TaskControl, processor: P)
    where
        P: Fn(FrameUnit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FrameUnit>> + Send + 'static,
    {
        let processor = Arc::new(processor);
        let results = self.results.clone();
        let failures = self.failures.clone();
        let aborted = self.aborted.clone();
        let policy = self.policy;

        self.pool.start(move |worker_id, unit: FrameUnit| {
            let processor = processor.clone();
            let results = results.clone();
            let failures = failures.clone();
            let aborted = aborted.clone();
            let control = control.clone();

            async move {
                let index = unit.index();

                if let Err(error) = control.check() {
                    failures.lock().push(FrameFailure { index, error });
                    return ControlFlow::Break(());
                }
                if aborted.is_cancelled() {
                    return ControlFlow::Break(());
                }

                match (*processor)(unit).await {
                    Ok(done) => {
                        results.lock().push(done);
                        ControlFlow::Continue(())
                    }
                    Err(error) => {
                        tracing::debug!(worker_id, frame = index, error = %error, "Frame failed");
                        failures.lock().push(FrameFailure { index, error });
                        if policy == FailurePolicy::AbortOnFirst {
                            aborted.cancel();
                            ControlFlow::Break(())
                        } else {
                            ControlFlow::Continue(())
                        }
                    }
                }
            }
        });
    }

    /// Queue one frame, waiting while the queue is full. The frame is handed
    /// back if the pool has stopped accepting work.
    pub async fn submit(&self, unit: FrameUnit) -> std::result::Result<(), FrameUnit> {
        self.pool.submit(unit).await.map_err(|e| e.into_inner())
    }

    /// No more frames will be submitted.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Wait for the workers to drain the queue and exit, then return every
    /// failure in the order observed.
    pub async fn wait(&self) -> Vec<FrameFailure> {
        self.pool.join().await;
        std::mem::take(&mut *self.failures.lock())
    }

    /// Compressed frames, in frame index order.
    pub fn into_results(self) -> Vec<FrameUnit> {
        let mut results = std::mem::take(&mut *self.results.lock());
        results.sort_by_key(FrameUnit::index);
        results
    }
}
