//! Fixed-size worker pool draining a bounded queue.
//!
//! One implementation serves both levels of concurrency: the task pool runs
//! whole conversions, and each running conversion owns a short-lived pool
//! that compresses its frames.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use webpforge_common::Error;

/// Why an item was not queued. The item is handed back.
#[derive(Debug)]
pub enum SubmitError<T> {
    /// The queue is at capacity.
    Full(T),
    /// The pool was stopped, closed or halted.
    Stopped(T),
}

impl<T> SubmitError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Stopped(item) => item,
        }
    }

    pub fn to_error(&self) -> Error {
        match self {
            Self::Full(_) => Error::QueueFull,
            Self::Stopped(_) => Error::PoolStopped,
        }
    }
}

pub struct WorkerPool<T> {
    name: &'static str,
    workers: usize,
    capacity: usize,
    tx: parking_lot::Mutex<Option<mpsc::Sender<T>>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
    started: AtomicBool,
    /// Stops workers after their current item.
    stop_token: CancellationToken,
    /// Refuses further submissions; buffered items are still delivered.
    halt_token: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool of `workers` workers over a queue holding `capacity` items.
    pub fn new(name: &'static str, workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name,
            workers: workers.max(1),
            capacity,
            tx: parking_lot::Mutex::new(Some(tx)),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
            started: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
            halt_token: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn the workers. Each pulls one item at a time and awaits
    /// `handler(worker_id, item)`.
    ///
    /// A handler returning [`ControlFlow::Break`] ends its own worker and
    /// halts the pool: later submissions are refused, while items already
    /// queued still go to the remaining workers.
    pub fn start<F, Fut>(&self, handler: F)
    where
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!(pool = self.name, "Worker pool already started");
            return;
        }

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            tracing::warn!(pool = self.name, "Start called on a stopped worker pool");
            return;
        };

        let handler = Arc::new(handler);
        for worker_id in 0..self.workers {
            let rx = self.rx.clone();
            let handler = handler.clone();
            let stop = self.stop_token.clone();
            let halt = self.halt_token.clone();
            let active = self.active.clone();
            let name = self.name;

            join_set.spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = stop.cancelled() => None,
                            item = rx.recv() => item,
                        }
                    };
                    let Some(item) = next else {
                        break;
                    };

                    active.fetch_add(1, Ordering::SeqCst);
                    let flow = (*handler)(worker_id, item).await;
                    active.fetch_sub(1, Ordering::SeqCst);

                    if flow.is_break() {
                        halt.cancel();
                        break;
                    }
                }
                tracing::trace!(pool = name, worker_id, "Worker exited");
            });
        }

        tracing::debug!(pool = self.name, workers = self.workers, capacity = self.capacity, "Worker pool started");
    }

    fn sender(&self) -> Option<mpsc::Sender<T>> {
        if self.halt_token.is_cancelled() {
            return None;
        }
        self.tx.lock().clone()
    }

    /// Queue `item` without waiting.
    pub fn try_submit(&self, item: T) -> Result<(), SubmitError<T>> {
        let Some(tx) = self.sender() else {
            return Err(SubmitError::Stopped(item));
        };
        tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => SubmitError::Full(item),
            TrySendError::Closed(item) => SubmitError::Stopped(item),
        })
    }

    /// Queue `item`, waiting for room. Gives up if the pool is halted while
    /// waiting.
    pub async fn submit(&self, item: T) -> Result<(), SubmitError<T>> {
        let Some(tx) = self.sender() else {
            return Err(SubmitError::Stopped(item));
        };
        tokio::select! {
            permit = tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(item);
                    Ok(())
                }
                Err(_) => Err(SubmitError::Stopped(item)),
            },
            _ = self.halt_token.cancelled() => Err(SubmitError::Stopped(item)),
        }
    }

    /// No more items will be submitted. Workers exit once the queue is empty.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// Wait for every worker to exit.
    pub async fn join(&self) {
        let join_set = self.tasks.lock().take();
        if let Some(mut join_set) = join_set {
            while let Some(res) = join_set.join_next().await {
                if let Err(e) = res {
                    tracing::error!(pool = self.name, error = %e, "Worker task failed");
                }
            }
        }
    }

    /// Refuse new items, let running handlers finish, wait for the workers,
    /// and return the items that were queued but never started.
    pub async fn stop(&self) -> Vec<T> {
        tracing::info!(pool = self.name, "Stopping worker pool");
        self.close();
        self.stop_token.cancel();
        self.join().await;

        let mut rx = self.rx.lock().await;
        rx.close();
        let mut leftover = Vec::new();
        while let Ok(item) = rx.try_recv() {
            leftover.push(item);
        }

        tracing::info!(pool = self.name, abandoned = leftover.len(), "Worker pool stopped");
        leftover
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handlers currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// True until the pool is stopped or closed.
    pub fn is_open(&self) -> bool {
        self.tx.lock().is_some() && !self.halt_token.is_cancelled()
    }
}
