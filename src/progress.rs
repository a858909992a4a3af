//! Per-task progress fan-out.
//!
//! [`ProgressBroker`] keeps a set of bounded queues per task. Publishing never
//! waits: a queue that is full loses that event, so a stalled client cannot
//! hold up the worker producing it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use webpforge_common::TaskId;

/// Default capacity of one subscription queue.
pub const DEFAULT_BUFFER: usize = 10;

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub progress: f32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(task_id: TaskId, progress: f32, message: impl Into<String>) -> Self {
        Self {
            task_id,
            progress,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of one subscriber's queue.
///
/// Yields `None` once the broker drops the sending side (unsubscribe or
/// shutdown) and the queue is drained.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    task_id: TaskId,
    rx: mpsc::Receiver<ProgressEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ProgressEvent, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    pub fn into_stream(self) -> ReceiverStream<ProgressEvent> {
        ReceiverStream::new(self.rx)
    }
}

// ---------------------------------------------------------------------------
// ProgressBroker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

#[derive(Debug)]
pub struct ProgressBroker {
    subscribers: RwLock<HashMap<TaskId, Vec<Subscriber>>>,
    capacity: usize,
    next_id: AtomicU64,
    dropped: AtomicU64,
    shut_down: AtomicBool,
}

impl ProgressBroker {
    /// Create a broker whose subscription queues hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Open a new queue for `task_id`. Each call gets its own queue.
    pub fn subscribe(&self, task_id: TaskId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.write();
        if self.shut_down.load(Ordering::Acquire) {
            // Sender dropped here; the subscription ends immediately.
            tracing::debug!(task_id = %task_id, "Subscribe after shutdown");
        } else {
            subscribers
                .entry(task_id)
                .or_default()
                .push(Subscriber { id, tx });
            tracing::debug!(task_id = %task_id, subscription = id, "Progress subscription opened");
        }

        Subscription { id, task_id, rx }
    }

    /// Close every subscription for `task_id`.
    pub fn unsubscribe(&self, task_id: TaskId) {
        if let Some(removed) = self.subscribers.write().remove(&task_id) {
            tracing::debug!(task_id = %task_id, count = removed.len(), "Progress subscriptions closed");
        }
    }

    /// Close one subscription, leaving any others for the task intact.
    pub fn unsubscribe_one(&self, task_id: TaskId, subscription_id: u64) {
        let mut subscribers = self.subscribers.write();
        if let Some(list) = subscribers.get_mut(&task_id) {
            list.retain(|s| s.id != subscription_id);
            if list.is_empty() {
                subscribers.remove(&task_id);
            }
        }
    }

    /// Offer an event to every subscription of `task_id` without waiting.
    pub fn publish(&self, task_id: TaskId, progress: f32, message: &str) {
        let event = ProgressEvent::new(task_id, progress, message);
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            let Some(list) = subscribers.get(&task_id) else {
                return;
            };

            for sub in list {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            task_id = %task_id,
                            subscription = sub.id,
                            "Subscriber queue full, dropping progress event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(sub.id),
                }
            }
        }

        for id in closed {
            self.unsubscribe_one(task_id, id);
        }
    }

    /// Close every subscription. Later subscriptions end immediately.
    pub fn shutdown_all(&self) {
        let mut subscribers = self.subscribers.write();
        self.shut_down.store(true, Ordering::Release);
        let count: usize = subscribers.values().map(Vec::len).sum();
        subscribers.clear();
        tracing::info!(count, "Closed all progress subscriptions");
    }

    pub fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.subscribers
            .read()
            .get(&task_id)
            .map_or(0, Vec::len)
    }

    /// Events discarded because a subscriber's queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ProgressBroker {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
