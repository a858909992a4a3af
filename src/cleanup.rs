//! Periodic purge of finished tasks.

use std::sync::Arc;
use std::time::Duration;

use crate::state::{TaskStatus, TaskStore};

/// Spawn the purge loop. The first sweep runs one `interval` after start.
pub fn start_cleanup_task(
    store: Arc<TaskStore>,
    retention: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            run_cleanup_once(&store, retention).await;
        }
    })
}

/// Remove terminal tasks older than `retention`, along with the output files
/// of the Completed ones. Returns the number of tasks removed.
pub async fn run_cleanup_once(store: &TaskStore, retention: Duration) -> usize {
    let purged = store.drain_older_than(retention);
    if purged.is_empty() {
        return 0;
    }

    for task in purged.iter().filter(|t| t.status == TaskStatus::Completed) {
        match tokio::fs::remove_file(&task.output_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                task_id = %task.id,
                path = %task.output_file.display(),
                error = %e,
                "Failed to remove output of purged task"
            ),
        }
    }

    tracing::info!(count = purged.len(), "Purged expired tasks");
    purged.len()
}
