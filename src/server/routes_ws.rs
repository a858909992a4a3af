//! Live task progress over WebSocket.
//!
//! The first frame is a `task_update` carrying the full task record; every
//! progress event after that is a `progress_update`. Idle connections are pinged every
//! `tasks.keepalive_secs`.

use crate::progress::ProgressEvent;
use crate::server::routes_api::parse_task_id;
use crate::server::{ApiError, AppContext};
use crate::state::Task;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use webpforge_common::TaskId;

pub fn ws_routes() -> Router<AppContext> {
    Router::new().route("/tasks/:id/progress", get(progress_ws))
}

/// Frames sent to progress clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    TaskUpdate {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        task: Task,
    },
    ProgressUpdate {
        task_id: TaskId,
        progress: f32,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl From<Task> for ProgressMessage {
    fn from(task: Task) -> Self {
        Self::TaskUpdate {
            task_id: task.id,
            timestamp: Utc::now(),
            task,
        }
    }
}

impl From<ProgressEvent> for ProgressMessage {
    fn from(event: ProgressEvent) -> Self {
        Self::ProgressUpdate {
            task_id: event.task_id,
            progress: event.progress,
            message: event.message,
            timestamp: event.timestamp,
        }
    }
}

impl ProgressMessage {
    fn to_frame(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode progress frame");
                None
            }
        }
    }
}

/// Upgrade to a progress stream. Unknown tasks are a 404 before the upgrade.
async fn progress_ws(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let task_id = parse_task_id(&id)?;
    ctx.store.get(task_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, ctx, task_id)))
}

async fn handle_socket(socket: WebSocket, ctx: AppContext, task_id: TaskId) {
    // Subscribe before taking the snapshot so no event falls in between.
    let subscription = ctx.broker.subscribe(task_id);
    let subscription_id = subscription.id();
    let mut updates = subscription.into_stream().map(ProgressMessage::from);
    let (mut sender, mut receiver) = socket.split();

    tracing::debug!(task_id = %task_id, subscription_id, "Progress client connected");

    let snapshot = match ctx.store.get(task_id) {
        Ok(task) => ProgressMessage::from(task),
        Err(e) => {
            tracing::debug!(task_id = %task_id, error = %e, "Task vanished before snapshot");
            let _ = sender.send(Message::Close(None)).await;
            ctx.broker.unsubscribe_one(task_id, subscription_id);
            return;
        }
    };

    let delivered = match snapshot.to_frame() {
        Some(frame) => sender.send(frame).await.is_ok(),
        None => true,
    };

    if delivered {
        let keepalive = Duration::from_secs(ctx.config.tasks.keepalive_secs.max(1));
        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(task_id = %task_id, error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                update = updates.next() => {
                    let Some(update) = update else {
                        // Broker tore the subscription down.
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };
                    if let Some(frame) = update.to_frame() {
                        if sender.send(frame).await.is_err() {
                            break;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    ctx.broker.unsubscribe_one(task_id, subscription_id);
    tracing::debug!(task_id = %task_id, subscription_id, "Progress client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CompressionConfig;
    use std::path::PathBuf;

    #[test]
    fn snapshot_frame_is_tagged_task_update() {
        let task = Task::new(
            PathBuf::from("in.webp"),
            PathBuf::from("out.webp"),
            CompressionConfig::new(40),
        );
        let id = task.id;
        let json = serde_json::to_value(ProgressMessage::from(task)).unwrap();

        assert_eq!(json["type"], "task_update");
        assert_eq!(json["task_id"], id.to_string());
        assert_eq!(json["id"], id.to_string());
        assert_eq!(json["status"], "pending");
        assert_eq!(json["input_file"], "in.webp");
        assert_eq!(json["output_file"], "out.webp");
        assert_eq!(json["config"]["quality"], 40);
        assert!(json["created_at"].is_string());
        assert!(json["timestamp"].is_string());
        assert!(json["result"].is_null());
        assert!(json["error"].is_null());
    }

    #[test]
    fn event_frame_is_tagged_progress_update() {
        let id = TaskId::new();
        let event = ProgressEvent::new(id, 30.0, "Extracted 3 frames");
        let json = serde_json::to_value(ProgressMessage::from(event)).unwrap();

        assert_eq!(json["type"], "progress_update");
        assert_eq!(json["progress"], 30.0);
        assert_eq!(json["message"], "Extracted 3 frames");
    }
}
