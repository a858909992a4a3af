//! Live progress over a real WebSocket connection.

mod common;

use common::{FakeCodec, TestHarness};
use futures::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use webpforge::state::CompressionConfig;
use webpforge_common::TaskId;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn gated_server() -> (TestHarness, SocketAddr, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let harness = TestHarness::with_codec(FakeCodec::new(3).with_gate(gate.clone()));
    let (harness, addr) = harness.with_server().await;
    (harness, addr, gate)
}

fn submit(harness: &TestHarness) -> TaskId {
    let task = harness.ctx.store.create(
        harness.input_path(),
        harness.output_path("live.webp"),
        CompressionConfig::new(30),
    );
    harness.ctx.processor.submit(task.id).unwrap();
    task.id
}

async fn connect(addr: SocketAddr, id: TaskId) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/tasks/{id}/progress"))
        .await
        .expect("websocket handshake");
    ws
}

/// Next JSON frame, skipping keep-alive pings.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Progress values of every update up to and including 100.
async fn read_until_done(ws: &mut Client) -> Vec<f64> {
    let mut seen = Vec::new();
    loop {
        let frame = next_json(ws).await;
        assert_eq!(frame["type"], "progress_update");
        let progress = frame["progress"].as_f64().unwrap();
        seen.push(progress);
        if progress >= 100.0 {
            return seen;
        }
    }
}

async fn wait_for_subscribers(harness: &TestHarness, id: TaskId, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.ctx.broker.subscriber_count(id) != count {
        assert!(tokio::time::Instant::now() < deadline, "subscriber count never reached {count}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn sends_snapshot_then_progress_updates() {
    let (harness, addr, gate) = gated_server().await;
    let id = submit(&harness);
    let mut ws = connect(addr, id).await;

    let snapshot = next_json(&mut ws).await;
    assert_eq!(snapshot["type"], "task_update");
    assert_eq!(snapshot["task_id"], id.to_string());
    assert!(snapshot["status"] == "pending" || snapshot["status"] == "processing");
    assert_eq!(snapshot["id"], id.to_string());
    assert_eq!(snapshot["config"]["quality"], 30);
    assert_eq!(
        snapshot["output_file"],
        harness.output_path("live.webp").display().to_string()
    );
    assert!(snapshot["created_at"].is_string());

    gate.add_permits(1);
    let progress = read_until_done(&mut ws).await;
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100.0));

    ws.close(None).await.ok();
    wait_for_subscribers(&harness, id, 0).await;
}

#[tokio::test]
async fn closing_one_subscriber_leaves_the_other() {
    let (harness, addr, gate) = gated_server().await;
    let id = submit(&harness);

    let mut first = connect(addr, id).await;
    let mut second = connect(addr, id).await;
    next_json(&mut first).await;
    next_json(&mut second).await;
    wait_for_subscribers(&harness, id, 2).await;

    first.close(None).await.unwrap();
    wait_for_subscribers(&harness, id, 1).await;

    gate.add_permits(1);
    let progress = read_until_done(&mut second).await;
    assert_eq!(progress.last(), Some(&100.0));
}

#[tokio::test]
async fn keepalive_pings_idle_connection() {
    let (harness, addr, _gate) = gated_server().await;
    let id = submit(&harness);
    let mut ws = connect(addr, id).await;
    next_json(&mut ws).await;

    // keepalive_secs is 1 in the harness config.
    let frame = tokio::time::timeout(Duration::from_secs(3), ws.next())
        .await
        .expect("no keep-alive")
        .unwrap()
        .unwrap();
    assert!(matches!(frame, Message::Ping(_)));
}

#[tokio::test]
async fn broker_shutdown_closes_stream() {
    let (harness, addr, _gate) = gated_server().await;
    let id = submit(&harness);
    let mut ws = connect(addr, id).await;
    next_json(&mut ws).await;
    wait_for_subscribers(&harness, id, 1).await;

    harness.ctx.broker.shutdown_all();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}

#[tokio::test]
async fn unknown_task_rejects_upgrade() {
    let (_harness, addr, _gate) = gated_server().await;
    let result = connect_async(format!("ws://{addr}/tasks/{}/progress", TaskId::new())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn auth_accepts_query_token_for_websockets() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = TestHarness::build(FakeCodec::new(1).with_gate(gate), |config| {
        config.server.auth.enabled = true;
        config.server.auth.token = Some("letmein".to_string());
    });
    let (harness, addr) = harness.with_server().await;
    let id = submit(&harness);

    let denied = connect_async(format!("ws://{addr}/tasks/{id}/progress")).await;
    assert!(denied.is_err());

    let (mut ws, _) = connect_async(format!("ws://{addr}/tasks/{id}/progress?token=letmein"))
        .await
        .expect("token in query should be accepted");
    let snapshot = next_json(&mut ws).await;
    assert_eq!(snapshot["type"], "task_update");
}
