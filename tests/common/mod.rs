//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] around a
//! scripted [`FakeCodec`] and temporary upload/output directories. The
//! [`TestHarness::with_server`] constructor starts Axum on a random port for
//! WebSocket-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use webpforge::config::Config;
use webpforge::pipeline::{PipelineSettings, TaskPipeline};
use webpforge::server::{create_router, AppContext};
use webpforge::state::Task;
use webpforge_av::{
    AnimationInfo, Blend, Codec, Dispose, EncodeOptions, FrameMeta, FrameUnit,
};
use webpforge_common::{Error, Result, TaskId};

/// Bytes written for every extracted frame.
pub const EXTRACTED_FRAME_SIZE: usize = 1000;
/// Bytes written for every compressed frame.
pub const COMPRESSED_FRAME_SIZE: usize = 400;
/// Size of the input file the harness places in the upload directory.
pub const INPUT_SIZE: usize = 5000;

/// In-process stand-in for the libwebp tools.
///
/// Files are really written so the pipeline can measure sizes. Behaviour is
/// scripted per test: a gate that holds `probe`, per-frame compression
/// delays and a frame that fails to compress.
pub struct FakeCodec {
    frames: usize,
    gate: Option<Arc<Semaphore>>,
    delays_ms: Vec<u64>,
    failing_frame: Option<usize>,
    assembled: Mutex<Vec<Vec<usize>>>,
    compress_calls: AtomicUsize,
}

impl FakeCodec {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            gate: None,
            delays_ms: Vec::new(),
            failing_frame: None,
            assembled: Mutex::new(Vec::new()),
            compress_calls: AtomicUsize::new(0),
        }
    }

    /// Every `probe` waits for one permit from `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Compression of frame `i` (1-based) sleeps `delays_ms[i - 1]`.
    pub fn with_delays(mut self, delays_ms: Vec<u64>) -> Self {
        self.delays_ms = delays_ms;
        self
    }

    pub fn failing_frame(mut self, index: usize) -> Self {
        self.failing_frame = Some(index);
        self
    }

    /// Frame indices handed to each `assemble` call, in slice order.
    pub fn assembled(&self) -> Vec<Vec<usize>> {
        self.assembled.lock().clone()
    }

    pub fn compress_calls(&self) -> usize {
        self.compress_calls.load(Ordering::SeqCst)
    }
}

fn trailing_index(path: &Path) -> usize {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl Codec for FakeCodec {
    async fn probe(&self, input: &Path) -> Result<AnimationInfo> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| Error::internal("gate closed"))?
                .forget();
        }
        if !input.is_file() {
            return Err(Error::tool("webpmux", format!("cannot read {}", input.display())));
        }

        let frames = (1..=self.frames)
            .map(|index| FrameMeta {
                index,
                width: 16,
                height: 16,
                x: 0,
                y: 0,
                duration_ms: 100,
                dispose: Dispose::None,
                blend: Blend::Blend,
            })
            .collect();

        Ok(AnimationInfo {
            canvas_width: 16,
            canvas_height: 16,
            frames,
        })
    }

    async fn extract_frame(&self, _input: &Path, _frame: &FrameMeta, dest: &Path) -> Result<()> {
        tokio::fs::write(dest, vec![0u8; EXTRACTED_FRAME_SIZE]).await?;
        Ok(())
    }

    async fn compress_frame(&self, src: &Path, dest: &Path, _opts: &EncodeOptions) -> Result<()> {
        self.compress_calls.fetch_add(1, Ordering::SeqCst);
        let index = trailing_index(dest);

        if let Some(ms) = index.checked_sub(1).and_then(|i| self.delays_ms.get(i)) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.failing_frame == Some(index) {
            return Err(Error::tool("cwebp", format!("frame {index} rejected")));
        }
        if !src.is_file() {
            return Err(Error::tool("cwebp", "missing source frame"));
        }

        tokio::fs::write(dest, vec![1u8; COMPRESSED_FRAME_SIZE]).await?;
        Ok(())
    }

    async fn assemble(&self, frames: &[FrameUnit], output: &Path) -> Result<()> {
        let order: Vec<usize> = frames.iter().map(|f| f.index()).collect();
        self.assembled.lock().push(order);

        let mut bytes = Vec::new();
        for frame in frames {
            bytes.extend(tokio::fs::read(frame.path()).await?);
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub codec: Arc<FakeCodec>,
    pub dir: TempDir,
}

impl TestHarness {
    /// Harness with default settings and a three-frame fake codec.
    pub fn new() -> Self {
        Self::with_codec(FakeCodec::new(3))
    }

    pub fn with_codec(codec: FakeCodec) -> Self {
        Self::build(codec, |_| {})
    }

    /// Harness whose config is adjusted by `configure` before wiring. The
    /// task processor is started.
    pub fn build(codec: FakeCodec, configure: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let config = test_config(dir.path(), configure);

        std::fs::write(
            config.tasks.upload_dir.join("anim.webp"),
            vec![7u8; INPUT_SIZE],
        )
        .expect("failed to write input");

        let codec = Arc::new(codec);
        let ctx = AppContext::new(config, codec.clone());
        ctx.processor.start();

        Self { ctx, codec, dir }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(self) -> (Self, SocketAddr) {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    /// A standalone pipeline sharing this harness's store, broker and codec.
    pub fn pipeline(&self, timeout: Duration) -> TaskPipeline {
        TaskPipeline::new(
            self.codec.clone(),
            self.ctx.store.clone(),
            self.ctx.broker.clone(),
            PipelineSettings {
                temp_dir: self.ctx.config.tasks.temp_dir.clone(),
                default_frame_workers: 4,
                timeout,
            },
        )
    }

    pub fn input_path(&self) -> PathBuf {
        self.ctx.config.tasks.upload_dir.join("anim.webp")
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.ctx.config.tasks.output_dir.join(name)
    }

    /// Poll the store until the task reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: TaskId) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let task = self.ctx.store.get(id).expect("task should exist");
            if task.is_terminal() {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {id} stuck in {:?}",
                task.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll the store until the task is Processing.
    pub async fn wait_for_processing(&self, id: TaskId) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.ctx.store.get(id).expect("task should exist").status
            != webpforge::state::TaskStatus::Processing
        {
            assert!(tokio::time::Instant::now() < deadline, "task {id} never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn test_config(root: &Path, configure: impl FnOnce(&mut Config)) -> Config {
    let mut config = Config::default();
    config.tasks.upload_dir = root.join("uploads");
    config.tasks.output_dir = root.join("outputs");
    config.tasks.temp_dir = Some(root.join("work"));
    config.tasks.workers = 2;
    config.tasks.keepalive_secs = 1;
    config.processing.frame_workers = 4;
    configure(&mut config);

    for dir in [&config.tasks.upload_dir, &config.tasks.output_dir] {
        std::fs::create_dir_all(dir).expect("failed to create dir");
    }
    if let Some(work) = &config.tasks.temp_dir {
        std::fs::create_dir_all(work).expect("failed to create work dir");
    }
    config
}
