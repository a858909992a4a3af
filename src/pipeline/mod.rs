//! The conversion pipeline for one task.
//!
//! [`TaskPipeline::run`] takes a claimed task through four phases: parse
//! the animation, extract every frame, compress the frames (on a
//! [`FramePool`] when parallelism applies), and reassemble them in index
//! order. Cancellation and the task deadline are checked between phases and
//! before each frame.

pub mod control;
pub mod frames;
pub mod tracker;

pub use control::TaskControl;
pub use frames::{FailurePolicy, FrameFailure, FramePool};
pub use tracker::ProgressTracker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use webpforge_av::{Codec, EncodeOptions, FrameUnit, TaskWorkspace};
use webpforge_common::{Error, Result};

use crate::progress::ProgressBroker;
use crate::state::{CompressionConfig, CompressionResult, Task, TaskStore};

/// Reason recorded on tasks cancelled while running.
pub const CANCELLED_REASON: &str = "cancelled by request";

/// Settings shared by every task a pipeline runs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent of per-task workspaces; the system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
    /// Frame workers when the task's config does not say.
    pub default_frame_workers: usize,
    /// Deadline for one task, from the moment it starts running.
    pub timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            temp_dir: None,
            default_frame_workers: num_cpus::get(),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Number of frame workers for a task with `frames` frames.
pub fn frame_workers(config: &CompressionConfig, default_workers: usize, frames: usize) -> usize {
    let wanted = if config.max_concurrency > 0 {
        config.max_concurrency
    } else {
        default_workers
    };
    wanted.min(frames).max(1)
}

pub struct TaskPipeline {
    codec: Arc<dyn Codec>,
    store: Arc<TaskStore>,
    broker: Arc<ProgressBroker>,
    settings: PipelineSettings,
}

impl TaskPipeline {
    pub fn new(
        codec: Arc<dyn Codec>,
        store: Arc<TaskStore>,
        broker: Arc<ProgressBroker>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            codec,
            store,
            broker,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Drive a task already moved to Processing to a terminal state and
    /// return the final record.
    pub async fn run(&self, task: Task, cancel: CancellationToken) -> Task {
        let task_id = task.id;
        let control = TaskControl::new(cancel, self.settings.timeout);
        let tracker = Arc::new(ProgressTracker::new(
            task,
            self.store.clone(),
            self.broker.clone(),
        ));

        tracing::info!(task_id = %task_id, "Task processing started");
        tracker.report(0.0, "Task started");

        // Set once this run starts writing the output file. Until then the
        // path may hold another task's artifact and must not be touched.
        let mut output_written = false;
        let outcome = match TaskWorkspace::new(self.settings.temp_dir.as_deref(), "webpforge-") {
            Ok(workspace) => {
                let outcome = self
                    .execute(&tracker, &control, &workspace, &mut output_written)
                    .await;
                workspace.cleanup();
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                tracing::info!(
                    task_id = %task_id,
                    frames = result.frames_processed,
                    ratio = result.compression_ratio,
                    elapsed_ms = result.processing_time_ms,
                    "Task completed"
                );
                tracker.finish(|t| t.complete(result))
            }
            Err(Error::Cancelled) => {
                tracing::info!(task_id = %task_id, "Task cancelled");
                if output_written {
                    self.discard_output(&tracker.snapshot().output_file).await;
                }
                tracker.finish(|t| t.cancel(CANCELLED_REASON))
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Task failed");
                if output_written {
                    self.discard_output(&tracker.snapshot().output_file).await;
                }
                tracker.finish(|t| t.fail(&e.to_string()))
            }
        }
    }

    async fn execute(
        &self,
        tracker: &Arc<ProgressTracker>,
        control: &TaskControl,
        workspace: &TaskWorkspace,
        output_written: &mut bool,
    ) -> Result<CompressionResult> {
        let started = Instant::now();
        let task = tracker.snapshot();

        // Parse
        control.check()?;
        let info = self.codec.probe(&task.input_file).await?;
        let total = info.frames.len();
        tracker.report(10.0, &format!("Parsed {total} frames"));

        // Extract
        let mut frames = Vec::with_capacity(total);
        for meta in info.frames {
            control.check()?;
            let dest = workspace.frame_path(meta.index);
            self.codec
                .extract_frame(&task.input_file, &meta, &dest)
                .await?;
            frames.push(FrameUnit::extracted(meta, dest));
        }
        tracker.report(30.0, &format!("Extracted {total} frames"));

        // Compress
        control.check()?;
        tracker.report(tracker::COMPRESS_START, "Compressing frames");
        let options = task.config.encode_options();
        let parallel = task.config.enable_parallel && total > 1;
        let (compressed, workers) = if parallel {
            let workers = frame_workers(&task.config, self.settings.default_frame_workers, total);
            let frames = self
                .compress_parallel(frames, options, workspace.path(), workers, tracker, control)
                .await?;
            (frames, workers)
        } else {
            let frames = self
                .compress_sequential(frames, &options, workspace.path(), tracker, control)
                .await?;
            (frames, 1)
        };

        // Reassemble
        control.check()?;
        tracker.report(90.0, "Reassembling animation");
        *output_written = true;
        self.codec.assemble(&compressed, &task.output_file).await?;
        control.check()?;

        let original_size = tokio::fs::metadata(&task.input_file).await?.len();
        let compressed_size = tokio::fs::metadata(&task.output_file).await?.len();

        Ok(CompressionResult::new(
            original_size,
            compressed_size,
            started.elapsed(),
            total,
            workers,
        ))
    }

    async fn compress_sequential(
        &self,
        frames: Vec<FrameUnit>,
        options: &EncodeOptions,
        dir: &Path,
        tracker: &ProgressTracker,
        control: &TaskControl,
    ) -> Result<Vec<FrameUnit>> {
        let total = frames.len();
        let mut compressed = Vec::with_capacity(total);
        for unit in frames {
            control.check()?;
            let done = compress_unit(self.codec.as_ref(), unit, dir, options).await?;
            tracker.frame_done(total);
            compressed.push(done);
        }
        Ok(compressed)
    }

    async fn compress_parallel(
        &self,
        frames: Vec<FrameUnit>,
        options: EncodeOptions,
        dir: &Path,
        workers: usize,
        tracker: &Arc<ProgressTracker>,
        control: &TaskControl,
    ) -> Result<Vec<FrameUnit>> {
        let total = frames.len();
        let pool = FramePool::new(workers, FailurePolicy::AbortOnFirst);

        let codec = self.codec.clone();
        let options = Arc::new(options);
        let dir = dir.to_path_buf();
        let progress = tracker.clone();
        pool.start(control.clone(), move |unit| {
            let codec = codec.clone();
            let options = options.clone();
            let dir = dir.clone();
            let progress = progress.clone();
            async move {
                let done = compress_unit(codec.as_ref(), unit, &dir, &options).await?;
                progress.frame_done(total);
                Ok(done)
            }
        });

        for unit in frames {
            if pool.submit(unit).await.is_err() {
                break;
            }
        }
        pool.close();

        let failures = pool.wait().await;
        control.check()?;
        if let Some(first) = failures.into_iter().next() {
            tracing::debug!(frame = first.index, "Aborting task on first frame failure");
            return Err(first.error);
        }

        let compressed = pool.into_results();
        if compressed.len() != total {
            return Err(Error::pipeline(
                "compress",
                format!("{} of {total} frames compressed", compressed.len()),
            ));
        }
        Ok(compressed)
    }

    async fn discard_output(&self, output: &Path) {
        match tokio::fs::remove_file(output).await {
            Ok(()) => tracing::debug!(path = %output.display(), "Removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %output.display(), error = %e, "Failed to remove partial output"),
        }
    }
}

async fn compress_unit(
    codec: &dyn Codec,
    unit: FrameUnit,
    dir: &Path,
    options: &EncodeOptions,
) -> Result<FrameUnit> {
    let dest = TaskWorkspace::compressed_path_in(dir, unit.index());
    codec.compress_frame(unit.path(), &dest, options).await?;
    Ok(unit.compressed(dest))
}
