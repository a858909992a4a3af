use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use webpforge_av::{EncodeOptions, Preset};
use webpforge_common::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, Failed and Cancelled admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Encoder settings captured when a task is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub quality: u8,
    pub method: u8,
    pub filter_strength: u8,
    pub preset: Preset,
    pub lossless: bool,
    pub alpha_quality: u8,
    /// Compress frames on a frame worker pool instead of one at a time
    pub enable_parallel: bool,
    /// Frame workers to use; 0 means the configured default
    pub max_concurrency: usize,
}

impl CompressionConfig {
    /// Settings for `quality` with the encoder defaults for everything else.
    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            method: 6,
            filter_strength: 100,
            preset: Preset::Photo,
            lossless: false,
            alpha_quality: quality / 2,
            enable_parallel: true,
            max_concurrency: 4,
        }
    }

    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            quality: self.quality,
            method: self.method,
            filter_strength: self.filter_strength,
            preset: self.preset,
            lossless: self.lossless,
            alpha_quality: self.alpha_quality,
        }
    }
}

/// Outcome of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub original_size: u64,
    pub compressed_size: u64,
    /// Compressed size as a percentage of the original
    pub compression_ratio: f64,
    pub processing_time_ms: u64,
    pub frames_processed: usize,
    pub parallel_workers: usize,
}

impl CompressionResult {
    pub fn new(
        original_size: u64,
        compressed_size: u64,
        elapsed: Duration,
        frames_processed: usize,
        parallel_workers: usize,
    ) -> Self {
        let compression_ratio = if original_size == 0 {
            0.0
        } else {
            compressed_size as f64 / original_size as f64 * 100.0
        };

        Self {
            original_size,
            compressed_size,
            compression_ratio,
            processing_time_ms: elapsed.as_millis() as u64,
            frames_processed,
            parallel_workers,
        }
    }

    pub fn bytes_saved(&self) -> u64 {
        self.original_size.saturating_sub(self.compressed_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub progress: f32,
    pub message: String,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub config: CompressionConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<CompressionResult>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(input_file: PathBuf, output_file: PathBuf, config: CompressionConfig) -> Self {
        Self {
            id: TaskId::new(),
            status: TaskStatus::Pending,
            progress: 0.0,
            message: "Task created".to_string(),
            input_file,
            output_file,
            config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this task owns the file at `path`: it will write there, or
    /// its finished output lives there.
    pub fn holds_output(&self, path: &Path) -> bool {
        self.output_file == path
            && matches!(
                self.status,
                TaskStatus::Pending | TaskStatus::Processing | TaskStatus::Completed
            )
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
        self.message = "Task started".to_string();
    }

    /// Record progress. Values are clamped to 0..=100 and never move backwards;
    /// terminal tasks are left untouched.
    pub fn update_progress(&mut self, progress: f32, message: &str) {
        if self.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        self.message = message.to_string();
    }

    pub fn complete(&mut self, result: CompressionResult) {
        self.status = TaskStatus::Completed;
        self.progress = 100.0;
        self.message = "Compression complete".to_string();
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: &str) {
        self.status = TaskStatus::Failed;
        self.progress = 100.0;
        self.message = format!("Compression failed: {reason}");
        self.result = None;
        self.error = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self, reason: &str) {
        self.status = TaskStatus::Cancelled;
        self.progress = 100.0;
        self.message = "Task cancelled".to_string();
        self.result = None;
        self.error = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes_saved: u64,
    pub average_compression_ratio: f64,
}

impl TaskStats {
    pub fn record(&mut self, task: &Task) {
        self.total += 1;
        match task.status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            PathBuf::from("/in/a.webp"),
            PathBuf::from("/out/a.webp"),
            CompressionConfig::new(30),
        )
    }

    #[test]
    fn new_task_is_pending_at_zero() {
        let t = task();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.progress, 0.0);
        assert!(t.result.is_none() && t.error.is_none());
        assert_eq!(t.config.alpha_quality, 15);
    }

    #[test]
    fn progress_never_decreases() {
        let mut t = task();
        t.start();
        t.update_progress(50.0, "compressing");
        t.update_progress(30.0, "late update");
        assert_eq!(t.progress, 50.0);
        assert_eq!(t.message, "late update");
        t.update_progress(250.0, "overflow");
        assert_eq!(t.progress, 100.0);
    }

    #[test]
    fn terminal_states_force_full_progress_and_one_outcome() {
        let mut done = task();
        done.start();
        done.complete(CompressionResult::new(200, 50, Duration::from_millis(10), 3, 2));
        assert_eq!(done.progress, 100.0);
        assert!(done.result.is_some() && done.error.is_none());

        let mut failed = task();
        failed.start();
        failed.fail("cwebp failed: boom");
        assert_eq!(failed.progress, 100.0);
        assert!(failed.result.is_none());
        assert_eq!(failed.message, "Compression failed: cwebp failed: boom");

        let mut cancelled = task();
        cancelled.cancel("cancelled by request");
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.result.is_none() && cancelled.error.is_some());
    }

    #[test]
    fn updates_after_terminal_are_ignored() {
        let mut t = task();
        t.fail("queue full");
        t.update_progress(10.0, "stale");
        assert_eq!(t.message, "Compression failed: queue full");
    }

    #[test]
    fn compression_ratio_is_percentage_of_original() {
        let r = CompressionResult::new(1000, 250, Duration::from_secs(2), 3, 3);
        assert!((r.compression_ratio - 25.0).abs() < f64::EPSILON);
        assert_eq!(r.processing_time_ms, 2000);
        assert_eq!(r.bytes_saved(), 750);
        assert_eq!(CompressionResult::new(0, 10, Duration::ZERO, 1, 1).compression_ratio, 0.0);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }
}
