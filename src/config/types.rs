use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use webpforge_av::{Preset, ToolsConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tasks: TasksConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow cross-origin requests from any origin
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Require the shared token on every route except /health
    #[serde(default)]
    pub enabled: bool,

    /// Shared secret (generate with `webpforge generate-token`), sent as
    /// `Authorization: Bearer <token>` or `?token=<token>`
    #[serde(default)]
    pub token: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TasksConfig {
    /// Number of tasks processed concurrently; the queue holds twice as many
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wall-clock limit for one task, measured from when a worker claims it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Age after which finished tasks are purged
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Inputs are resolved relative to this directory
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Parent of per-task workspaces (system temp dir when unset)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Capacity of each live progress subscription
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,

    /// Interval between keep-alive pings on idle progress sockets
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

fn default_workers() -> usize {
    2
}
fn default_timeout_secs() -> u64 {
    30 * 60
}
fn default_retention_hours() -> u64 {
    24
}
fn default_cleanup_interval() -> u64 {
    60 * 60
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./outputs")
}
fn default_progress_buffer() -> usize {
    10
}
fn default_keepalive() -> u64 {
    30
}

impl TasksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            retention_hours: default_retention_hours(),
            cleanup_interval_secs: default_cleanup_interval(),
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            temp_dir: None,
            progress_buffer: default_progress_buffer(),
            keepalive_secs: default_keepalive(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Compress frames on a frame worker pool; requests can only opt out
    #[serde(default = "default_true")]
    pub enable_parallel: bool,

    /// Frame workers per task when the request does not choose
    #[serde(default = "default_frame_workers")]
    pub frame_workers: usize,

    #[serde(default)]
    pub default_preset: Preset,

    #[serde(default = "default_quality")]
    pub default_quality: u8,
}

fn default_frame_workers() -> usize {
    num_cpus::get()
}
fn default_quality() -> u8 {
    75
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            frame_workers: default_frame_workers(),
            default_preset: Preset::default(),
            default_quality: default_quality(),
        }
    }
}
