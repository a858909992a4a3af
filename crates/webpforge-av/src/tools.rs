//! External tool detection.
//!
//! The [`ToolRegistry`] resolves the locations of `webpmux` and `cwebp`
//! once at startup and hands out [`ToolConfig`]s to the codec.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use webpforge_common::{Error, Result};

use crate::command::DEFAULT_TIMEOUT;

pub const WEBPMUX: &str = "webpmux";
pub const CWEBP: &str = "cwebp";

/// Tools every conversion needs.
const KNOWN_TOOLS: &[&str] = &[WEBPMUX, CWEBP];

/// `[tools]` section of the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Explicit path to `webpmux`; searched on `PATH` when unset.
    #[serde(default)]
    pub webpmux_path: Option<PathBuf>,

    /// Explicit path to `cwebp`; searched on `PATH` when unset.
    #[serde(default)]
    pub cwebp_path: Option<PathBuf>,

    /// Per-invocation timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            webpmux_path: None,
            cwebp_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// A resolved external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Tool name (e.g. "cwebp").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
    /// Maximum execution time for one invocation.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

/// Serde helpers to (de)serialize `Duration` as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if the tool ran.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools, preferring configured paths that exist and falling
    /// back to [`which::which`]. Tools that are not found are omitted.
    pub fn discover(config: &ToolsConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                WEBPMUX => config.webpmux_path.as_deref(),
                CWEBP => config.cwebp_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(tool = name, path = %p.display(), "Configured tool path does not exist, searching PATH");
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(
                    name.to_string(),
                    ToolConfig {
                        name: name.to_string(),
                        path,
                        timeout,
                    },
                );
            }
        }

        Self { tools }
    }

    /// Register a tool at an explicit path, replacing any discovered entry.
    pub fn with_tool(mut self, name: &str, path: impl Into<PathBuf>, timeout: Duration) -> Self {
        self.tools.insert(
            name.to_string(),
            ToolConfig {
                name: name.to_string(),
                path: path.into(),
                timeout,
            },
        );
        self
    }

    /// The [`ToolConfig`] for `name`, or [`Error::Tool`] if it was not found.
    pub fn require(&self, name: &str) -> Result<&ToolConfig> {
        self.tools
            .get(name)
            .ok_or_else(|| Error::tool(name, format!("{name} not found; is it installed and in PATH?")))
    }

    /// Fail unless every known tool is available.
    pub fn validate(&self) -> Result<()> {
        for &name in KNOWN_TOOLS {
            self.require(name)?;
        }
        Ok(())
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.trim().to_string())
}
