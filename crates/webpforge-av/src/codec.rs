//! The codec seam between the task pipeline and the external tools.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use webpforge_common::{Error, Result};

use crate::command::ToolCommand;
use crate::frame::{AnimationInfo, EncodeOptions, FrameMeta, FrameUnit};
use crate::tools::{ToolRegistry, CWEBP, WEBPMUX};
use crate::webp;

/// Codec operations used by a task pipeline.
///
/// Every method is one external invocation (or, for `assemble`, one
/// invocation after validating its inputs). Implementations must be safe
/// to call from many frame workers at once.
#[async_trait]
pub trait Codec: Send + Sync {
    /// Read canvas and per-frame metadata of `input`.
    async fn probe(&self, input: &Path) -> Result<AnimationInfo>;

    /// Write frame `frame.index` of `input` to `dest`.
    async fn extract_frame(&self, input: &Path, frame: &FrameMeta, dest: &Path) -> Result<()>;

    /// Re-encode `src` into `dest`.
    async fn compress_frame(&self, src: &Path, dest: &Path, opts: &EncodeOptions) -> Result<()>;

    /// Build the output animation from `frames`, in slice order.
    async fn assemble(&self, frames: &[FrameUnit], output: &Path) -> Result<()>;
}

/// [`Codec`] backed by the libwebp command-line tools.
#[derive(Debug, Clone)]
pub struct WebpTools {
    registry: Arc<ToolRegistry>,
}

impl WebpTools {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    fn command(&self, tool: &str) -> Result<ToolCommand> {
        let cfg = self.registry.require(tool)?;
        let mut cmd = ToolCommand::new(cfg.path.clone());
        cmd.timeout(cfg.timeout);
        Ok(cmd)
    }
}

async fn ensure_written(tool: &str, path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(Error::tool(tool, format!("{} is empty", path.display()))),
        Err(_) => Err(Error::tool(
            tool,
            format!("{} was not created", path.display()),
        )),
    }
}

#[async_trait]
impl Codec for WebpTools {
    async fn probe(&self, input: &Path) -> Result<AnimationInfo> {
        let output = self
            .command(WEBPMUX)?
            .arg("-info")
            .arg(input.to_string_lossy())
            .execute()
            .await?;
        webp::parse_info(&output.stdout)
    }

    async fn extract_frame(&self, input: &Path, frame: &FrameMeta, dest: &Path) -> Result<()> {
        self.command(WEBPMUX)?
            .args(webp::extract_args(frame.index, dest, input))
            .execute()
            .await?;
        ensure_written(WEBPMUX, dest).await
    }

    async fn compress_frame(&self, src: &Path, dest: &Path, opts: &EncodeOptions) -> Result<()> {
        self.command(CWEBP)?
            .args(webp::encode_args(opts, src, dest))
            .execute()
            .await?;
        ensure_written(CWEBP, dest).await
    }

    async fn assemble(&self, frames: &[FrameUnit], output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        for frame in frames {
            ensure_written(WEBPMUX, frame.path()).await?;
        }

        self.command(WEBPMUX)?
            .args(webp::assemble_args(frames, output))
            .execute()
            .await?;
        ensure_written(WEBPMUX, output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_tool_is_reported_before_spawning() {
        let codec = WebpTools::new(Arc::new(ToolRegistry::default()));
        let err = codec.probe(Path::new("/tmp/anything.webp")).await.unwrap_err();
        assert_matches!(err, Error::Tool { ref tool, .. } if tool == "webpmux");
    }

    #[tokio::test]
    async fn assemble_rejects_empty_frame_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("frame_compressed_1.webp");
        std::fs::write(&empty, b"").unwrap();

        let meta = FrameMeta {
            index: 1,
            width: 1,
            height: 1,
            x: 0,
            y: 0,
            duration_ms: 10,
            dispose: crate::Dispose::None,
            blend: crate::Blend::NoBlend,
        };
        let frames = vec![FrameUnit::extracted(meta, PathBuf::from("x")).compressed(empty)];

        let registry = ToolRegistry::default().with_tool(
            WEBPMUX,
            "/nonexistent/webpmux",
            std::time::Duration::from_secs(1),
        );
        let codec = WebpTools::new(Arc::new(registry));
        let err = codec
            .assemble(&frames, &dir.path().join("out/anim.webp"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is empty"), "unexpected: {err}");
        assert!(dir.path().join("out").is_dir());
    }
}
