//! # webpforge-av
//!
//! The external-process boundary of webpforge. Every codec operation runs
//! as a subprocess of `webpmux` or `cwebp`:
//!
//! - **[`ToolCommand`]** -- subprocess builder with a per-invocation timeout.
//! - **[`ToolRegistry`]** -- discovers the tool binaries (config override or `PATH`).
//! - **[`Codec`]** -- the four operations a task pipeline needs (probe, extract,
//!   compress, assemble), implemented for real tools by [`WebpTools`].
//! - **[`TaskWorkspace`]** -- per-task temporary directory for frame files.
//! - **[`FrameUnit`]** -- one frame of an animation as it moves through a task.

pub mod codec;
pub mod command;
pub mod frame;
pub mod tools;
pub mod webp;
pub mod workspace;

pub use codec::{Codec, WebpTools};
pub use command::{ToolCommand, ToolOutput};
pub use frame::{AnimationInfo, Blend, Dispose, EncodeOptions, FrameMeta, FrameStage, FrameUnit, Preset};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry, ToolsConfig};
pub use workspace::TaskWorkspace;
