//! Frame and encoding value types.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use webpforge_common::Error;

/// What the decoder does with a frame's area before drawing the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dispose {
    None,
    Background,
}

/// Whether a frame is alpha-blended onto the canvas or overwrites it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Blend {
    Blend,
    NoBlend,
}

/// Per-frame metadata reported by `webpmux -info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// 1-based position within the animation.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
    pub duration_ms: u32,
    pub dispose: Dispose,
    pub blend: Blend,
}

/// Parsed description of an animated WebP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationInfo {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Frame rows parsed from the info table, in index order.
    pub frames: Vec<FrameMeta>,
}

/// Which phase produced the file a [`FrameUnit`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Extracted,
    Compressed,
}

/// One frame of a task's animation.
///
/// A unit is never edited. Compression consumes the extracted unit and
/// yields a new one pointing at the compressed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameUnit {
    meta: FrameMeta,
    path: PathBuf,
    stage: FrameStage,
}

impl FrameUnit {
    pub fn extracted(meta: FrameMeta, path: PathBuf) -> Self {
        Self {
            meta,
            path,
            stage: FrameStage::Extracted,
        }
    }

    /// The same frame, now backed by the compressed file at `path`.
    #[must_use]
    pub fn compressed(self, path: PathBuf) -> Self {
        Self {
            meta: self.meta,
            path,
            stage: FrameStage::Compressed,
        }
    }

    pub fn index(&self) -> usize {
        self.meta.index
    }

    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }
}

/// cwebp `-preset` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Default,
    Picture,
    #[default]
    Photo,
    Drawing,
    Icon,
    Text,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Default,
        Preset::Picture,
        Preset::Photo,
        Preset::Drawing,
        Preset::Icon,
        Preset::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Default => "default",
            Preset::Picture => "picture",
            Preset::Photo => "photo",
            Preset::Drawing => "drawing",
            Preset::Icon => "icon",
            Preset::Text => "text",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown preset '{s}', expected one of: default, picture, photo, drawing, icon, text"
                ))
            })
    }
}

/// Encoder settings for one `cwebp` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    pub quality: u8,
    pub method: u8,
    pub filter_strength: u8,
    pub preset: Preset,
    pub lossless: bool,
    pub alpha_quality: u8,
}
