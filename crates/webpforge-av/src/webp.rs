//! `webpmux` output parsing and command-line construction for `webpmux`
//! and `cwebp`.

use std::path::Path;

use webpforge_common::{Error, Result};

use crate::frame::{AnimationInfo, Blend, Dispose, EncodeOptions, FrameMeta, FrameUnit};

/// Parse the output of `webpmux -info <file>`.
///
/// Expected shape:
///
/// ```text
/// Canvas size: 400 x 400
/// Features present: animation transparency
/// Number of frames: 2
/// No.: width height alpha x_offset y_offset duration   dispose blend image_size  compression
///   1:   400   400    no        0        0       70       none    no       5178       lossy
///   2:   400   394   yes        0        6       70 background   yes      13176       lossy
/// ```
///
/// Rows that cannot be read are skipped with a warning. An animation with
/// no readable rows is an error.
pub fn parse_info(output: &str) -> Result<AnimationInfo> {
    let mut info = AnimationInfo {
        canvas_width: 0,
        canvas_height: 0,
        frames: Vec::new(),
    };
    let mut in_table = false;

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Canvas size:") {
            match parse_canvas(rest) {
                Some((w, h)) => {
                    info.canvas_width = w;
                    info.canvas_height = h;
                }
                None => tracing::warn!(line, "Could not parse canvas size"),
            }
            continue;
        }

        if line.starts_with("No.") && line.contains("duration") {
            in_table = true;
            continue;
        }

        if in_table {
            if line.is_empty() {
                break;
            }
            match parse_frame_row(line) {
                Some(frame) => info.frames.push(frame),
                None => tracing::warn!(line, "Skipping unreadable frame row"),
            }
        }
    }

    if info.frames.is_empty() {
        return Err(Error::pipeline("parse", "no frames found in webpmux output"));
    }

    info.frames.sort_by_key(|f| f.index);
    Ok(info)
}

fn parse_canvas(rest: &str) -> Option<(u32, u32)> {
    let (w, h) = rest.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn parse_frame_row(line: &str) -> Option<FrameMeta> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 9 {
        return None;
    }

    Some(FrameMeta {
        index: fields[0].trim_end_matches(':').parse().ok()?,
        width: fields[1].parse().ok()?,
        height: fields[2].parse().ok()?,
        x: fields[4].parse().ok()?,
        y: fields[5].parse().ok()?,
        duration_ms: fields[6].parse().ok()?,
        dispose: if fields[7] == "background" {
            Dispose::Background
        } else {
            Dispose::None
        },
        blend: if fields[8] == "yes" {
            Blend::Blend
        } else {
            Blend::NoBlend
        },
    })
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

/// `webpmux` arguments that write frame `index` of `input` to `dest`.
pub fn extract_args(index: usize, dest: &Path, input: &Path) -> Vec<String> {
    vec![
        "-get".into(),
        "frame".into(),
        index.to_string(),
        "-o".into(),
        path_arg(dest),
        path_arg(input),
    ]
}

/// `cwebp` arguments that re-encode `src` into `dest`.
pub fn encode_args(opts: &EncodeOptions, src: &Path, dest: &Path) -> Vec<String> {
    let mut args = Vec::with_capacity(32);
    if opts.lossless {
        args.push("-lossless".to_string());
    }
    args.extend([
        "-q".to_string(),
        opts.quality.to_string(),
        "-m".into(),
        opts.method.to_string(),
        "-preset".into(),
        opts.preset.as_str().into(),
        "-mt".into(),
        "-f".into(),
        opts.filter_strength.to_string(),
        "-sharpness".into(),
        "0".into(),
        "-sns".into(),
        "100".into(),
        "-segments".into(),
        "4".into(),
        "-pass".into(),
        "10".into(),
        "-alpha_q".into(),
        opts.alpha_quality.to_string(),
        "-metadata".into(),
        "none".into(),
        path_arg(src),
        "-o".into(),
        path_arg(dest),
    ]);
    args
}

/// `webpmux` frame option: `+duration+x+y+dispose` followed by `+b` or `-b`.
pub fn frame_option(meta: &FrameMeta) -> String {
    let dispose = match meta.dispose {
        Dispose::None => 0,
        Dispose::Background => 1,
    };
    let blend = match meta.blend {
        Blend::Blend => "+b",
        Blend::NoBlend => "-b",
    };
    format!("+{}+{}+{}+{}{}", meta.duration_ms, meta.x, meta.y, dispose, blend)
}

/// `webpmux` arguments that assemble `frames`, in the given order, into a
/// looping animation at `output`.
pub fn assemble_args(frames: &[FrameUnit], output: &Path) -> Vec<String> {
    let mut args = Vec::with_capacity(frames.len() * 3 + 4);
    for frame in frames {
        args.push("-frame".to_string());
        args.push(path_arg(frame.path()));
        args.push(frame_option(frame.meta()));
    }
    args.extend(["-loop".to_string(), "0".into(), "-o".into(), path_arg(output)]);
    args
}
