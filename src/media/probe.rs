// SPDX-License-Identifier: MIT
use std::path::Path;
use std::process::{Command, Stdio};

use serde::Deserialize;

use super::SourceError;

#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: Option<u64>,
    pub fps: Option<f64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Runs `ffprobe` on the first video stream of `path`.
///
/// # Errors
///
/// Returns [`SourceError::Open`] if `ffprobe` cannot be run, fails, or reports no usable
/// video stream.
pub fn probe_file(path: &Path) -> Result<StreamInfo, SourceError> {
    let uri = path.display().to_string();
    let open_err = |reason: String| SourceError::Open {
        uri: uri.clone(),
        reason,
    };

    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,nb_frames,avg_frame_rate")
        .arg("-of")
        .arg("json")
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| open_err(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(open_err(stderr.trim().to_string()));
    }

    parse_probe_json(&output.stdout).map_err(open_err)
}

fn parse_probe_json(bytes: &[u8]) -> Result<StreamInfo, String> {
    let parsed: ProbeOutput =
        serde_json::from_slice(bytes).map_err(|e| format!("unreadable ffprobe output: {e}"))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err("video stream has no dimensions".to_string());
    };
    if width == 0 || height == 0 {
        return Err(format!("video stream has empty dimensions {width}x{height}"));
    }

    Ok(StreamInfo {
        width,
        height,
        frame_count: stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|&n| n > 0),
        fps: stream.avg_frame_rate.as_deref().and_then(parse_rational),
    })
}

/// Parses ffprobe rationals such as `30000/1001`. Returns `None` for `0/0`.
fn parse_rational(text: &str) -> Option<f64> {
    let (num, den) = text.split_once('/').unwrap_or((text, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}
