// SPDX-License-Identifier: MIT
//! `ffmpeg` subprocess backend.
//!
//! Frames arrive as raw `bgr24` on the child's stdout. For files the `showinfo` filter is
//! enabled and a helper thread parses each frame's `pts_time` from stderr, so emitted
//! timestamps follow the container's real presentation times even for variable frame
//! rate media. Each `showinfo` line carries the frame index, so timestamps are matched to
//! frames by index rather than by arrival order. Live cameras are stamped with the wall clock since the device was opened.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, trace, warn};

use super::probe::{StreamInfo, probe_file};
use super::{Decoded, DecodedFrame, Decoder, Image, SourceError};
use crate::child;

const PTS_CHANNEL_CAPACITY: usize = 64;
const PTS_WAIT: Duration = Duration::from_millis(500);
const TERMINATE_GRACE: Duration = Duration::from_millis(500);
const DEFAULT_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Presentation time reported by `showinfo` for frame `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FramePts {
    index: u64,
    pts_ms: Option<i64>,
}

pub struct FfmpegDecoder {
    uri: String,
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    pts_rx: Option<Receiver<FramePts>>,
    pending_pts: Option<FramePts>,
    stderr_reader: Option<JoinHandle<()>>,
    width: u32,
    height: u32,
    total_frames: Option<u64>,
    fallback_fps: f64,
    frames_read: u64,
    opened_at: Instant,
    live: bool,
}

impl FfmpegDecoder {
    /// Probes `path` and starts decoding it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Open`] if the file is missing, cannot be probed, or `ffmpeg`
    /// cannot be spawned.
    pub fn open_file(path: &Path) -> Result<Self, SourceError> {
        let uri = path.display().to_string();
        if !path.is_file() {
            return Err(SourceError::Open {
                uri,
                reason: "no such file".to_string(),
            });
        }

        let StreamInfo {
            width,
            height,
            frame_count,
            fps,
        } = probe_file(path)?;
        debug!(%uri, width, height, ?frame_count, ?fps, "probed video file");

        let mut cmd = Command::new("ffmpeg");
        cmd.args(file_args(path));

        let (tx, rx) = bounded(PTS_CHANNEL_CAPACITY);
        let (child, stdout, stderr_reader) = spawn(cmd, &uri, Some(tx))?;

        Ok(Self {
            uri,
            child,
            stdout: Some(stdout),
            pts_rx: Some(rx),
            pending_pts: None,
            stderr_reader: Some(stderr_reader),
            width,
            height,
            total_frames: frame_count,
            fallback_fps: fps.unwrap_or(DEFAULT_FPS),
            frames_read: 0,
            opened_at: Instant::now(),
            live: false,
        })
    }

    /// Opens `/dev/video{index}` through V4L2, scaled to the requested resolution.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Open`] if the device node does not exist or `ffmpeg` cannot
    /// be spawned.
    pub fn open_camera(index: i32, settings: CameraSettings) -> Result<Self, SourceError> {
        let device = format!("/dev/video{index}");
        if !Path::new(&device).exists() {
            return Err(SourceError::Open {
                uri: device,
                reason: "no such device".to_string(),
            });
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-nostdin")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("video4linux2")
            .arg("-framerate")
            .arg(settings.fps.to_string())
            .arg("-video_size")
            .arg(format!("{}x{}", settings.width, settings.height))
            .arg("-i")
            .arg(&device)
            .arg("-vf")
            .arg(format!("scale={}:{}", settings.width, settings.height))
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");

        let (child, stdout, stderr_reader) = spawn(cmd, &device, None)?;

        Ok(Self {
            uri: device,
            child,
            stdout: Some(stdout),
            pts_rx: None,
            pending_pts: None,
            stderr_reader: Some(stderr_reader),
            width: settings.width,
            height: settings.height,
            total_frames: None,
            fallback_fps: f64::from(settings.fps.max(1)),
            frames_read: 0,
            opened_at: Instant::now(),
            live: true,
        })
    }

    /// Stops the child process and joins the stderr reader. Idempotent.
    pub fn stop(&mut self) {
        // Closing our end of the pipe unblocks an ffmpeg stuck writing a frame.
        if self.stdout.take().is_none() {
            return;
        }
        self.pts_rx.take();

        child::terminate(&mut self.child, &self.uri, TERMINATE_GRACE);

        if let Some(handle) = self.stderr_reader.take() {
            let _ = handle.join();
        }
    }

    fn fallback_timestamp(&self) -> i64 {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let ms = (self.frames_read as f64 * 1000.0 / self.fallback_fps).round() as i64;
        ms
    }

    fn next_timestamp(&mut self) -> Option<i64> {
        if self.live {
            return Some(i64::try_from(self.opened_at.elapsed().as_millis()).unwrap_or(i64::MAX));
        }
        let Some(rx) = self.pts_rx.as_ref() else {
            return Some(self.fallback_timestamp());
        };
        let index = self.frames_read;
        match pair_pts(&mut self.pending_pts, index, || rx.recv_timeout(PTS_WAIT).ok()) {
            Some(pts_ms) => pts_ms,
            None => {
                debug!(uri = %self.uri, frame = index, "no showinfo timestamp, using frame index");
                Some(self.fallback_timestamp())
            }
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn decode(&mut self) -> Result<Decoded, SourceError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(Decoded::EndOfStream);
        };

        let mut data = vec![0u8; Image::byte_len(self.width, self.height)];
        match stdout.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(Decoded::EndOfStream),
            Err(source) => {
                return Err(SourceError::Read {
                    uri: self.uri.clone(),
                    source,
                });
            }
        }

        let timestamp = self.next_timestamp();
        self.frames_read += 1;

        Ok(match timestamp {
            Some(timestamp_ms) => Decoded::Frame(DecodedFrame {
                image: Image {
                    width: self.width,
                    height: self.height,
                    data,
                },
                timestamp_ms,
            }),
            None => Decoded::Failed,
        })
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Arguments decoding `path` to raw `bgr24` with `showinfo` timestamps.
///
/// Auto-rotation is disabled so decoded frames keep the stored dimensions that `ffprobe`
/// reports.
fn file_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "info", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_owned());
    args.extend(
        [
            "-map", "0:v:0", "-vf", "showinfo", "-fps_mode", "passthrough", "-pix_fmt", "bgr24",
            "-f", "rawvideo", "-",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args
}

fn spawn(
    mut cmd: Command,
    uri: &str,
    pts_tx: Option<Sender<FramePts>>,
) -> Result<(Child, BufReader<ChildStdout>, JoinHandle<()>), SourceError> {
    let open_err = |reason: String| SourceError::Open {
        uri: uri.to_string(),
        reason,
    };

    let mut child = child::own_process_group(&mut cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| open_err(format!("failed to spawn ffmpeg: {e}")))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(open_err("failed to capture ffmpeg pipes".to_string()));
    };

    let label = uri.to_string();
    let reader = thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || drain_stderr(stderr, &label, pts_tx.as_ref()));

    match reader {
        Ok(handle) => Ok((child, BufReader::new(stdout), handle)),
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(open_err(format!("failed to spawn ffmpeg-stderr thread: {e}")))
        }
    }
}

fn drain_stderr(stderr: ChildStderr, uri: &str, pts_tx: Option<&Sender<FramePts>>) {
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else { break };

        if let Some(tx) = pts_tx
            && line.contains("Parsed_showinfo")
            && let Some(entry) = parse_showinfo(&line)
        {
            if tx.send(entry).is_err() {
                break;
            }
            continue;
        }

        if line.contains("rror") {
            warn!(uri, "ffmpeg: {line}");
        } else {
            trace!(uri, "ffmpeg: {line}");
        }
    }
}

/// Finds the timestamp of frame `index`. Entries for earlier frames arrived too late and
/// are dropped; an entry for a later frame is parked in `pending` until its frame comes.
/// `None` means no entry for `index` is available.
fn pair_pts(
    pending: &mut Option<FramePts>,
    index: u64,
    mut next: impl FnMut() -> Option<FramePts>,
) -> Option<Option<i64>> {
    loop {
        let entry = match pending.take() {
            Some(entry) => entry,
            None => next()?,
        };
        match entry.index.cmp(&index) {
            Ordering::Equal => return Some(entry.pts_ms),
            Ordering::Less => trace!(stale = entry.index, index, "dropping late showinfo entry"),
            Ordering::Greater => {
                *pending = Some(entry);
                return None;
            }
        }
    }
}

/// Frame index and timestamp of a `showinfo` frame line. Other lines yield `None`.
fn parse_showinfo(line: &str) -> Option<FramePts> {
    if !line.contains("pts_time:") {
        return None;
    }
    let (_, rest) = line.split_once(" n:")?;
    let index = rest.split_whitespace().next()?.parse().ok()?;
    Some(FramePts {
        index,
        pts_ms: parse_showinfo_pts_ms(line),
    })
}

/// Extracts `pts_time` from a `showinfo` log line as whole milliseconds.
fn parse_showinfo_pts_ms(line: &str) -> Option<i64> {
    let (_, rest) = line.split_once("pts_time:")?;
    let token = rest.split_whitespace().next()?;
    let seconds: f64 = token.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let ms = (seconds * 1000.0).round() as i64;
    Some(ms)
}
