// SPDX-License-Identifier: MIT
pub mod ffmpeg;
pub mod probe;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Container extensions accepted for file sources, lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["avi", "mov", "flv", "webm", "wmv", "mp4"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unsupported file extension {extension:?} for {}", path.display())]
    UnsupportedExtension { path: PathBuf, extension: String },
    #[error("invalid camera index {0}")]
    InvalidCamera(i32),
    #[error("failed to open video source {uri}: {reason}")]
    Open { uri: String, reason: String },
    #[error("failed to read frame from {uri}")]
    Read {
        uri: String,
        #[source]
        source: io::Error,
    },
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    File(PathBuf),
    Camera(i32),
}

impl MediaSource {
    /// Validates a file source against [`SUPPORTED_EXTENSIONS`].
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnsupportedExtension`] when the extension is missing or unknown.
    pub fn file(path: &Path) -> Result<Self, SourceError> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(SourceError::UnsupportedExtension {
                path: path.to_path_buf(),
                extension,
            });
        }
        Ok(Self::File(path.to_path_buf()))
    }

    /// Validates a camera source.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidCamera`] for negative indices.
    pub fn camera(index: i32) -> Result<Self, SourceError> {
        if index < 0 {
            return Err(SourceError::InvalidCamera(index));
        }
        Ok(Self::Camera(index))
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Camera(index) => write!(f, "camera #{index}"),
        }
    }
}

/// A packed BGR8 image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    #[must_use]
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub image: Image,
    pub timestamp_ms: i64,
}

/// Result of a single grab + retrieve on the underlying stream.
#[derive(Debug)]
pub enum Decoded {
    Frame(DecodedFrame),
    /// The backend produced nothing usable for this frame. May be a bad frame or the
    /// end of the stream; the caller decides by retrying.
    Failed,
    /// The backend positively reported that no more frames exist.
    EndOfStream,
}

/// An open, exclusively owned media handle.
pub trait Decoder {
    /// Decodes the next underlying frame. Blocks until the backend answers.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Read`] when the backend can no longer be read from.
    fn decode(&mut self) -> Result<Decoded, SourceError>;

    /// Total frame count, when the container advertises one.
    fn total_frames(&self) -> Option<u64> {
        None
    }

    fn is_live(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

impl<D: Decoder + ?Sized> Decoder for Box<D> {
    fn decode(&mut self) -> Result<Decoded, SourceError> {
        (**self).decode()
    }

    fn total_frames(&self) -> Option<u64> {
        (**self).total_frames()
    }

    fn is_live(&self) -> bool {
        (**self).is_live()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
