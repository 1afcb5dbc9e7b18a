// SPDX-License-Identifier: MIT
//! Wire format spoken with the external analysis engine.
//!
//! Every message is a little-endian `u32` length followed by a `postcard` payload. The
//! client opens with a [`Hello`] and expects the engine to echo one back.

use std::io::{Read, Write};

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{DetectionResult, FaceId, Region};

pub const MAGIC: [u8; 4] = *b"FSCR";
pub const PROTOCOL_VERSION: u8 = 1;
/// Upper bound on a single message; a 4K BGR frame is ~25 MB.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub magic: [u8; 4],
    pub protocol_version: u8,
}

impl Hello {
    #[must_use]
    pub fn current() -> Self {
        Self {
            magic: MAGIC,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the magic bytes or version differ from ours.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            bail!("engine answered with invalid magic bytes {:?}", self.magic);
        }
        if self.protocol_version != PROTOCOL_VERSION {
            bail!(
                "unsupported engine protocol version {} (expected {PROTOCOL_VERSION})",
                self.protocol_version
            );
        }
        Ok(())
    }
}

#[derive(Serialize, Debug)]
pub struct ScoreRequest<'a> {
    pub identifier: Option<FaceId>,
    pub width: u32,
    pub height: u32,
    pub region: Region,
    pub pixels: &'a [u8],
}

#[derive(Serialize, Debug)]
pub enum Request<'a> {
    Score(ScoreRequest<'a>),
    Shutdown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Detection(DetectionResult),
    Error(String),
}

/// Writes one length-prefixed message and flushes.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_message<T: Serialize>(writer: &mut impl Write, message: &T) -> Result<()> {
    let serialized = postcard::to_stdvec(message).context("failed to serialize engine message")?;
    if serialized.len() > MAX_MESSAGE_LEN {
        bail!("engine message of {} bytes exceeds limit", serialized.len());
    }

    #[allow(clippy::cast_possible_truncation)]
    let len = serialized.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .context("failed to write message length")?;
    writer
        .write_all(&serialized)
        .context("failed to write message data")?;
    writer.flush().context("failed to flush engine pipe")?;
    Ok(())
}

/// Reads one length-prefixed message.
///
/// # Errors
///
/// Returns an error on EOF, oversize messages, or undecodable payloads.
pub fn read_message<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .context("failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        bail!("engine message of {len} bytes exceeds limit");
    }

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .context("failed to read message data")?;

    postcard::from_bytes(&data).context("failed to deserialize engine message")
}
