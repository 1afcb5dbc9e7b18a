// SPDX-License-Identifier: MIT
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::scorer::FaceId;

pub const MAGIC: [u8; 4] = *b"FREG";
pub const FORMAT_VERSION: u8 = 1;
pub const EOF_MARKER: [u8; 4] = *b"FEOF";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub format_version: u8,
}

impl FileHeader {
    #[must_use]
    pub fn current() -> Self {
        Self {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegisteredFace {
    pub id: FaceId,
    /// Final session score, `1..=100`.
    pub score: u8,
    /// The session reached a score of 100.
    pub complete: bool,
    pub frames_scored: u64,
    pub registered_at: SystemTime,
}
