// SPDX-License-Identifier: MIT
pub mod buffered;
pub mod engine;
pub mod protocol;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::media::Image;

pub type FaceId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrientationHint {
    Center,
    Up,
    Down,
    Left,
    Right,
}

impl OrientationHint {
    /// Fixed order of the display slots.
    pub const DISPLAY_ORDER: [Self; 5] = [Self::Up, Self::Down, Self::Left, Self::Right, Self::Center];

    #[must_use]
    pub fn glyph(self) -> char {
        match self {
            Self::Center => 'c',
            Self::Up => 'u',
            Self::Down => 'd',
            Self::Left => 'l',
            Self::Right => 'r',
        }
    }

    #[must_use]
    pub fn slot(self) -> usize {
        match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
            Self::Center => 4,
        }
    }
}

/// Pixel rectangle handed to the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    #[must_use]
    pub fn full(image: &Image) -> Self {
        Self {
            x: 0,
            y: 0,
            width: image.width,
            height: image.height,
        }
    }

    /// Intersects the region with the image bounds.
    #[must_use]
    pub fn clamped_to(self, image: &Image) -> Self {
        let x = self.x.min(image.width);
        let y = self.y.min(image.height);
        Self {
            x,
            y,
            width: self.width.min(image.width - x),
            height: self.height.min(image.height - y),
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, width, height] = parts.as_slice() else {
            return Err(format!("expected x,y,width,height but got {s:?}"));
        };
        let parse = |v: &str| {
            v.parse::<u32>()
                .map_err(|e| format!("invalid region component {v:?}: {e}"))
        };
        let region = Self {
            x: parse(*x)?,
            y: parse(*y)?,
            width: parse(*width)?,
            height: parse(*height)?,
        };
        if region.width == 0 || region.height == 0 {
            return Err("region must have a non-zero size".to_string());
        }
        Ok(region)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{} {}x{}", self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub score: i32,
    pub orientation_hints: Vec<OrientationHint>,
}

impl DetectionResult {
    #[must_use]
    pub fn not_detected() -> Self {
        Self::default()
    }
}

/// Per-frame judgement delegated to the analysis engine.
///
/// Implementations either report a result (possibly "not detected") or fail; a failure
/// ends the session.
pub trait Scorer {
    /// # Errors
    ///
    /// Returns an error if the engine cannot score the frame.
    fn score(
        &mut self,
        image: &Image,
        region: Region,
        identifier: Option<FaceId>,
    ) -> Result<DetectionResult>;
}

impl<S: Scorer + ?Sized> Scorer for Box<S> {
    fn score(
        &mut self,
        image: &Image,
        region: Region,
        identifier: Option<FaceId>,
    ) -> Result<DetectionResult> {
        (**self).score(image, region, identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> Image {
        Image {
            width,
            height,
            data: vec![0; Image::byte_len(width, height)],
        }
    }

    #[test]
    fn display_slots_follow_fixed_order() {
        for (i, hint) in OrientationHint::DISPLAY_ORDER.iter().enumerate() {
            assert_eq!(hint.slot(), i);
        }
        let glyphs: String = OrientationHint::DISPLAY_ORDER.iter().map(|h| h.glyph()).collect();
        assert_eq!(glyphs, "udlrc");
    }

    #[test]
    fn region_parses_from_cli_text() {
        let region: Region = "10, 20,300,400".parse().unwrap();
        assert_eq!(
            region,
            Region {
                x: 10,
                y: 20,
                width: 300,
                height: 400
            }
        );
        assert!("1,2,3".parse::<Region>().is_err());
        assert!("1,2,0,4".parse::<Region>().is_err());
        assert!("a,2,3,4".parse::<Region>().is_err());
    }

    #[test]
    fn region_clamps_to_image() {
        let img = image(100, 50);
        let region = Region {
            x: 80,
            y: 40,
            width: 50,
            height: 50,
        };
        assert_eq!(
            region.clamped_to(&img),
            Region {
                x: 80,
                y: 40,
                width: 20,
                height: 10
            }
        );
        assert_eq!(Region::full(&img).clamped_to(&img), Region::full(&img));
    }
}
