// SPDX-License-Identifier: MIT
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use num_format::{Locale, ToFormattedString};

use crate::scorer::{DetectionResult, OrientationHint};
use crate::session::{FrameSink, SessionOutcome};

const RULE: &str = "******************************************************************";

/// Per-frame analysis log, one row per scored frame.
pub struct CsvReport<W: Write> {
    out: W,
    rows: u64,
}

impl CsvReport<BufWriter<File>> {
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the header cannot be written.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Self::with_writer(BufWriter::new(file))
    }
}

impl<W: Write> CsvReport<W> {
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn with_writer(mut out: W) -> Result<Self> {
        writeln!(out, "timestamp_ms,detected,score,hints").context("failed to write CSV header")?;
        Ok(Self { out, rows: 0 })
    }

    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// # Errors
    ///
    /// Returns an error if the output cannot be flushed.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush().context("failed to flush CSV output")?;
        Ok(self.out)
    }
}

impl<W: Write> FrameSink for CsvReport<W> {
    fn record(&mut self, timestamp_ms: i64, result: &DetectionResult) -> Result<()> {
        let mut hints: Vec<OrientationHint> = result.orientation_hints.clone();
        hints.sort_by_key(|h| h.slot());
        hints.dedup();
        let glyphs: String = hints.iter().map(|h| h.glyph()).collect();

        writeln!(
            self.out,
            "{timestamp_ms},{},{},{glyphs}",
            u8::from(result.detected),
            result.score
        )
        .context("failed to write CSV row")?;
        self.rows += 1;
        Ok(())
    }
}

/// `<video>.csv` next to the input.
#[must_use]
pub fn default_csv_path(video: &Path) -> PathBuf {
    let mut name = video.as_os_str().to_owned();
    name.push(".csv");
    PathBuf::from(name)
}

/// Frame counts of one analysis pass.
///
/// # Errors
///
/// Returns an error if `out` cannot be written.
pub fn write_summary(out: &mut impl Write, outcome: &SessionOutcome) -> Result<()> {
    writeln!(out, "{RULE}")?;
    writeln!(
        out,
        "Processed frame count: {}",
        outcome.frames_scored.to_formatted_string(&Locale::en)
    )?;
    writeln!(
        out,
        "Frames w/faces: {}",
        outcome.frames_with_detection.to_formatted_string(&Locale::en)
    )?;
    writeln!(
        out,
        "Percent of frames w/faces: {:.2}%",
        outcome.detection_percent()
    )?;
    writeln!(out, "{RULE}")?;
    Ok(())
}
