// SPDX-License-Identifier: MIT
use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::scorer::OrientationHint;
use crate::session::{SessionOutcome, SessionStatus};

/// Front end a session reports to.
pub trait SessionView {
    /// # Errors
    ///
    /// Returns an error if the view cannot be drawn.
    fn render(&mut self, status: &SessionStatus<'_>) -> Result<()>;

    /// Polled once per iteration. Non-interactive views never cancel.
    ///
    /// # Errors
    ///
    /// Returns an error if input cannot be read.
    fn cancel_requested(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// # Errors
    ///
    /// Returns an error if the view cannot be closed cleanly.
    fn finish(&mut self, _outcome: &SessionOutcome) -> Result<()> {
        Ok(())
    }
}

/// One glyph per [`OrientationHint::DISPLAY_ORDER`] slot, blank when absent.
#[must_use]
pub fn format_hint_slots(hints: &[OrientationHint]) -> String {
    let mut slots = [' '; OrientationHint::DISPLAY_ORDER.len()];
    for hint in hints {
        slots[hint.slot()] = hint.glyph();
    }
    slots.iter().collect()
}

/// `Score=NNN Hint: udlrc`, overwritten in place.
pub struct ScoreLine<W: Write = io::Stdout> {
    out: W,
}

impl ScoreLine {
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl<W: Write> ScoreLine<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> SessionView for ScoreLine<W> {
    fn render(&mut self, status: &SessionStatus<'_>) -> Result<()> {
        write!(
            self.out,
            "\rScore={:>3} Hint: {}",
            status.score.value(),
            format_hint_slots(status.hints)
        )
        .context("failed to write score line")?;
        self.out.flush().context("failed to flush score line")
    }

    fn finish(&mut self, _outcome: &SessionOutcome) -> Result<()> {
        writeln!(self.out, "\n").context("failed to end score line")
    }
}

/// Renders nothing; analysis runs report through the progress bar instead.
pub struct QuietView;

impl SessionView for QuietView {
    fn render(&mut self, _status: &SessionStatus<'_>) -> Result<()> {
        Ok(())
    }
}
