// SPDX-License-Identifier: MIT
use std::io::{self, Write};

use tracing::{debug, warn};

const DEFAULT_CONSOLE_WIDTH: u16 = 80;
const PERCENT_FIELD_WIDTH: usize = 7;
const MIN_BAR_LENGTH: usize = 10;
const TOTAL_PERCENTAGE: f64 = 100.0;

/// Single-line progress bar redrawn in place with a carriage return.
pub struct ProgressBar<W: Write = io::Stdout> {
    total: u64,
    frequency_update: u64,
    label: String,
    fill: String,
    space: String,
    out: W,
    width: Option<u16>,
    overflow_reported: bool,
    last_rendered: Option<u64>,
}

impl ProgressBar<io::Stdout> {
    #[must_use]
    pub fn new(total: u64, label: &str) -> Self {
        Self::with_writer(total, label, io::stdout())
    }
}

impl<W: Write> ProgressBar<W> {
    #[must_use]
    pub fn with_writer(total: u64, label: &str, out: W) -> Self {
        Self {
            total,
            frequency_update: total,
            label: label.to_string(),
            fill: "=".to_string(),
            space: " ".to_string(),
            out,
            width: None,
            overflow_reported: false,
            last_rendered: None,
        }
    }

    /// Limits redraws to roughly `frequency` evenly spaced steps. Clamped to `total`.
    pub fn set_frequency_update(&mut self, frequency: u64) {
        self.frequency_update = frequency.clamp(1, self.total.max(1));
    }

    #[allow(dead_code)]
    pub fn set_style(&mut self, fill: &str, space: &str) {
        self.fill = fill.to_string();
        self.space = space.to_string();
    }

    /// Pins the console width instead of querying the terminal.
    #[allow(dead_code)]
    pub fn set_width(&mut self, columns: u16) {
        self.width = Some(columns);
    }

    pub fn update(&mut self, current: u64) {
        if self.total == 0 {
            return;
        }

        if current > self.total {
            if !self.overflow_reported {
                warn!(
                    label = %self.label,
                    current,
                    total = self.total,
                    "progress index went out of bounds"
                );
                self.overflow_reported = true;
            }
            self.clear_line();
            return;
        }

        let step = (self.total / self.frequency_update.max(1)).max(1);
        if current != self.total && current % step != 0 {
            return;
        }

        let line = self.render_line(current);
        if let Err(e) = self
            .out
            .write_all(line.as_bytes())
            .and_then(|()| self.out.flush())
        {
            debug!("failed to draw progress bar: {e}");
            return;
        }
        self.last_rendered = Some(current);
    }

    /// Terminates the progress line if anything was drawn.
    pub fn finish(&mut self) {
        if self.last_rendered.take().is_some() {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
        }
    }

    fn console_width(&self) -> u16 {
        self.width.unwrap_or_else(|| match crossterm::terminal::size() {
            Ok((columns, _)) if columns > 0 => columns,
            _ => DEFAULT_CONSOLE_WIDTH,
        })
    }

    fn bar_length(&self) -> usize {
        let width = usize::from(self.console_width());
        let used = self.label.chars().count() + PERCENT_FIELD_WIDTH;
        (width.saturating_sub(used) / 2).max(MIN_BAR_LENGTH)
    }

    fn render_line(&self, current: u64) -> String {
        let bar_length = self.bar_length();

        #[allow(clippy::cast_precision_loss)]
        let percent = current.min(self.total) as f64 * TOTAL_PERCENTAGE / self.total as f64;
        #[allow(clippy::cast_precision_loss)]
        let percent_per_unit = TOTAL_PERCENTAGE / bar_length as f64;

        let mut bar = String::with_capacity(bar_length * self.fill.len());
        for unit in 0..bar_length {
            #[allow(clippy::cast_precision_loss)]
            let unit_start = unit as f64 * percent_per_unit;
            bar.push_str(if unit_start < percent {
                &self.fill
            } else {
                &self.space
            });
        }

        format!(
            " {} [{bar}]{percent:>width$.1}%\r",
            self.label,
            width = PERCENT_FIELD_WIDTH + 1
        )
    }

    fn clear_line(&mut self) {
        let blank = " ".repeat(usize::from(self.console_width()));
        let _ = write!(self.out, "{blank}\r");
        let _ = self.out.flush();
    }
}

#[cfg(test)]
impl ProgressBar<Vec<u8>> {
    pub(crate) fn out_bytes(&self) -> &[u8] {
        &self.out
    }
}
