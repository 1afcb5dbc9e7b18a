// SPDX-License-Identifier: MIT
use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;

use crate::tui::app::PreviewMode;
use crate::tui::theme::Theme;

pub fn render(
    frame: &mut ratatui::Frame,
    area: Rect,
    source: &str,
    mode: PreviewMode,
    last_timestamp_ms: Option<i64>,
    theme: &Theme,
) {
    if area.height == 0 || area.width == 0 {
        return;
    }

    let version = env!("CARGO_PKG_VERSION");
    let mode_part = match mode {
        PreviewMode::Registration(id) => format!("REGISTER id {id}"),
        PreviewMode::Analysis => "ANALYZE".to_string(),
    };
    let time_part = last_timestamp_ms.map_or_else(String::new, |ms| {
        format!(" | t={}.{:03}s", ms / 1000, (ms % 1000).abs())
    });
    let text = format!("facereg v{version} | {mode_part} | {source}{time_part}");

    let line = Line::from(vec![Span::styled(
        format!("{text:<width$}", width = area.width as usize),
        theme.status_bar,
    )]);

    frame.render_widget(Paragraph::new(line), area);
}
