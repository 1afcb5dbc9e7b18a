// SPDX-License-Identifier: MIT
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

use crate::scorer::OrientationHint;
use crate::session::SessionScore;
use crate::tui::theme::Theme;

const HINT_LABELS: [&str; 5] = ["up", "down", "left", "right", "center"];

pub fn render_gauge(frame: &mut ratatui::Frame, area: Rect, score: SessionScore, theme: &Theme) {
    if area.height < 3 || area.width < 10 {
        return;
    }

    let block = Block::default()
        .title(" Score ")
        .borders(Borders::ALL)
        .border_style(theme.border)
        .title_style(theme.title);

    let gauge = Gauge::default()
        .block(block)
        .percent(u16::from(score.value()))
        .label(format!("{score:>3} / 100"))
        .gauge_style(theme.score_style(score.value()));

    frame.render_widget(gauge, area);
}

pub fn render_hints(
    frame: &mut ratatui::Frame,
    area: Rect,
    hints: &[OrientationHint],
    theme: &Theme,
) {
    if area.height < 3 || area.width < 10 {
        return;
    }

    let block = Block::default()
        .title(" Orientation ")
        .borders(Borders::ALL)
        .border_style(theme.border)
        .title_style(theme.title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let mut active = [false; HINT_LABELS.len()];
    for hint in hints {
        active[hint.slot()] = true;
    }

    let cells = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 5); 5])
        .split(inner);

    for (i, cell) in cells.iter().enumerate() {
        let style = if active[i] {
            theme.hint_active
        } else {
            theme.hint_inactive
        };
        let line = Line::from(Span::styled(format!(" {} ", HINT_LABELS[i]), style));
        frame.render_widget(Paragraph::new(line).centered(), *cell);
    }
}
