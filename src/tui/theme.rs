// SPDX-License-Identifier: MIT
use ratatui::style::{Color, Modifier, Style};

pub struct Theme {
    pub score_low: Style,
    pub score_medium: Style,
    pub score_high: Style,
    pub hint_active: Style,
    pub hint_inactive: Style,
    pub border: Style,
    pub title: Style,
    pub status_bar: Style,
}

impl Theme {
    #[must_use]
    pub fn score_style(&self, score: u8) -> Style {
        if score >= 100 {
            self.score_high
        } else if score >= 50 {
            self.score_medium
        } else {
            self.score_low
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            score_low: Style::default().fg(Color::Red),
            score_medium: Style::default().fg(Color::Yellow),
            score_high: Style::default().fg(Color::Green),
            hint_active: Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
            hint_inactive: Style::default().fg(Color::DarkGray),
            border: Style::default().fg(Color::White),
            title: Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
            status_bar: Style::default().fg(Color::Black).bg(Color::White),
        }
    }
}
