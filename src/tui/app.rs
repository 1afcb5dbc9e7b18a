// SPDX-License-Identifier: MIT
use num_format::{Locale, ToFormattedString};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use super::input::Action;
use super::panels::{header, score};
use super::theme::Theme;
use crate::scorer::{FaceId, OrientationHint};
use crate::session::{SessionScore, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewMode {
    Registration(FaceId),
    Analysis,
}

pub struct PreviewApp {
    pub source: String,
    pub mode: PreviewMode,
    pub score: SessionScore,
    pub hints: Vec<OrientationHint>,
    pub frames_scored: u64,
    pub frames_with_detection: u64,
    pub last_timestamp_ms: Option<i64>,
    pub should_quit: bool,
    pub theme: Theme,
}

impl PreviewApp {
    #[must_use]
    pub fn new(source: impl Into<String>, mode: PreviewMode) -> Self {
        Self {
            source: source.into(),
            mode,
            score: SessionScore::ZERO,
            hints: Vec::new(),
            frames_scored: 0,
            frames_with_detection: 0,
            last_timestamp_ms: None,
            should_quit: false,
            theme: Theme::default(),
        }
    }

    pub fn update(&mut self, status: &SessionStatus<'_>) {
        self.score = status.score;
        self.hints.clear();
        self.hints.extend_from_slice(status.hints);
        self.frames_scored = status.frames_scored;
        self.frames_with_detection = status.frames_with_detection;
        self.last_timestamp_ms = status.last_timestamp_ms;
    }

    pub fn handle_action(&mut self, action: Action) {
        match action {
            Action::Cancel => self.should_quit = true,
            // The view trips the session latch.
            Action::Interrupt | Action::None => {}
        }
    }

    pub fn render(&self, frame: &mut ratatui::Frame) {
        let outer = frame.area();
        if outer.height < 2 || outer.width < 5 {
            return;
        }

        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(3),
                Constraint::Length(1),
            ])
            .split(outer);

        header::render(
            frame,
            vertical[0],
            &self.source,
            self.mode,
            self.last_timestamp_ms,
            &self.theme,
        );
        score::render_gauge(frame, vertical[1], self.score, &self.theme);
        score::render_hints(frame, vertical[2], &self.hints, &self.theme);
        self.render_counters(frame, vertical[3]);

        let help = Line::from(vec![
            Span::styled("[q/Esc]", self.theme.title),
            Span::raw(" Cancel  "),
            Span::styled("[Ctrl-C]", self.theme.title),
            Span::raw(" Interrupt"),
        ]);
        frame.render_widget(Paragraph::new(help), vertical[4]);
    }

    fn render_counters(&self, frame: &mut ratatui::Frame, area: ratatui::layout::Rect) {
        let block = Block::default()
            .title(" Frames ")
            .borders(Borders::ALL)
            .border_style(self.theme.border)
            .title_style(self.theme.title);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        if inner.width < 2 || inner.height < 1 {
            return;
        }

        let lines = vec![
            Line::from(format!(
                "Scored:          {}",
                self.frames_scored.to_formatted_string(&Locale::en)
            )),
            Line::from(format!(
                "With a face:     {}",
                self.frames_with_detection.to_formatted_string(&Locale::en)
            )),
        ];
        frame.render_widget(Paragraph::new(lines), inner);
    }
}

#[cfg(test)]
mod tests {
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    use super::*;

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(ratatui::buffer::Cell::symbol)
            .collect()
    }

    #[test]
    fn renders_score_hints_and_counters() {
        let mut app = PreviewApp::new("clip.mp4", PreviewMode::Registration(12));
        let hints = [OrientationHint::Up, OrientationHint::Center];
        app.update(&SessionStatus {
            score: SessionScore::from_reported(64),
            hints: &hints,
            frames_scored: 1_234,
            frames_with_detection: 17,
            last_timestamp_ms: Some(2_500),
        });

        let mut terminal = Terminal::new(TestBackend::new(80, 16)).unwrap();
        terminal.draw(|f| app.render(f)).unwrap();
        let text = screen_text(&terminal);

        assert!(text.contains("REGISTER id 12"));
        assert!(text.contains("clip.mp4"));
        assert!(text.contains("t=2.500s"));
        assert!(text.contains("64 / 100"));
        assert!(text.contains("center"));
        assert!(text.contains("1,234"));
        assert!(text.contains("[q/Esc]"));
    }

    #[test]
    fn tiny_terminal_does_not_panic() {
        let app = PreviewApp::new("camera #0", PreviewMode::Analysis);
        let mut terminal = Terminal::new(TestBackend::new(4, 1)).unwrap();
        terminal.draw(|f| app.render(f)).unwrap();
    }

    #[test]
    fn actions_update_flags() {
        let mut app = PreviewApp::new("camera #0", PreviewMode::Analysis);
        app.handle_action(Action::None);
        app.handle_action(Action::Interrupt);
        assert!(!app.should_quit);
        app.handle_action(Action::Cancel);
        assert!(app.should_quit);
    }
}
