// SPDX-License-Identifier: MIT
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::Backend;

use super::app::PreviewApp;
use super::input::{Action, handle_key};
use crate::display::SessionView;
use crate::session::{InterruptHandle, SessionOutcome, SessionStatus};

/// Terminal preview of a running session. The terminal must already be in raw mode.
pub struct PreviewView<'t, B: Backend> {
    terminal: &'t mut Terminal<B>,
    app: PreviewApp,
    interrupt: InterruptHandle,
}

impl<'t, B: Backend> PreviewView<'t, B> {
    pub fn new(terminal: &'t mut Terminal<B>, app: PreviewApp, interrupt: InterruptHandle) -> Self {
        Self {
            terminal,
            app,
            interrupt,
        }
    }

    fn draw(&mut self) -> Result<()> {
        self.terminal
            .draw(|f| self.app.render(f))
            .context("failed to draw frame")?;
        Ok(())
    }
}

impl<B: Backend> SessionView for PreviewView<'_, B> {
    fn render(&mut self, status: &SessionStatus<'_>) -> Result<()> {
        self.app.update(status);
        self.draw()
    }

    fn cancel_requested(&mut self) -> Result<bool> {
        let mut redraw = false;
        while event::poll(Duration::ZERO).context("failed to poll events")? {
            match event::read().context("failed to read event")? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    let action = handle_key(key);
                    self.app.handle_action(action);
                    if action == Action::Interrupt {
                        self.interrupt.trip();
                    }
                }
                Event::Resize(..) => redraw = true,
                _ => {}
            }
        }
        if redraw {
            self.draw()?;
        }
        Ok(self.app.should_quit)
    }

    fn finish(&mut self, _outcome: &SessionOutcome) -> Result<()> {
        self.draw()
    }
}
