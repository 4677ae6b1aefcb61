//! Terminal UI rendering.

pub mod chat_panel;
pub mod login;
pub mod sidebar;
pub mod status_bar;
pub mod theme;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
};

use crate::app::{App, Screen};

/// Main draw function for the entire UI.
pub fn draw(frame: &mut Frame, app: &App) {
    // Status bar at the bottom of every screen
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    let content_area = main_chunks[0];
    let status_area = main_chunks[1];

    match app.screen {
        Screen::Validating | Screen::Login => login::render(frame, content_area, app),
        Screen::Main => {
            let content_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([
                    Constraint::Percentage(25), // Peers
                    Constraint::Percentage(75), // Chat
                ])
                .split(content_area);

            sidebar::render(frame, content_chunks[0], app);
            chat_panel::render(frame, content_chunks[1], app);
        }
    }

    status_bar::render(frame, status_area, app);
}
