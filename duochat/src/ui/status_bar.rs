//! Status bar rendering.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::Paragraph,
};

use super::theme;
use crate::app::{App, PanelFocus, Screen};

/// Render the status bar at the bottom of the screen.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![Span::styled("DuoChat", theme::bold())];

    if app.screen == Screen::Main {
        if let Some(identity) = &app.identity {
            spans.push(Span::raw(" | "));
            spans.push(Span::styled(format!("Welcome, {identity}!"), theme::bold()));
        }

        let (dot_color, status_text) = theme::channel_indicator(app.connection, app.channel_failed);
        spans.push(Span::raw(" | "));
        spans.push(Span::styled("\u{25cf}", theme::normal().fg(dot_color)));
        spans.push(Span::raw(format!(" {status_text}")));
    }

    let help_text = match (app.screen, app.focus) {
        (Screen::Validating, _) => "Esc: quit",
        (Screen::Login, _) => "Enter: log in | Ctrl+R: register | Esc: quit",
        (Screen::Main, PanelFocus::Input) => {
            "Enter: send | /refresh | /logout | Tab: switch panel | Esc: quit"
        }
        (Screen::Main, PanelFocus::Sidebar) if app.filter_editing => {
            "Type to search | Enter: done | Esc: clear"
        }
        (Screen::Main, PanelFocus::Sidebar) => {
            "\u{2191}\u{2193}/jk: navigate | /: search | Enter: open | Esc: quit"
        }
        (Screen::Main, PanelFocus::Chat) => "\u{2191}\u{2193}/jk: scroll | Tab: switch panel | Esc: quit",
    };
    spans.push(Span::raw(" | "));
    match &app.notice {
        Some(notice) => spans.push(Span::styled(notice.clone(), theme::system_message())),
        None => spans.push(Span::styled(help_text, theme::dimmed())),
    }

    let paragraph = Paragraph::new(Line::from(spans)).style(theme::status_bar_bg());
    frame.render_widget(paragraph, area);
}
