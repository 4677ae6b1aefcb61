//! Login form and the token-validation splash.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use super::theme;
use crate::app::{App, LoginField, Screen};

/// Render the login screen, or the splash while a stored token is checked.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let area = centered(area, 50, 9);

    let block = Block::default()
        .title("DuoChat")
        .title_style(theme::panel_title(theme::HIGHLIGHT))
        .borders(Borders::ALL)
        .border_style(theme::highlighted());

    if app.screen == Screen::Validating {
        let paragraph = Paragraph::new(Line::from(Span::styled(
            "Validating token...",
            theme::system_message(),
        )))
        .block(block);
        frame.render_widget(paragraph, area);
        return;
    }

    let form = &app.login;
    let masked = "*".repeat(form.password.chars().count());
    let mut lines = vec![
        field_line("Username", &form.username, form.field == LoginField::Username),
        field_line("Password", &masked, form.field == LoginField::Password),
        Line::raw(""),
    ];

    if form.busy {
        lines.push(Line::from(Span::styled("Signing in...", theme::dimmed())));
    } else if let Some(error) = &form.error {
        lines.push(Line::from(Span::styled(
            error.clone(),
            theme::normal().fg(theme::ERROR),
        )));
    } else {
        lines.push(Line::raw(""));
    }
    lines.push(Line::from(Span::styled(
        "Enter: log in | Ctrl+R: register | Tab: next field",
        theme::dimmed(),
    )));

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn field_line<'a>(label: &'a str, value: &'a str, focused: bool) -> Line<'a> {
    let mut spans = vec![
        Span::styled(format!("{label:>9}: "), theme::bold()),
        Span::styled(value, theme::normal()),
    ];
    if focused {
        spans.push(Span::styled("\u{2588}", theme::input_cursor()));
    }
    Line::from(spans)
}

/// A `width` x `height` rectangle centred in `area`, clipped to fit.
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(height.min(area.height)),
            Constraint::Fill(1),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(width.min(area.width)),
            Constraint::Fill(1),
        ])
        .split(vertical[1])[1]
}
