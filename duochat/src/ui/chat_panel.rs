//! Chat panel rendering (message list + input box).

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};

use super::theme;
use crate::app::{App, PanelFocus};

/// Render the chat panel (messages + input box).
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(area);

    render_messages(frame, chunks[0], app);
    render_input(frame, chunks[1], app);
}

/// Render the message list.
fn render_messages(frame: &mut Frame, area: Rect, app: &App) {
    let is_focused = app.focus == PanelFocus::Chat;

    let items: Vec<ListItem> = if app.active_peer.is_none() {
        vec![ListItem::new(Line::from(Span::styled(
            "Pick someone from the sidebar (Tab, then Enter)",
            theme::system_message(),
        )))]
    } else {
        app.messages
            .iter()
            .map(|msg| {
                let timestamp = msg.timestamp.as_deref().unwrap_or("     ");
                let line = Line::from(vec![
                    Span::styled(timestamp, theme::timestamp()),
                    Span::raw(" "),
                    Span::styled(&msg.sender, theme::normal().fg(theme::sender_color(&msg.sender))),
                    Span::raw(": "),
                    Span::styled(&msg.content, theme::normal()),
                    Span::raw(" "),
                    Span::styled(msg.status.symbol(), theme::message_status(msg.status)),
                ]);
                ListItem::new(line)
            })
            .collect()
    };

    let title = app
        .active_peer
        .as_ref()
        .map_or_else(|| "Chat".to_string(), |peer| format!("Chat with {peer}"));
    let block = Block::default()
        .title(title)
        .title_style(theme::panel_title(theme::CHAT_TITLE))
        .borders(Borders::ALL)
        .border_style(if is_focused {
            theme::highlighted()
        } else {
            theme::normal()
        });

    let selected = (!app.messages.is_empty()).then_some(app.message_scroll);
    let mut state = ListState::default().with_selected(selected);
    frame.render_stateful_widget(List::new(items).block(block), area, &mut state);
}

/// Render the input box.
fn render_input(frame: &mut Frame, area: Rect, app: &App) {
    let is_focused = app.focus == PanelFocus::Input;

    let mut display_text = app.input.clone();
    if is_focused {
        let index = display_text
            .char_indices()
            .nth(app.cursor_position)
            .map_or(display_text.len(), |(i, _)| i);
        display_text.insert(index, '\u{2588}');
    }

    let input_line = if app.input.is_empty() && !is_focused {
        Line::from(Span::styled("Type a message...", theme::dimmed()))
    } else {
        Line::from(Span::styled(display_text, theme::normal()))
    };

    let block = Block::default()
        .title("Input")
        .borders(Borders::ALL)
        .border_style(if is_focused {
            theme::highlighted()
        } else {
            theme::normal()
        });

    frame.render_widget(Paragraph::new(input_line).block(block), area);
}
