//! Sidebar rendering for the peer list.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState},
};

use super::theme;
use crate::app::{App, PanelFocus, PeerSection};

/// Render the sidebar: contacts, then all other users.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let is_focused = app.focus == PanelFocus::Sidebar;
    let peers = app.peer_items();

    let mut items: Vec<ListItem> = Vec::with_capacity(peers.len() + 2);
    let mut selected_row = None;
    let mut section = None;

    for (idx, item) in peers.iter().enumerate() {
        if section != Some(item.section) {
            section = Some(item.section);
            let title = match item.section {
                PeerSection::Contacts => "Contacts",
                PeerSection::AllUsers => "All users",
            };
            items.push(ListItem::new(Line::from(Span::styled(
                title,
                theme::panel_title(theme::SIDEBAR_TITLE),
            ))));
        }

        let is_active = app.active_peer.as_ref() == Some(&item.peer);
        let mut spans = vec![
            Span::raw(if is_active { "> " } else { "  " }),
            Span::styled(item.peer.to_string(), theme::normal()),
        ];
        if item.unread > 0 {
            spans.push(Span::raw(" "));
            spans.push(Span::styled(
                format!("({})", item.unread),
                theme::unread_badge(),
            ));
        }

        let is_selected = idx == app.selected_peer;
        if is_selected {
            selected_row = Some(items.len());
        }
        let style = if is_selected && is_focused {
            theme::selected()
        } else if is_selected {
            theme::highlighted()
        } else {
            theme::normal()
        };
        items.push(ListItem::new(Line::from(spans)).style(style));
    }

    if peers.is_empty() {
        let hint = if app.peer_filter.is_empty() {
            "No users yet (/refresh)"
        } else {
            "No matches"
        };
        items.push(ListItem::new(Line::from(Span::styled(hint, theme::dimmed()))));
    }

    let block = Block::default()
        .title(title(app))
        .borders(Borders::ALL)
        .border_style(if is_focused {
            theme::highlighted()
        } else {
            theme::normal()
        });

    let mut state = ListState::default().with_selected(selected_row);
    frame.render_stateful_widget(List::new(items).block(block), area, &mut state);
}

/// `Peers`, plus the search query while one is set or being typed.
fn title(app: &App) -> Line<'static> {
    if app.peer_filter.is_empty() && !app.filter_editing {
        return Line::from("Peers");
    }
    let mut spans = vec![
        Span::raw("Peers "),
        Span::styled(format!("/{}", app.peer_filter), theme::highlighted()),
    ];
    if app.filter_editing {
        spans.push(Span::styled("_", theme::input_cursor()));
    }
    Line::from(spans)
}
