//! Colors and styles shared by the views.

use ratatui::style::{Color, Modifier, Style};

use crate::app::MessageStatus;
use crate::connection::ConnectionState;

pub const FG_PRIMARY: Color = Color::White;
pub const FG_SECONDARY: Color = Color::Gray;
pub const HIGHLIGHT: Color = Color::Cyan;
pub const ERROR: Color = Color::Red;

/// Name color for the local user.
pub const SELF_NAME: Color = Color::LightBlue;
/// Name color for the peer.
pub const PEER_NAME: Color = Color::LightMagenta;

pub const CHAT_TITLE: Color = Color::Cyan;
pub const SIDEBAR_TITLE: Color = Color::Blue;

#[must_use]
pub fn normal() -> Style {
    Style::default().fg(FG_PRIMARY)
}

#[must_use]
pub fn dimmed() -> Style {
    Style::default().fg(FG_SECONDARY)
}

#[must_use]
pub fn bold() -> Style {
    normal().add_modifier(Modifier::BOLD)
}

/// Border of the focused panel.
#[must_use]
pub fn highlighted() -> Style {
    Style::default().fg(HIGHLIGHT).add_modifier(Modifier::BOLD)
}

/// Sidebar row under the cursor.
#[must_use]
pub fn selected() -> Style {
    Style::default()
        .fg(Color::Black)
        .bg(HIGHLIGHT)
        .add_modifier(Modifier::BOLD)
}

/// `"You"` and the peer get fixed, distinct colors.
#[must_use]
pub fn sender_color(name: &str) -> Color {
    if name == "You" { SELF_NAME } else { PEER_NAME }
}

/// Notices and placeholder text.
#[must_use]
pub fn system_message() -> Style {
    Style::default()
        .fg(Color::Rgb(100, 140, 180))
        .add_modifier(Modifier::ITALIC)
}

#[must_use]
pub fn timestamp() -> Style {
    Style::default().fg(Color::DarkGray)
}

#[must_use]
pub fn input_cursor() -> Style {
    bold()
}

#[must_use]
pub fn status_bar_bg() -> Style {
    Style::default().fg(FG_PRIMARY).bg(Color::Rgb(30, 30, 50))
}

#[must_use]
pub fn panel_title(color: Color) -> Style {
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

#[must_use]
pub fn unread_badge() -> Style {
    Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD)
}

/// Delivery marker after a message: pending stays dim until the server
/// echo confirms it.
#[must_use]
pub fn message_status(status: MessageStatus) -> Style {
    match status {
        MessageStatus::Pending => dimmed(),
        MessageStatus::Confirmed => Style::default().fg(Color::Green),
        MessageStatus::Received | MessageStatus::History => timestamp(),
    }
}

/// Dot color and label for the channel indicator. `failed` means
/// reconnection was abandoned.
#[must_use]
pub const fn channel_indicator(state: ConnectionState, failed: bool) -> (Color, &'static str) {
    if failed {
        return (ERROR, "Offline");
    }
    match state {
        ConnectionState::Connected => (Color::Green, "Connected"),
        ConnectionState::Connecting => (Color::Yellow, "Connecting..."),
        ConnectionState::Disconnected => (Color::DarkGray, "Disconnected"),
    }
}
