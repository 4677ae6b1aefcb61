//! Application state and event handling.
//!
//! [`App`] is the view model: it is updated from [`SessionEvent`]s and
//! turns key presses into [`SessionCommand`]s. It never talks to the
//! network itself.

use std::collections::BTreeMap;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use duochat_proto::identity::Identity;

use crate::connection::ConnectionState;
use crate::conversation::{Message, Origin};
use crate::directory::PeerSet;
use crate::session::{SessionCommand, SessionEvent};

/// Which top-level screen is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// A stored token is being checked.
    Validating,
    /// Credentials are needed.
    Login,
    /// Logged in: sidebar, chat and input.
    Main,
}

/// Which panel is currently focused on the main screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelFocus {
    /// Input box is focused (default).
    Input,
    /// Peer list is focused.
    Sidebar,
    /// Chat message list is focused.
    Chat,
}

/// Field of the login form that receives keystrokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    /// Account name.
    Username,
    /// Password, rendered masked.
    Password,
}

/// Login form state.
#[derive(Debug, Clone)]
pub struct LoginForm {
    /// Entered account name.
    pub username: String,
    /// Entered password.
    pub password: String,
    /// Field being edited.
    pub field: LoginField,
    /// Last authentication failure.
    pub error: Option<String>,
    /// A request is in flight.
    pub busy: bool,
}

impl LoginForm {
    const fn new() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            field: LoginField::Username,
            error: None,
            busy: false,
        }
    }

    fn focused_mut(&mut self) -> &mut String {
        match self.field {
            LoginField::Username => &mut self.username,
            LoginField::Password => &mut self.password,
        }
    }

    fn credentials(&self) -> Option<(String, String)> {
        let username = self.username.trim();
        if username.is_empty() || self.password.is_empty() {
            return None;
        }
        Some((username.to_string(), self.password.clone()))
    }
}

/// Message delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Sent by us, not yet echoed by the server.
    Pending,
    /// Sent by us and echoed back.
    Confirmed,
    /// Received live.
    Received,
    /// Loaded from history.
    History,
}

impl MessageStatus {
    /// Get the display symbol for this status.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Pending => "\u{22ef}",
            Self::Confirmed => "\u{2713}",
            Self::Received | Self::History => "",
        }
    }
}

impl From<Origin> for MessageStatus {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::LocalPending => Self::Pending,
            Origin::LocalConfirmed => Self::Confirmed,
            Origin::Remote => Self::Received,
            Origin::History => Self::History,
        }
    }
}

/// A message for display in the chat panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    /// Sender's display name ("You" for our own messages).
    pub sender: String,
    /// Message content.
    pub content: String,
    /// Arrival time, formatted. History carries none.
    pub timestamp: Option<String>,
    /// Delivery status.
    pub status: MessageStatus,
}

/// Section of the sidebar a peer is listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSection {
    /// Existing contacts.
    Contacts,
    /// Everyone else on the server.
    AllUsers,
}

/// One selectable row of the sidebar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerItem {
    /// The peer.
    pub peer: Identity,
    /// Where it is listed.
    pub section: PeerSection,
    /// Buffered messages not yet seen.
    pub unread: usize,
}

/// Main application state.
pub struct App {
    /// Current screen.
    pub screen: Screen,
    /// Login form contents.
    pub login: LoginForm,
    /// Logged-in identity.
    pub identity: Option<Identity>,
    /// Contacts as of the last directory refresh.
    pub contacts: PeerSet,
    /// All other users as of the last directory refresh.
    pub all_users: PeerSet,
    /// Unread counts for non-active peers.
    pub unread: BTreeMap<Identity, usize>,
    /// Selected sidebar row.
    pub selected_peer: usize,
    /// Case-insensitive substring the sidebar is narrowed to.
    pub peer_filter: String,
    /// Keystrokes in the sidebar edit `peer_filter`.
    pub filter_editing: bool,
    /// Peer whose conversation is shown.
    pub active_peer: Option<Identity>,
    /// Messages in the active conversation.
    pub messages: Vec<DisplayMessage>,
    /// Current text input.
    pub input: String,
    /// Cursor position in input (character index).
    pub cursor_position: usize,
    /// Which panel is focused.
    pub focus: PanelFocus,
    /// Scroll offset for message list.
    pub message_scroll: usize,
    /// Real-time channel state.
    pub connection: ConnectionState,
    /// Reconnection was abandoned.
    pub channel_failed: bool,
    /// Latest status-bar notice.
    pub notice: Option<String>,
    /// Whether the app should quit.
    pub should_quit: bool,
    timestamp_format: String,
}

impl App {
    /// Create an app on the validating screen.
    #[must_use]
    pub fn new() -> Self {
        Self {
            screen: Screen::Validating,
            login: LoginForm::new(),
            identity: None,
            contacts: PeerSet::new(),
            all_users: PeerSet::new(),
            unread: BTreeMap::new(),
            selected_peer: 0,
            peer_filter: String::new(),
            filter_editing: false,
            active_peer: None,
            messages: Vec::new(),
            input: String::new(),
            cursor_position: 0,
            focus: PanelFocus::Input,
            message_scroll: 0,
            connection: ConnectionState::Disconnected,
            channel_failed: false,
            notice: None,
            should_quit: false,
            timestamp_format: "%H:%M".to_string(),
        }
    }

    /// Set the chrono format used for arrival timestamps.
    #[must_use]
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Whether the real-time channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Rows of the sidebar: contacts first, then all users, narrowed to
    /// names containing `peer_filter`.
    #[must_use]
    pub fn peer_items(&self) -> Vec<PeerItem> {
        let unread = |peer: &Identity| self.unread.get(peer).copied().unwrap_or(0);
        let needle = self.peer_filter.to_lowercase();
        self.contacts
            .iter()
            .map(|peer| (peer, PeerSection::Contacts))
            .chain(self.all_users.iter().map(|peer| (peer, PeerSection::AllUsers)))
            .filter(|(peer, _)| peer.as_str().to_lowercase().contains(&needle))
            .map(|(peer, section)| PeerItem {
                peer: peer.clone(),
                section,
                unread: unread(peer),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Session events
    // -----------------------------------------------------------------------

    /// Apply one event from the session task.
    pub fn apply_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Validating => self.screen = Screen::Validating,
            SessionEvent::LoginRequired => {
                self.screen = Screen::Login;
                self.login.busy = false;
            }
            SessionEvent::LoggedIn { identity } => {
                tracing::debug!(identity = %identity, "view entering main screen");
                self.reset_session_view();
                self.identity = Some(identity);
                self.login = LoginForm::new();
                self.screen = Screen::Main;
            }
            SessionEvent::AuthFailed(err) => {
                self.login.busy = false;
                self.login.error = Some(err.to_string());
                self.login.password.clear();
                if self.login.field == LoginField::Password {
                    self.login.field = LoginField::Username;
                }
            }
            SessionEvent::DirectoryUpdated {
                contacts,
                all_users,
            } => {
                self.contacts = contacts;
                self.all_users = all_users;
                let rows = self.peer_items().len();
                self.selected_peer = self.selected_peer.min(rows.saturating_sub(1));
            }
            SessionEvent::ConversationSeeded {
                peer,
                messages,
                from_history,
            } => {
                self.unread.remove(&peer);
                self.messages = messages.iter().map(|m| self.display(m)).collect();
                self.message_scroll = self.messages.len().saturating_sub(1);
                if !from_history {
                    self.notice = Some(format!("History with {peer} unavailable"));
                }
                self.active_peer = Some(peer);
            }
            SessionEvent::MessageAppended { peer, message } => {
                if self.active_peer.as_ref() == Some(&peer) {
                    let display = self.display(&message);
                    self.messages.push(display);
                    self.message_scroll = self.messages.len().saturating_sub(1);
                }
            }
            SessionEvent::MessageConfirmed { peer, index } => {
                if self.active_peer.as_ref() == Some(&peer)
                    && let Some(message) = self.messages.get_mut(index)
                {
                    message.status = MessageStatus::Confirmed;
                }
            }
            SessionEvent::UnreadChanged { peer, unread } => {
                if unread == 0 {
                    self.unread.remove(&peer);
                } else {
                    self.unread.insert(peer, unread);
                }
            }
            SessionEvent::ConnectionChanged(state) => {
                self.connection = state;
                if state == ConnectionState::Connected {
                    self.channel_failed = false;
                }
            }
            SessionEvent::ChannelFailed(err) => {
                self.channel_failed = true;
                self.notice = Some(err.to_string());
            }
            SessionEvent::Notice(text) => self.notice = Some(text),
            SessionEvent::LoggedOut => {
                self.reset_session_view();
                self.identity = None;
                self.screen = Screen::Login;
            }
        }
    }

    fn reset_session_view(&mut self) {
        self.contacts = PeerSet::new();
        self.all_users = PeerSet::new();
        self.unread.clear();
        self.selected_peer = 0;
        self.peer_filter.clear();
        self.filter_editing = false;
        self.active_peer = None;
        self.messages.clear();
        self.input.clear();
        self.cursor_position = 0;
        self.focus = PanelFocus::Input;
        self.message_scroll = 0;
        self.connection = ConnectionState::Disconnected;
        self.channel_failed = false;
        self.notice = None;
    }

    fn display(&self, message: &Message) -> DisplayMessage {
        let sender = if self.identity.as_ref() == Some(&message.sender_id) {
            "You".to_string()
        } else {
            message.sender_id.to_string()
        };
        let timestamp = (message.origin != Origin::History)
            .then(|| chrono::Local::now().format(&self.timestamp_format).to_string());
        DisplayMessage {
            sender,
            content: message.content.clone(),
            timestamp,
            status: message.origin.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Key handling
    // -----------------------------------------------------------------------

    /// Handle a key event. Returns a command when the key asks the session
    /// to do something.
    pub fn handle_key_event(&mut self, key: KeyEvent) -> Option<SessionCommand> {
        if self.filter_editing && key.code == KeyCode::Esc {
            self.filter_editing = false;
            self.set_peer_filter(String::new());
            return None;
        }
        if matches!(
            (key.code, key.modifiers),
            (KeyCode::Char('c'), KeyModifiers::CONTROL) | (KeyCode::Esc, _)
        ) {
            self.should_quit = true;
            return None;
        }

        match self.screen {
            Screen::Validating => None,
            Screen::Login => self.handle_login_key(key),
            Screen::Main => self.handle_main_key(key),
        }
    }

    fn handle_login_key(&mut self, key: KeyEvent) -> Option<SessionCommand> {
        if self.login.busy {
            return None;
        }
        match (key.code, key.modifiers) {
            (KeyCode::Char('r'), KeyModifiers::CONTROL) => {
                let (username, password) = self.login.credentials()?;
                self.login.busy = true;
                self.login.error = None;
                Some(SessionCommand::Register { username, password })
            }
            (KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down, _) => {
                self.login.field = match self.login.field {
                    LoginField::Username => LoginField::Password,
                    LoginField::Password => LoginField::Username,
                };
                None
            }
            (KeyCode::Enter, _) => {
                if self.login.field == LoginField::Username {
                    self.login.field = LoginField::Password;
                    return None;
                }
                let (username, password) = self.login.credentials()?;
                self.login.busy = true;
                self.login.error = None;
                Some(SessionCommand::Login { username, password })
            }
            (KeyCode::Backspace, _) => {
                self.login.focused_mut().pop();
                None
            }
            (KeyCode::Char(c), _) => {
                self.login.focused_mut().push(c);
                None
            }
            _ => None,
        }
    }

    fn handle_main_key(&mut self, key: KeyEvent) -> Option<SessionCommand> {
        match (key.code, key.modifiers) {
            (KeyCode::Tab, KeyModifiers::SHIFT) | (KeyCode::BackTab, _) => {
                self.cycle_focus_backward();
                return None;
            }
            (KeyCode::Tab, _) => {
                self.cycle_focus_forward();
                return None;
            }
            _ => {}
        }

        match self.focus {
            PanelFocus::Input => self.handle_input_key(key),
            PanelFocus::Sidebar => self.handle_sidebar_key(key),
            PanelFocus::Chat => {
                self.handle_chat_key(key);
                None
            }
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) -> Option<SessionCommand> {
        match key.code {
            KeyCode::Enter => return self.submit_input(),
            KeyCode::Char(c) => self.enter_char(c),
            KeyCode::Backspace => self.delete_char(),
            KeyCode::Left => self.move_cursor_left(),
            KeyCode::Right => self.move_cursor_right(),
            KeyCode::Home => self.cursor_position = 0,
            KeyCode::End => self.cursor_position = self.input.chars().count(),
            _ => {}
        }
        None
    }

    fn handle_sidebar_key(&mut self, key: KeyEvent) -> Option<SessionCommand> {
        if self.filter_editing {
            return self.handle_filter_key(key);
        }
        match key.code {
            KeyCode::Char('/') => {
                self.filter_editing = true;
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_peer = self.selected_peer.saturating_sub(1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let rows = self.peer_items().len();
                if self.selected_peer + 1 < rows {
                    self.selected_peer += 1;
                }
                None
            }
            KeyCode::Enter => {
                let item = self.peer_items().into_iter().nth(self.selected_peer)?;
                self.focus = PanelFocus::Input;
                Some(SessionCommand::SelectPeer(item.peer))
            }
            _ => None,
        }
    }

    fn handle_filter_key(&mut self, key: KeyEvent) -> Option<SessionCommand> {
        match key.code {
            KeyCode::Enter => self.filter_editing = false,
            KeyCode::Backspace => {
                let mut query = std::mem::take(&mut self.peer_filter);
                query.pop();
                self.set_peer_filter(query);
            }
            KeyCode::Char(c) => {
                let mut query = std::mem::take(&mut self.peer_filter);
                query.push(c);
                self.set_peer_filter(query);
            }
            _ => {}
        }
        None
    }

    fn set_peer_filter(&mut self, query: String) {
        self.peer_filter = query;
        self.selected_peer = 0;
    }

    const fn handle_chat_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.scroll_up(),
            KeyCode::Down | KeyCode::Char('j') => self.scroll_down(),
            _ => {}
        }
    }

    /// Cycle focus forward: Input -> Sidebar -> Chat -> Input.
    const fn cycle_focus_forward(&mut self) {
        self.focus = match self.focus {
            PanelFocus::Input => PanelFocus::Sidebar,
            PanelFocus::Sidebar => PanelFocus::Chat,
            PanelFocus::Chat => PanelFocus::Input,
        };
    }

    const fn cycle_focus_backward(&mut self) {
        self.focus = match self.focus {
            PanelFocus::Input => PanelFocus::Chat,
            PanelFocus::Chat => PanelFocus::Sidebar,
            PanelFocus::Sidebar => PanelFocus::Input,
        };
    }

    /// Turns the input line into a command. `/logout` and `/refresh` are
    /// handled here; anything else is sent to the active peer.
    fn submit_input(&mut self) -> Option<SessionCommand> {
        if self.input.trim().is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.input);
        self.cursor_position = 0;

        match text.trim() {
            "/logout" => return Some(SessionCommand::Logout),
            "/refresh" => return Some(SessionCommand::RefreshDirectory),
            _ => {}
        }
        if self.active_peer.is_none() {
            self.notice = Some("Select a contact first".to_string());
            return None;
        }
        Some(SessionCommand::Send { content: text })
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn enter_char(&mut self, c: char) {
        let index = self.byte_index();
        self.input.insert(index, c);
        self.cursor_position += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let index = self.byte_index();
            self.input.remove(index);
        }
    }

    const fn move_cursor_left(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
        }
    }

    fn move_cursor_right(&mut self) {
        if self.cursor_position < self.input.chars().count() {
            self.cursor_position += 1;
        }
    }

    const fn scroll_up(&mut self) {
        if self.message_scroll > 0 {
            self.message_scroll -= 1;
        }
    }

    const fn scroll_down(&mut self) {
        if self.message_scroll < self.messages.len().saturating_sub(1) {
            self.message_scroll += 1;
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AuthError;
    use crate::connection::ChannelError;
    use duochat_proto::frame::ChatFrame;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_str(app: &mut App, text: &str) -> Option<SessionCommand> {
        let mut last = None;
        for c in text.chars() {
            last = app.handle_key_event(key(KeyCode::Char(c)));
        }
        last
    }

    fn id(s: &str) -> Identity {
        Identity::new(s)
    }

    fn logged_in() -> App {
        let mut app = App::new();
        app.apply_event(SessionEvent::LoggedIn { identity: id("alice") });
        app.apply_event(SessionEvent::DirectoryUpdated {
            contacts: [id("bob")].into_iter().collect(),
            all_users: [id("bob"), id("carol")].into_iter().collect(),
        });
        app
    }

    #[test]
    fn starts_validating_and_moves_to_login() {
        let mut app = App::new();
        assert_eq!(app.screen, Screen::Validating);
        assert!(app.handle_key_event(key(KeyCode::Char('x'))).is_none());
        app.apply_event(SessionEvent::LoginRequired);
        assert_eq!(app.screen, Screen::Login);
    }

    #[test]
    fn login_form_submits_credentials() {
        let mut app = App::new();
        app.apply_event(SessionEvent::LoginRequired);
        type_str(&mut app, "alice");
        assert!(app.handle_key_event(key(KeyCode::Enter)).is_none());
        assert_eq!(app.login.field, LoginField::Password);
        type_str(&mut app, "pw");

        let Some(SessionCommand::Login { username, password }) =
            app.handle_key_event(key(KeyCode::Enter))
        else {
            panic!("expected a login command");
        };
        assert_eq!((username.as_str(), password.as_str()), ("alice", "pw"));
        assert!(app.login.busy);
    }

    #[test]
    fn incomplete_login_form_sends_nothing() {
        let mut app = App::new();
        app.apply_event(SessionEvent::LoginRequired);
        app.login.field = LoginField::Password;
        type_str(&mut app, "pw");
        assert!(app.handle_key_event(key(KeyCode::Enter)).is_none());
        assert!(!app.login.busy);
    }

    #[test]
    fn ctrl_r_registers() {
        let mut app = App::new();
        app.apply_event(SessionEvent::LoginRequired);
        app.login.username = "dave".into();
        app.login.password = "pw".into();
        let cmd = app.handle_key_event(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::CONTROL));
        assert!(matches!(cmd, Some(SessionCommand::Register { .. })));
    }

    #[test]
    fn auth_failure_shows_error_and_stays_on_login() {
        let mut app = App::new();
        app.apply_event(SessionEvent::LoginRequired);
        app.login.username = "alice".into();
        app.login.password = "bad".into();
        app.login.busy = true;
        app.apply_event(SessionEvent::AuthFailed(AuthError::InvalidCredentials));

        assert_eq!(app.screen, Screen::Login);
        assert!(!app.login.busy);
        assert!(app.login.password.is_empty());
        assert!(app.login.error.is_some());
    }

    #[test]
    fn logged_in_lists_contacts_then_all_users() {
        let app = logged_in();
        assert_eq!(app.screen, Screen::Main);
        let items = app.peer_items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].section, PeerSection::Contacts);
        assert_eq!(items[0].peer, id("bob"));
        assert_eq!(items[2].peer, id("carol"));
    }

    #[test]
    fn sidebar_enter_selects_peer() {
        let mut app = logged_in();
        app.handle_key_event(key(KeyCode::Tab));
        assert_eq!(app.focus, PanelFocus::Sidebar);
        app.handle_key_event(key(KeyCode::Down));
        app.handle_key_event(key(KeyCode::Down));
        app.handle_key_event(key(KeyCode::Down));
        assert_eq!(app.selected_peer, 2);

        let cmd = app.handle_key_event(key(KeyCode::Enter));
        assert!(matches!(cmd, Some(SessionCommand::SelectPeer(p)) if p == id("carol")));
        assert_eq!(app.focus, PanelFocus::Input);
    }

    #[test]
    fn input_needs_active_peer() {
        let mut app = logged_in();
        type_str(&mut app, "hi");
        assert!(app.handle_key_event(key(KeyCode::Enter)).is_none());
        assert!(app.notice.is_some());
    }

    #[test]
    fn input_sends_and_clears() {
        let mut app = logged_in();
        app.apply_event(SessionEvent::ConversationSeeded {
            peer: id("bob"),
            messages: Vec::new(),
            from_history: true,
        });
        type_str(&mut app, "hello");
        let cmd = app.handle_key_event(key(KeyCode::Enter));
        assert!(matches!(cmd, Some(SessionCommand::Send { content }) if content == "hello"));
        assert!(app.input.is_empty());
        assert_eq!(app.cursor_position, 0);
    }

    #[test]
    fn input_is_sent_as_typed() {
        let mut app = logged_in();
        app.apply_event(SessionEvent::ConversationSeeded {
            peer: id("bob"),
            messages: Vec::new(),
            from_history: true,
        });
        type_str(&mut app, "  indented ");
        let cmd = app.handle_key_event(key(KeyCode::Enter));
        assert!(matches!(cmd, Some(SessionCommand::Send { content }) if content == "  indented "));

        type_str(&mut app, " /refresh ");
        assert!(matches!(
            app.handle_key_event(key(KeyCode::Enter)),
            Some(SessionCommand::RefreshDirectory)
        ));
    }

    #[test]
    fn sidebar_search_narrows_both_sections() {
        let mut app = logged_in();
        app.apply_event(SessionEvent::DirectoryUpdated {
            contacts: [id("bob"), id("Carla")].into_iter().collect(),
            all_users: [id("bob"), id("Carla"), id("dave"), id("oscar")]
                .into_iter()
                .collect(),
        });
        app.handle_key_event(key(KeyCode::Tab));
        app.handle_key_event(key(KeyCode::Down));
        app.handle_key_event(key(KeyCode::Char('/')));
        assert!(app.filter_editing);
        type_str(&mut app, "CAR");
        assert_eq!(app.peer_filter, "CAR");
        assert_eq!(app.selected_peer, 0);

        let rows: Vec<(Identity, PeerSection)> = app
            .peer_items()
            .into_iter()
            .map(|item| (item.peer, item.section))
            .collect();
        assert_eq!(
            rows,
            [
                (id("Carla"), PeerSection::Contacts),
                (id("Carla"), PeerSection::AllUsers),
                (id("oscar"), PeerSection::AllUsers),
            ]
        );

        app.handle_key_event(key(KeyCode::Backspace));
        assert_eq!(app.peer_filter, "CA");
        app.handle_key_event(key(KeyCode::Enter));
        assert!(!app.filter_editing);

        app.handle_key_event(key(KeyCode::Down));
        app.handle_key_event(key(KeyCode::Down));
        app.handle_key_event(key(KeyCode::Down));
        assert_eq!(app.selected_peer, 2);
        let cmd = app.handle_key_event(key(KeyCode::Enter));
        assert!(matches!(cmd, Some(SessionCommand::SelectPeer(p)) if p == id("oscar")));
    }

    #[test]
    fn esc_while_searching_clears_instead_of_quitting() {
        let mut app = logged_in();
        app.focus = PanelFocus::Sidebar;
        app.handle_key_event(key(KeyCode::Char('/')));
        type_str(&mut app, "zz");
        assert!(app.peer_items().is_empty());

        app.handle_key_event(key(KeyCode::Esc));
        assert!(!app.should_quit);
        assert!(!app.filter_editing);
        assert!(app.peer_filter.is_empty());
        assert_eq!(app.peer_items().len(), 3);
    }

    #[test]
    fn blank_input_is_ignored() {
        let mut app = logged_in();
        type_str(&mut app, "   ");
        assert!(app.handle_key_event(key(KeyCode::Enter)).is_none());
    }

    #[test]
    fn slash_commands() {
        let mut app = logged_in();
        type_str(&mut app, "/refresh");
        assert!(matches!(
            app.handle_key_event(key(KeyCode::Enter)),
            Some(SessionCommand::RefreshDirectory)
        ));
        type_str(&mut app, "/logout");
        assert!(matches!(
            app.handle_key_event(key(KeyCode::Enter)),
            Some(SessionCommand::Logout)
        ));
    }

    #[test]
    fn multibyte_input_editing() {
        let mut app = logged_in();
        type_str(&mut app, "héllo");
        app.handle_key_event(key(KeyCode::Left));
        app.handle_key_event(key(KeyCode::Backspace));
        assert_eq!(app.input, "hélo");
        app.handle_key_event(key(KeyCode::Home));
        type_str(&mut app, "¡");
        assert_eq!(app.input, "¡hélo");
    }

    #[test]
    fn messages_follow_the_active_peer() {
        let mut app = logged_in();
        let history = Message::history(id("bob"), id("alice"), "old");
        app.apply_event(SessionEvent::ConversationSeeded {
            peer: id("bob"),
            messages: vec![history],
            from_history: true,
        });
        assert_eq!(app.messages[0].status, MessageStatus::History);
        assert_eq!(app.messages[0].timestamp, None);

        let frame = ChatFrame::outbound(id("alice"), id("bob"), "hi");
        app.apply_event(SessionEvent::MessageAppended {
            peer: id("bob"),
            message: Message::local(&frame),
        });
        assert_eq!(app.messages[1].sender, "You");
        assert_eq!(app.messages[1].status, MessageStatus::Pending);
        assert!(app.messages[1].timestamp.is_some());

        app.apply_event(SessionEvent::MessageConfirmed {
            peer: id("bob"),
            index: 1,
        });
        assert_eq!(app.messages[1].status, MessageStatus::Confirmed);

        let stray = ChatFrame::outbound(id("carol"), id("alice"), "psst");
        app.apply_event(SessionEvent::MessageAppended {
            peer: id("carol"),
            message: Message::remote(stray),
        });
        assert_eq!(app.messages.len(), 2);
    }

    #[test]
    fn unread_badges_clear_on_select() {
        let mut app = logged_in();
        app.apply_event(SessionEvent::UnreadChanged {
            peer: id("carol"),
            unread: 2,
        });
        assert_eq!(app.peer_items()[2].unread, 2);

        app.apply_event(SessionEvent::ConversationSeeded {
            peer: id("carol"),
            messages: Vec::new(),
            from_history: false,
        });
        assert_eq!(app.peer_items()[2].unread, 0);
        assert!(app.notice.is_some());
    }

    #[test]
    fn connection_indicator_tracks_events() {
        let mut app = logged_in();
        assert!(!app.is_connected());
        app.apply_event(SessionEvent::ConnectionChanged(ConnectionState::Connected));
        assert!(app.is_connected());

        app.apply_event(SessionEvent::ChannelFailed(ChannelError::RetriesExhausted {
            attempts: 3,
        }));
        assert!(app.channel_failed);
        app.apply_event(SessionEvent::ConnectionChanged(ConnectionState::Connected));
        assert!(!app.channel_failed);
    }

    #[test]
    fn logout_returns_to_empty_login() {
        let mut app = logged_in();
        app.apply_event(SessionEvent::ConnectionChanged(ConnectionState::Connected));
        app.apply_event(SessionEvent::LoggedOut);

        assert_eq!(app.screen, Screen::Login);
        assert!(app.identity.is_none());
        assert!(app.contacts.is_empty());
        assert!(app.all_users.is_empty());
        assert!(app.messages.is_empty());
        assert!(!app.is_connected());
    }

    #[test]
    fn esc_quits_from_any_screen() {
        let mut app = App::new();
        app.handle_key_event(key(KeyCode::Esc));
        assert!(app.should_quit);
    }
}
