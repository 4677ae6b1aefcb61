//! Session context and the background session task.
//!
//! [`Client`] owns everything tied to a logged-in user. While logged in,
//! a [`Session`] holds the identity, token, directory, conversation state
//! and connection manager; logging out runs [`Session::teardown`] once and
//! drops it. Nothing lives in globals.
//!
//! The TUI talks to the client over channels:
//!
//! ```text
//! TUI (main thread)  ←── SessionEvent ───  Client::run (tokio task)
//!                     ─── SessionCommand →
//! ```
//!
//! Events are delivered in order and never dropped; a slow view holds the
//! task back instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use duochat_proto::identity::{Identity, SessionToken};

use crate::api::{AuthError, ChatBackend};
use crate::auth::{Authenticator, RestoreOutcome, TokenStore};
use crate::connection::{
    ChannelError, ConnectionEvent, ConnectionManager, ConnectionState, Connector,
    ReconnectPolicy, SendOutcome,
};
use crate::conversation::{ConversationState, Message, Routed, Seeded};
use crate::directory::{Directory, PeerSet, RefreshFailures};

/// Reason sent with the normal-closure code on logout.
pub const LOGOUT_REASON: &str = "User logged out";

/// Settings for the background session task.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Retry policy for the real-time channel.
    pub reconnect: ReconnectPolicy,
    /// Limit on a single channel dial.
    pub connect_timeout: Duration,
    /// Capacity of the event channel to the view.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

/// Commands sent from the TUI main loop to the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Log in with credentials.
    Login {
        /// Account name.
        username: String,
        /// Password.
        password: String,
    },
    /// Create an account, then log in.
    Register {
        /// Account name.
        username: String,
        /// Password.
        password: String,
    },
    /// Make `peer` the active conversation.
    SelectPeer(Identity),
    /// Send text to the active peer.
    Send {
        /// Message text.
        content: String,
    },
    /// Re-fetch contacts and all users.
    RefreshDirectory,
    /// End the session and forget the token.
    Logout,
    /// Stop the task, keeping the token for next start.
    Shutdown,
}

/// Events sent from the session task to the TUI main loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A stored token is being validated.
    Validating,
    /// No usable session; show the login form.
    LoginRequired,
    /// A session started for `identity`.
    LoggedIn {
        /// Who is logged in.
        identity: Identity,
    },
    /// Login or registration failed. The session state is unchanged.
    AuthFailed(AuthError),
    /// Directory lists as of the latest refresh.
    DirectoryUpdated {
        /// Existing contacts.
        contacts: PeerSet,
        /// Every other user.
        all_users: PeerSet,
    },
    /// The active conversation was replaced.
    ConversationSeeded {
        /// The newly active peer.
        peer: Identity,
        /// Its initial log.
        messages: Vec<Message>,
        /// `false` when history failed and the log came from the inbox.
        from_history: bool,
    },
    /// A message was appended to the active conversation.
    MessageAppended {
        /// The active peer.
        peer: Identity,
        /// The new entry.
        message: Message,
    },
    /// The pending local entry at `index` was echoed back by the server.
    MessageConfirmed {
        /// The active peer.
        peer: Identity,
        /// Index of the confirmed entry.
        index: usize,
    },
    /// Unread count for a non-active peer changed.
    UnreadChanged {
        /// The peer.
        peer: Identity,
        /// Buffered messages not yet shown.
        unread: usize,
    },
    /// The real-time channel changed state.
    ConnectionChanged(ConnectionState),
    /// Reconnection was abandoned.
    ChannelFailed(ChannelError),
    /// Informational text for the status bar.
    Notice(String),
    /// The session ended.
    LoggedOut,
}

/// Everything that exists only while logged in.
pub struct Session<C> {
    identity: Identity,
    token: SessionToken,
    directory: Directory,
    conversations: ConversationState,
    connection: ConnectionManager<C>,
}

impl<C: Connector> Session<C> {
    fn new(identity: Identity, token: SessionToken, connection: ConnectionManager<C>) -> Self {
        Self {
            directory: Directory::new(identity.clone()),
            conversations: ConversationState::new(identity.clone()),
            identity,
            token,
            connection,
        }
    }

    /// The logged-in identity.
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The session token.
    pub const fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Contacts and all-users lists.
    pub const fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Active conversation and inboxes.
    pub const fn conversations(&self) -> &ConversationState {
        &self.conversations
    }

    /// Current channel state.
    pub const fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether a reconnect is scheduled.
    pub const fn retry_pending(&self) -> bool {
        self.connection.retry_pending()
    }

    /// Closes the channel with the normal-closure code and clears all
    /// per-session state.
    fn teardown(&mut self) {
        self.connection.close(LOGOUT_REASON);
        self.directory.clear();
        self.conversations.clear();
        tracing::info!(identity = %self.identity, "session torn down");
    }
}

/// The client: authentication plus the current session, if any.
pub struct Client<B, C> {
    backend: Arc<B>,
    connector: Arc<C>,
    auth: Authenticator<B>,
    config: SessionConfig,
    session: Option<Session<C>>,
    events: mpsc::Sender<SessionEvent>,
}

impl<B: ChatBackend, C: Connector> Client<B, C> {
    /// Creates a logged-out client and the receiver for its events.
    pub fn new(
        backend: B,
        connector: C,
        store: TokenStore,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(config.event_capacity.max(1));
        let backend = Arc::new(backend);
        let client = Self {
            auth: Authenticator::new(Arc::clone(&backend), store),
            backend,
            connector: Arc::new(connector),
            config,
            session: None,
            events,
        };
        (client, rx)
    }

    /// The current session, if logged in.
    pub const fn session(&self) -> Option<&Session<C>> {
        self.session.as_ref()
    }

    /// Whether a session is active.
    pub const fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Validates the persisted token and resumes the session if it is good.
    pub async fn restore(&mut self) -> RestoreOutcome {
        emit(&self.events, SessionEvent::Validating).await;
        let outcome = self.auth.restore().await;
        match &outcome {
            RestoreOutcome::Valid { identity, token } => {
                self.start(identity.clone(), token.clone()).await;
            }
            RestoreOutcome::NoToken | RestoreOutcome::Invalid => {
                emit(&self.events, SessionEvent::LoginRequired).await;
            }
        }
        outcome
    }

    /// Logs in and starts a session.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] from the service; nothing changes on failure.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), AuthError> {
        match self.auth.login(username, password).await {
            Ok((identity, token)) => {
                self.start(identity, token).await;
                Ok(())
            }
            Err(e) => {
                emit(&self.events, SessionEvent::AuthFailed(e.clone())).await;
                Err(e)
            }
        }
    }

    /// Registers, logs in and starts a session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RegistrationFailed`] or the login error.
    pub async fn register(&mut self, username: &str, password: &str) -> Result<(), AuthError> {
        match self.auth.register(username, password).await {
            Ok((identity, token)) => {
                self.start(identity, token).await;
                Ok(())
            }
            Err(e) => {
                emit(&self.events, SessionEvent::AuthFailed(e.clone())).await;
                Err(e)
            }
        }
    }

    async fn start(&mut self, identity: Identity, token: SessionToken) {
        if let Some(mut previous) = self.session.take() {
            previous.teardown();
        }
        let connection = ConnectionManager::new(
            Arc::clone(&self.connector),
            token.clone(),
            self.config.reconnect.clone(),
            self.config.connect_timeout,
        );
        let mut session = Session::new(identity.clone(), token, connection);
        session.connection.open();
        self.session = Some(session);

        tracing::info!(identity = %identity, "session started");
        emit(&self.events, SessionEvent::LoggedIn { identity }).await;
        self.refresh_directory().await;
    }

    /// Re-fetches both directory lists. Failed lists keep their contents.
    pub async fn refresh_directory(&mut self) -> RefreshFailures {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let failures = session
            .directory
            .refresh(self.backend.as_ref(), &session.token)
            .await;
        let event = SessionEvent::DirectoryUpdated {
            contacts: session.directory.contacts().clone(),
            all_users: session.directory.all_users().clone(),
        };
        emit(&self.events, event).await;
        failures
    }

    /// Makes `peer` the active conversation, seeded from history.
    ///
    /// Returns `None` when logged out.
    pub async fn select_peer(&mut self, peer: Identity) -> Option<Seeded> {
        let session = self.session.as_mut()?;
        let seeded = session
            .conversations
            .select(self.backend.as_ref(), &session.token, peer.clone())
            .await;
        let messages = session
            .conversations
            .active()
            .map(|c| c.messages().to_vec())
            .unwrap_or_default();
        let event = SessionEvent::ConversationSeeded {
            peer: peer.clone(),
            messages,
            from_history: matches!(seeded, Seeded::History { .. }),
        };
        emit(&self.events, event).await;
        emit(&self.events, SessionEvent::UnreadChanged { peer, unread: 0 }).await;
        Some(seeded)
    }

    /// Sends `content` to the active peer and appends the local echo before
    /// returning.
    ///
    /// Blank content, no session, or no active peer all yield
    /// [`SendOutcome::Ignored`].
    pub async fn send(&mut self, content: &str) -> SendOutcome {
        let Some(session) = self.session.as_mut() else {
            return SendOutcome::Ignored;
        };
        let Some(peer) = session.conversations.active_peer().cloned() else {
            let notice = SessionEvent::Notice("Select a contact first".to_string());
            emit(&self.events, notice).await;
            return SendOutcome::Ignored;
        };

        let outcome = session
            .connection
            .send(session.identity.clone(), peer.clone(), content);
        let echo = outcome.frame().and_then(|frame| {
            let index = session.conversations.record_local(frame)?;
            session
                .conversations
                .active()
                .and_then(|c| c.messages().get(index))
                .cloned()
        });
        if let Some(message) = echo {
            emit(&self.events, SessionEvent::MessageAppended { peer, message }).await;
        }
        outcome
    }

    /// Ends the session: closes the channel with code 1000, clears the
    /// directory and conversations, and forgets the token. A no-op when
    /// logged out.
    pub async fn logout(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.teardown();
        self.auth.forget();
        emit(&self.events, SessionEvent::LoggedOut).await;
    }

    /// Waits for one connection event and applies it. Never returns while
    /// logged out.
    pub async fn process_connection_event(&mut self) {
        let event = next_connection_event(&mut self.session).await;
        self.on_connection_event(event).await;
    }

    /// Runs the command loop until [`SessionCommand::Shutdown`] or the
    /// command channel closes. Starts by restoring any persisted session.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        self.restore().await;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                event = next_connection_event(&mut self.session) => self.on_connection_event(event).await,
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.connection.close("Client shutting down");
        }
        tracing::info!("session task shutting down");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Login { username, password } => {
                let _ = self.login(&username, &password).await;
            }
            SessionCommand::Register { username, password } => {
                let _ = self.register(&username, &password).await;
            }
            SessionCommand::SelectPeer(peer) => {
                self.select_peer(peer).await;
            }
            SessionCommand::Send { content } => {
                self.send(&content).await;
            }
            SessionCommand::RefreshDirectory => {
                self.refresh_directory().await;
            }
            SessionCommand::Logout => self.logout().await,
            SessionCommand::Shutdown => {}
        }
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let event = match event {
            ConnectionEvent::StateChanged(state) => SessionEvent::ConnectionChanged(state),
            ConnectionEvent::Failed(err) => SessionEvent::ChannelFailed(err),
            ConnectionEvent::Frame(frame) => {
                let peer = session.conversations.active_peer().cloned();
                match session.conversations.receive(frame) {
                    Routed::Appended { index } => {
                        let (Some(peer), Some(message)) = (
                            peer,
                            session
                                .conversations
                                .active()
                                .and_then(|c| c.messages().get(index))
                                .cloned(),
                        ) else {
                            return;
                        };
                        SessionEvent::MessageAppended { peer, message }
                    }
                    Routed::Confirmed { index } => {
                        let Some(peer) = peer else { return };
                        SessionEvent::MessageConfirmed { peer, index }
                    }
                    Routed::Buffered { peer, unread } => {
                        SessionEvent::UnreadChanged { peer, unread }
                    }
                    Routed::Dropped => return,
                }
            }
        };
        emit(&self.events, event).await;
    }
}

/// Delivers `event` to the view, waiting for room rather than dropping it:
/// the view's log mirrors the session's only if it sees every event.
async fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("view gone, session event discarded");
    }
}

async fn next_connection_event<C: Connector>(session: &mut Option<Session<C>>) -> ConnectionEvent {
    match session {
        Some(session) => session.connection.next_event().await,
        None => std::future::pending().await,
    }
}
