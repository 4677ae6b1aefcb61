//! Connection manager for the persistent real-time channel.
//!
//! [`ConnectionManager`] drives a [`ConnectionMachine`] with real I/O: it
//! dials through a [`Connector`], owns the resulting [`Link`], arms the
//! retry timer and encodes/decodes frames. All of it runs on the caller's
//! task: [`ConnectionManager::next_event`] is awaited in the session's
//! select loop and nothing is spawned here.
//!
//! Implementations of [`Connector`]:
//! - [`ws::WsConnector`]: WebSocket via tokio-tungstenite
//! - [`loopback::LoopbackConnector`]: in-process channels for tests

pub mod loopback;
pub mod machine;
pub mod ws;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Sleep;

use duochat_proto::frame::{self, ChatFrame, CloseCode, Frame};
use duochat_proto::identity::{Identity, SessionToken};

pub use machine::{ConnectionMachine, ConnectionState, ReconnectPolicy, SendDisposition};
use machine::Action;

/// Channel-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The endpoint could not be reached or refused the upgrade.
    #[error("channel connect failed: {0}")]
    Connect(String),

    /// Dialing took longer than the connect timeout.
    #[error("channel connect timed out")]
    Timeout,

    /// The channel closed with an abnormal code.
    #[error("channel closed with code {code}")]
    Closed {
        /// The close status code.
        code: CloseCode,
    },

    /// An error on an open channel.
    #[error("channel transport error: {0}")]
    Transport(String),

    /// The reconnect policy ran out of attempts.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

/// Something written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A JSON text frame.
    Text(String),
    /// A close frame; the transport shuts down after sending it.
    Close {
        /// Close status code.
        code: CloseCode,
        /// Human-readable reason.
        reason: String,
    },
}

/// Something read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A JSON text frame.
    Text(String),
    /// The transport closed. Always the last item.
    Closed(CloseCode),
}

/// The manager's half of an open channel.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<Inbound>,
}

/// The transport's half of an open channel.
#[derive(Debug)]
pub struct LinkEnd {
    /// Items the manager wants written.
    pub outbound: mpsc::Receiver<Outbound>,
    /// Where the transport delivers what it reads.
    pub inbound: mpsc::Sender<Inbound>,
}

impl Link {
    /// Creates a connected pair of halves with `capacity` slots each way.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, LinkEnd) {
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            LinkEnd {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }
}

/// Dials the persistent channel.
pub trait Connector: Send + Sync + 'static {
    /// Opens a channel authenticated with `token`.
    fn connect(
        &self,
        token: &SessionToken,
    ) -> impl Future<Output = Result<Link, ChannelError>> + Send;
}

/// Something the owner of a [`ConnectionManager`] should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A well-formed message frame arrived.
    Frame(ChatFrame),
    /// Reconnection stopped for good; only an explicit open restarts it.
    Failed(ChannelError),
}

/// Result of [`ConnectionManager::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank content; nothing sent or queued.
    Ignored,
    /// Written to the open channel.
    Transmitted(ChatFrame),
    /// Queued until the channel opens.
    Queued(ChatFrame),
}

impl SendOutcome {
    /// The frame that was sent or queued.
    #[must_use]
    pub const fn frame(&self) -> Option<&ChatFrame> {
        match self {
            Self::Ignored => None,
            Self::Transmitted(f) | Self::Queued(f) => Some(f),
        }
    }
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Link, ChannelError>> + Send>>;

enum Input {
    Dialed(Result<Link, ChannelError>),
    Read(Option<Inbound>),
    Writable(Result<mpsc::OwnedPermit<Outbound>, mpsc::error::SendError<()>>),
    RetryFired,
}

/// Owns the persistent channel for one logged-in session.
pub struct ConnectionManager<C> {
    connector: Arc<C>,
    token: SessionToken,
    connect_timeout: Duration,
    machine: ConnectionMachine,
    link: Option<Link>,
    dialing: Option<ConnectFuture>,
    retry: Option<Pin<Box<Sleep>>>,
    outbox: VecDeque<ChatFrame>,
    events: VecDeque<ConnectionEvent>,
}

impl<C: Connector> ConnectionManager<C> {
    /// A disconnected manager. Call [`open`](Self::open) to dial.
    pub fn new(
        connector: Arc<C>,
        token: SessionToken,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            token,
            connect_timeout,
            machine: ConnectionMachine::new(policy),
            link: None,
            dialing: None,
            retry: None,
            outbox: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Current state.
    pub const fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Whether the channel is open.
    pub fn is_connected(&self) -> bool {
        self.machine.state() == ConnectionState::Connected
    }

    /// Whether a retry timer is armed.
    pub const fn retry_pending(&self) -> bool {
        self.machine.retry_armed()
    }

    /// Frames accepted but not yet written: queued until the channel
    /// opens, or waiting for room on the open link.
    pub fn pending(&self) -> usize {
        self.machine.pending() + self.outbox.len()
    }

    /// Starts dialing if disconnected.
    pub fn open(&mut self) {
        self.drive(ConnectionMachine::open);
    }

    /// Closes the channel with the normal-closure code and stops retrying.
    pub fn close(&mut self, reason: &str) {
        tracing::info!(reason, "closing channel");
        self.drive(|m| m.close(reason));
        self.dialing = None;
        self.link = None;
        self.outbox.clear();
    }

    /// Sends `content` from `sender` to `receiver`.
    ///
    /// Blank content is ignored. When not connected the frame is queued
    /// and the channel is opened; the queue is flushed on connect. When the
    /// link has no room the frame waits in order behind earlier ones and is
    /// written by [`next_event`](Self::next_event) as room frees up; either
    /// way the outcome is [`SendOutcome::Queued`].
    pub fn send(&mut self, sender: Identity, receiver: Identity, content: &str) -> SendOutcome {
        let frame = ChatFrame::outbound(sender, receiver, content);
        let before = self.machine.state();
        let (disposition, actions) = self.machine.send(frame.clone());
        self.note_transition(before);
        self.apply(actions);

        match disposition {
            SendDisposition::Ignored => SendOutcome::Ignored,
            SendDisposition::Transmitted if self.outbox.back() == Some(&frame) => {
                tracing::debug!(waiting = self.outbox.len(), "link full, frame waiting");
                SendOutcome::Queued(frame)
            }
            SendDisposition::Transmitted => SendOutcome::Transmitted(frame),
            SendDisposition::Queued => {
                tracing::debug!(pending = self.machine.pending(), "frame queued until connected");
                SendOutcome::Queued(frame)
            }
        }
    }

    /// Waits for the next event, driving dials, reads and the retry timer.
    ///
    /// Cancel-safe: dropping the future loses nothing.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            if let Some(event) = self.events.pop_front() {
                return event;
            }

            let writer = if self.outbox.is_empty() {
                None
            } else {
                self.link.as_ref().map(|link| link.outbound.clone())
            };
            let input = tokio::select! {
                result = dial(&mut self.dialing) => Input::Dialed(result),
                item = read(&mut self.link) => Input::Read(item),
                permit = writable(writer) => Input::Writable(permit),
                () = retry(&mut self.retry) => Input::RetryFired,
            };
            self.handle(input);
        }
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Dialed(Ok(link)) => {
                self.dialing = None;
                self.link = Some(link);
                tracing::info!("channel open");
                self.drive(ConnectionMachine::on_opened);
            }
            Input::Dialed(Err(e)) => {
                self.dialing = None;
                tracing::warn!(err = %e, "channel dial failed");
                self.drive(|m| m.on_closed(CloseCode::ABNORMAL));
            }
            Input::Read(Some(Inbound::Text(text))) => match frame::decode_frame(&text) {
                Ok(Frame::Message(chat)) => self.events.push_back(ConnectionEvent::Frame(chat)),
                Err(e) => tracing::warn!(err = %e, "dropping malformed frame"),
            },
            Input::Read(item) => {
                let code = match item {
                    Some(Inbound::Closed(code)) => code,
                    _ => CloseCode::ABNORMAL,
                };
                self.link = None;
                if code.is_normal() {
                    tracing::info!(%code, "channel closed normally");
                } else {
                    tracing::warn!(err = %ChannelError::Closed { code }, "channel lost");
                }
                let unwritten = std::mem::take(&mut self.outbox);
                if !unwritten.is_empty() {
                    tracing::info!(count = unwritten.len(), "unwritten frames kept for reconnect");
                }
                self.drive(|m| {
                    let actions = m.on_closed(code);
                    m.requeue(unwritten);
                    actions
                });
            }
            Input::Writable(Ok(permit)) => {
                if let Some(chat) = self.outbox.pop_front() {
                    match frame::encode_frame(&Frame::Message(chat)) {
                        Ok(text) => {
                            let _ = permit.send(Outbound::Text(text));
                        }
                        Err(e) => tracing::warn!(err = %e, "could not encode frame"),
                    }
                }
            }
            Input::Writable(Err(_)) => {
                // Transport gone; the read side reports the close.
                tracing::debug!("link closed while frames wait");
            }
            Input::RetryFired => {
                self.retry = None;
                self.drive(ConnectionMachine::on_retry_fired);
            }
        }
    }

    /// Runs one machine input, applies its actions and reports any state change.
    fn drive(&mut self, input: impl FnOnce(&mut ConnectionMachine) -> Vec<Action>) {
        let before = self.machine.state();
        let actions = input(&mut self.machine);
        self.note_transition(before);
        self.apply(actions);
    }

    fn note_transition(&mut self, before: ConnectionState) {
        let after = self.machine.state();
        if after != before {
            tracing::debug!(from = %before, to = %after, "connection state changed");
            self.events.push_back(ConnectionEvent::StateChanged(after));
        }
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Connect => self.start_dial(),
                Action::ScheduleRetry { delay, attempt } => {
                    tracing::info!(attempt, delay = ?delay, "scheduling reconnect");
                    self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Action::CancelRetry => self.retry = None,
                Action::Transmit(chat) => self.transmit(chat),
                Action::Close { code, reason } => {
                    self.dialing = None;
                    if let Some(link) = self.link.take()
                        && link.outbound.try_send(Outbound::Close { code, reason }).is_err()
                    {
                        tracing::debug!("transport already gone while closing");
                    }
                }
                Action::GiveUp { attempts } => {
                    let err = ChannelError::RetriesExhausted { attempts };
                    tracing::warn!(err = %err, "reconnect abandoned");
                    self.events.push_back(ConnectionEvent::Failed(err));
                }
            }
        }
    }

    fn start_dial(&mut self) {
        let connector = Arc::clone(&self.connector);
        let token = self.token.clone();
        let timeout = self.connect_timeout;
        tracing::debug!("dialing channel");
        self.dialing = Some(Box::pin(async move {
            tokio::time::timeout(timeout, connector.connect(&token))
                .await
                .map_err(|_| ChannelError::Timeout)?
        }));
    }

    /// Writes `chat` now if the link has room and nothing is waiting ahead
    /// of it; otherwise it joins the outbox.
    fn transmit(&mut self, chat: ChatFrame) {
        let Some(link) = &self.link else {
            self.outbox.push_back(chat);
            return;
        };
        if !self.outbox.is_empty() {
            self.outbox.push_back(chat);
            return;
        }
        let text = match frame::encode_frame(&Frame::Message(chat.clone())) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(err = %e, "could not encode frame");
                return;
            }
        };
        if let Err(e) = link.outbound.try_send(Outbound::Text(text)) {
            tracing::debug!(err = %e, "link busy, frame waiting");
            self.outbox.push_back(chat);
        }
    }
}

async fn dial(dialing: &mut Option<ConnectFuture>) -> Result<Link, ChannelError> {
    match dialing {
        Some(fut) => fut.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn read(link: &mut Option<Link>) -> Option<Inbound> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn writable(
    writer: Option<mpsc::Sender<Outbound>>,
) -> Result<mpsc::OwnedPermit<Outbound>, mpsc::error::SendError<()>> {
    match writer {
        Some(sender) => sender.reserve_owned().await,
        None => std::future::pending().await,
    }
}

async fn retry(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
