//! Loopback connector for testing.
//!
//! [`loopback`] returns a [`LoopbackConnector`] to hand to a
//! [`ConnectionManager`](super::ConnectionManager) and a [`LoopbackServer`]
//! that plays the far side: every successful dial shows up as a
//! [`LoopbackPeer`] that can push frames, read what the client wrote, and
//! close the channel with any code.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use duochat_proto::frame::{self, ChatFrame, CloseCode, Frame};
use duochat_proto::identity::SessionToken;

use super::{ChannelError, Connector, Inbound, Link, LinkEnd, Outbound};

#[derive(Debug, Default)]
struct Dials {
    attempts: u32,
    refusing: bool,
}

/// Dials the paired [`LoopbackServer`].
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    dials: Arc<Mutex<Dials>>,
    accept_tx: mpsc::UnboundedSender<LoopbackPeer>,
    capacity: usize,
}

/// The far side of a [`LoopbackConnector`].
#[derive(Debug)]
pub struct LoopbackServer {
    dials: Arc<Mutex<Dials>>,
    accept_rx: mpsc::UnboundedReceiver<LoopbackPeer>,
}

/// One accepted loopback channel, seen from the server side.
#[derive(Debug)]
pub struct LoopbackPeer {
    end: LinkEnd,
    token: SessionToken,
}

/// Creates a connected connector/server pair. `capacity` bounds each
/// direction of every channel.
#[must_use]
pub fn loopback(capacity: usize) -> (LoopbackConnector, LoopbackServer) {
    let dials = Arc::new(Mutex::new(Dials::default()));
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        LoopbackConnector {
            dials: Arc::clone(&dials),
            accept_tx,
            capacity,
        },
        LoopbackServer { dials, accept_rx },
    )
}

impl Connector for LoopbackConnector {
    async fn connect(&self, token: &SessionToken) -> Result<Link, ChannelError> {
        {
            let mut dials = self.dials.lock();
            dials.attempts += 1;
            if dials.refusing {
                return Err(ChannelError::Connect("loopback refused".to_string()));
            }
        }
        let (link, end) = Link::channel(self.capacity);
        self.accept_tx
            .send(LoopbackPeer {
                end,
                token: token.clone(),
            })
            .map_err(|_| ChannelError::Connect("loopback server dropped".to_string()))?;
        Ok(link)
    }
}

impl LoopbackServer {
    /// Makes subsequent dials fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.dials.lock().refusing = refusing;
    }

    /// Dials attempted so far, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.dials.lock().attempts
    }

    /// Waits for the next successful dial.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.accept_rx.recv().await
    }

    /// Returns the next successful dial if one is waiting.
    pub fn try_accept(&mut self) -> Option<LoopbackPeer> {
        self.accept_rx.try_recv().ok()
    }
}

impl LoopbackPeer {
    /// The token the client dialed with.
    #[must_use]
    pub const fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Delivers raw text to the client.
    pub async fn push_text(&self, text: &str) {
        if self.end.inbound.send(Inbound::Text(text.to_string())).await.is_err() {
            tracing::debug!("loopback client gone, text discarded");
        }
    }

    /// Delivers an encoded message frame to the client.
    pub async fn push_frame(&self, chat: ChatFrame) {
        match frame::encode_frame(&Frame::Message(chat)) {
            Ok(text) => self.push_text(&text).await,
            Err(e) => tracing::warn!(err = %e, "loopback frame did not encode"),
        }
    }

    /// Closes the channel from the server side with `code`.
    pub async fn close(self, code: CloseCode) {
        let _ = self.end.inbound.send(Inbound::Closed(code)).await;
    }

    /// Waits for the next item the client wrote.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.end.outbound.recv().await
    }

    /// Returns the next item the client wrote, if any is buffered.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.end.outbound.try_recv().ok()
    }

    /// Waits for the next chat frame the client wrote, skipping anything
    /// that does not decode. `None` once the client closes.
    pub async fn recv_frame(&mut self) -> Option<ChatFrame> {
        while let Some(item) = self.recv().await {
            match item {
                Outbound::Text(text) => {
                    if let Ok(Frame::Message(chat)) = frame::decode_frame(&text) {
                        return Some(chat);
                    }
                }
                Outbound::Close { .. } => return None,
            }
        }
        None
    }
}
