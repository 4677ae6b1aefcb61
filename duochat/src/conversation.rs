//! Conversation state: the ordered message log for the selected peer.
//!
//! The active [`Conversation`] is seeded once from the history service and
//! then only grows: local optimistic echoes and inbound frames are appended
//! in arrival order, and nothing is ever removed. Selecting another peer
//! replaces the conversation outright.
//!
//! Frames for peers other than the active one are held in a per-peer inbox
//! and counted as unread until that peer is selected.

use std::collections::BTreeMap;

use duochat_proto::api::HistoryMessage;
use duochat_proto::frame::ChatFrame;
use duochat_proto::identity::{CorrelationId, Identity, SessionToken};

use crate::api::{HistoryApi, NetworkError};

/// Where a message in the log came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Sent by this client, not yet seen back from the server.
    LocalPending,
    /// Sent by this client and echoed back by the server.
    LocalConfirmed,
    /// Received over the real-time channel.
    Remote,
    /// Loaded from the history service.
    History,
}

/// One entry in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Who wrote it.
    pub sender_id: Identity,
    /// Who it was addressed to.
    pub receiver_id: Identity,
    /// Message text.
    pub content: String,
    /// How it entered the log.
    pub origin: Origin,
    /// Correlation ID of the outbound frame, for local and echoed messages.
    pub correlation_id: Option<CorrelationId>,
}

impl Message {
    /// A message loaded from the history service.
    pub fn history(sender_id: Identity, receiver_id: Identity, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: content.into(),
            origin: Origin::History,
            correlation_id: None,
        }
    }

    /// Converts a history record fetched for the `self_id`/`peer` pair.
    ///
    /// Records without a receiver are addressed to whichever of the two
    /// parties did not send them.
    #[must_use]
    pub fn from_history(record: HistoryMessage, self_id: &Identity, peer: &Identity) -> Self {
        let receiver_id = record.receiver_id.unwrap_or_else(|| {
            if record.sender_id == *self_id {
                peer.clone()
            } else {
                self_id.clone()
            }
        });
        Self::history(record.sender_id, receiver_id, record.content)
    }

    /// The optimistic echo of an outbound frame.
    #[must_use]
    pub fn local(frame: &ChatFrame) -> Self {
        Self {
            sender_id: frame.sender_id.clone(),
            receiver_id: frame.receiver_id.clone(),
            content: frame.content.clone(),
            origin: Origin::LocalPending,
            correlation_id: frame.correlation_id,
        }
    }

    /// A message received over the real-time channel.
    #[must_use]
    pub fn remote(frame: ChatFrame) -> Self {
        Self {
            sender_id: frame.sender_id,
            receiver_id: frame.receiver_id,
            content: frame.content,
            origin: Origin::Remote,
            correlation_id: frame.correlation_id,
        }
    }
}

/// Result of appending an inbound message to a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAppend {
    /// A new entry was appended at this index.
    Appended(usize),
    /// The pending local entry at this index was promoted to
    /// [`Origin::LocalConfirmed`]; nothing was appended.
    Confirmed(usize),
}

/// The append-only message log for one peer.
#[derive(Debug, Clone)]
pub struct Conversation {
    peer: Identity,
    messages: Vec<Message>,
    live: bool,
}

impl Conversation {
    /// An empty conversation with `peer`.
    #[must_use]
    pub const fn new(peer: Identity) -> Self {
        Self {
            peer,
            messages: Vec::new(),
            live: false,
        }
    }

    /// The peer this conversation is with.
    #[must_use]
    pub const fn peer(&self) -> &Identity {
        &self.peer
    }

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Bulk-appends history in server order.
    ///
    /// Returns `false` and appends nothing once any live message has been
    /// appended: history always precedes live traffic.
    pub fn append_history(&mut self, messages: impl IntoIterator<Item = Message>) -> bool {
        if self.live {
            tracing::warn!(peer = %self.peer, "history arrived after live messages, ignoring");
            return false;
        }
        self.messages.extend(messages);
        true
    }

    /// Appends an optimistic local echo with origin [`Origin::LocalPending`].
    /// Returns its index.
    pub fn append_local(&mut self, mut message: Message) -> usize {
        message.origin = Origin::LocalPending;
        self.push_live(message)
    }

    /// Appends an inbound message with origin [`Origin::Remote`], unless it
    /// carries the correlation ID of a pending local entry, in which case
    /// that entry is confirmed in place.
    pub fn append_remote(&mut self, mut message: Message) -> RemoteAppend {
        if let Some(id) = message.correlation_id
            && let Some(index) = self
                .messages
                .iter()
                .position(|m| m.origin == Origin::LocalPending && m.correlation_id == Some(id))
        {
            self.messages[index].origin = Origin::LocalConfirmed;
            return RemoteAppend::Confirmed(index);
        }

        message.origin = Origin::Remote;
        RemoteAppend::Appended(self.push_live(message))
    }

    fn push_live(&mut self, message: Message) -> usize {
        self.live = true;
        self.messages.push(message);
        self.messages.len() - 1
    }
}

/// Where an inbound frame ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Appended to the active conversation at `index`.
    Appended {
        /// Index of the new entry.
        index: usize,
    },
    /// Confirmed the pending local entry at `index` in the active conversation.
    Confirmed {
        /// Index of the promoted entry.
        index: usize,
    },
    /// Held in the inbox for a non-active peer.
    Buffered {
        /// The conversation the frame belongs to.
        peer: Identity,
        /// Unread count for that peer after buffering.
        unread: usize,
    },
    /// Involves neither party of this session.
    Dropped,
}

/// How [`ConversationState::select`] seeded the new conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seeded {
    /// Seeded with exactly the history fetch result.
    History {
        /// Messages loaded.
        count: usize,
    },
    /// The history fetch failed; seeded from buffered inbox messages.
    Inbox {
        /// Messages recovered from the inbox.
        count: usize,
        /// Why history could not be used.
        error: NetworkError,
    },
}

/// The active conversation plus inboxes for every other peer.
#[derive(Debug, Clone)]
pub struct ConversationState {
    self_id: Identity,
    active: Option<Conversation>,
    inbox: BTreeMap<Identity, Vec<Message>>,
}

impl ConversationState {
    /// No active conversation, empty inboxes.
    #[must_use]
    pub const fn new(self_id: Identity) -> Self {
        Self {
            self_id,
            active: None,
            inbox: BTreeMap::new(),
        }
    }

    /// The displayed conversation, if a peer is selected.
    #[must_use]
    pub const fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    /// The selected peer.
    #[must_use]
    pub fn active_peer(&self) -> Option<&Identity> {
        self.active.as_ref().map(Conversation::peer)
    }

    /// Buffered messages from `peer` not yet shown.
    #[must_use]
    pub fn unread(&self, peer: &Identity) -> usize {
        self.inbox
            .get(peer)
            .map_or(0, |msgs| msgs.iter().filter(|m| m.sender_id != self.self_id).count())
    }

    /// Replaces the active conversation with one for `peer`, seeded from
    /// the history service.
    ///
    /// The previous conversation's log is discarded. On success the log is
    /// exactly the history result and the peer's inbox is dropped. If the
    /// fetch fails the log is seeded from the inbox instead.
    pub async fn select<H: HistoryApi>(
        &mut self,
        api: &H,
        token: &SessionToken,
        peer: Identity,
    ) -> Seeded {
        self.active = None;
        let mut conversation = Conversation::new(peer.clone());
        let buffered = self.inbox.remove(&peer).unwrap_or_default();

        let seeded = match api.fetch_history(&self.self_id, &peer, token).await {
            Ok(history) => {
                let count = history.len();
                conversation.append_history(history);
                tracing::debug!(peer = %peer, count, dropped = buffered.len(), "conversation seeded from history");
                Seeded::History { count }
            }
            Err(error) => {
                tracing::warn!(peer = %peer, err = %error, "history fetch failed, seeding from inbox");
                let count = buffered.len();
                for message in buffered {
                    conversation.append_remote(message);
                }
                Seeded::Inbox { count, error }
            }
        };

        self.active = Some(conversation);
        seeded
    }

    /// Records the optimistic echo of an outbound frame in the active
    /// conversation. Returns the new index, or `None` if the frame is not
    /// addressed to the active peer.
    pub fn record_local(&mut self, frame: &ChatFrame) -> Option<usize> {
        let active = self.active.as_mut()?;
        if frame.receiver_id != active.peer {
            return None;
        }
        Some(active.append_local(Message::local(frame)))
    }

    /// Routes an inbound frame to the conversation it belongs to.
    pub fn receive(&mut self, frame: ChatFrame) -> Routed {
        let counterpart = if frame.sender_id == self.self_id {
            frame.receiver_id.clone()
        } else if frame.receiver_id == self.self_id {
            frame.sender_id.clone()
        } else {
            tracing::debug!(sender = %frame.sender_id, receiver = %frame.receiver_id, "frame not addressed to this session, dropping");
            return Routed::Dropped;
        };

        if let Some(active) = self.active.as_mut()
            && active.peer == counterpart
        {
            return match active.append_remote(Message::remote(frame)) {
                RemoteAppend::Appended(index) => Routed::Appended { index },
                RemoteAppend::Confirmed(index) => Routed::Confirmed { index },
            };
        }

        self.inbox
            .entry(counterpart.clone())
            .or_default()
            .push(Message::remote(frame));
        let unread = self.unread(&counterpart);
        Routed::Buffered {
            peer: counterpart,
            unread,
        }
    }

    /// Drops the active conversation and every inbox.
    pub fn clear(&mut self) {
        self.active = None;
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::InMemoryApi;

    fn id(s: &str) -> Identity {
        Identity::new(s)
    }

    fn frame(from: &str, to: &str, content: &str) -> ChatFrame {
        ChatFrame {
            sender_id: id(from),
            receiver_id: id(to),
            content: content.to_string(),
            correlation_id: None,
        }
    }

    fn contents(conv: &Conversation) -> Vec<&str> {
        conv.messages().iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn history_then_live_in_order() {
        let mut conv = Conversation::new(id("bob"));
        assert!(conv.append_history([
            Message::history(id("alice"), id("bob"), "h1"),
            Message::history(id("bob"), id("alice"), "h2"),
        ]));
        conv.append_local(Message::local(&frame("alice", "bob", "l1")));
        conv.append_remote(Message::remote(frame("bob", "alice", "r1")));

        assert_eq!(contents(&conv), ["h1", "h2", "l1", "r1"]);
        let origins: Vec<_> = conv.messages().iter().map(|m| m.origin).collect();
        assert_eq!(
            origins,
            [Origin::History, Origin::History, Origin::LocalPending, Origin::Remote]
        );
    }

    #[test]
    fn history_refused_after_live_append() {
        let mut conv = Conversation::new(id("bob"));
        conv.append_remote(Message::remote(frame("bob", "alice", "live")));
        assert!(!conv.append_history([Message::history(id("bob"), id("alice"), "late")]));
        assert_eq!(contents(&conv), ["live"]);
    }

    #[test]
    fn echo_with_matching_correlation_id_confirms_in_place() {
        let mut conv = Conversation::new(id("bob"));
        let out = ChatFrame::outbound(id("alice"), id("bob"), "hi");
        let index = conv.append_local(Message::local(&out));

        assert_eq!(
            conv.append_remote(Message::remote(out)),
            RemoteAppend::Confirmed(index)
        );
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].origin, Origin::LocalConfirmed);
    }

    #[test]
    fn echo_without_correlation_id_is_appended() {
        let mut conv = Conversation::new(id("bob"));
        let out = ChatFrame::outbound(id("alice"), id("bob"), "hi");
        conv.append_local(Message::local(&out));

        let echo = ChatFrame {
            correlation_id: None,
            ..out
        };
        assert_eq!(conv.append_remote(Message::remote(echo)), RemoteAppend::Appended(1));
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn confirmed_entry_is_not_confirmed_twice() {
        let mut conv = Conversation::new(id("bob"));
        let out = ChatFrame::outbound(id("alice"), id("bob"), "hi");
        conv.append_local(Message::local(&out));
        conv.append_remote(Message::remote(out.clone()));

        assert_eq!(conv.append_remote(Message::remote(out)), RemoteAppend::Appended(1));
    }

    #[test]
    fn from_history_infers_missing_receiver() {
        let alice = id("alice");
        let bob = id("bob");
        let mine = HistoryMessage {
            sender_id: alice.clone(),
            receiver_id: None,
            content: "a".into(),
        };
        let theirs = HistoryMessage {
            sender_id: bob.clone(),
            receiver_id: None,
            content: "b".into(),
        };
        assert_eq!(Message::from_history(mine, &alice, &bob).receiver_id, bob);
        assert_eq!(Message::from_history(theirs, &alice, &bob).receiver_id, alice);
    }

    #[test]
    fn frames_for_inactive_peer_are_buffered() {
        let mut state = ConversationState::new(id("alice"));
        assert_eq!(
            state.receive(frame("carol", "alice", "psst")),
            Routed::Buffered {
                peer: id("carol"),
                unread: 1
            }
        );
        assert_eq!(state.unread(&id("carol")), 1);
        assert!(state.active().is_none());
    }

    #[test]
    fn own_echo_for_inactive_peer_is_not_unread() {
        let mut state = ConversationState::new(id("alice"));
        let routed = state.receive(frame("alice", "carol", "mine"));
        assert_eq!(
            routed,
            Routed::Buffered {
                peer: id("carol"),
                unread: 0
            }
        );
    }

    #[test]
    fn frames_between_strangers_are_dropped() {
        let mut state = ConversationState::new(id("alice"));
        assert_eq!(state.receive(frame("bob", "carol", "x")), Routed::Dropped);
    }

    #[tokio::test]
    async fn select_seeds_exactly_from_history() {
        let api = InMemoryApi::new();
        let token = api.issue_token("alice");
        api.add_history("bob", "alice", "from history");

        let mut state = ConversationState::new(id("alice"));
        state.select(&api, &token, id("bob")).await;
        state.receive(frame("bob", "alice", "live"));
        state.record_local(&ChatFrame::outbound(id("alice"), id("bob"), "mine"));
        assert_eq!(state.active().unwrap().len(), 3);

        state.select(&api, &token, id("carol")).await;
        let seeded = state.select(&api, &token, id("bob")).await;

        assert_eq!(seeded, Seeded::History { count: 1 });
        assert_eq!(contents(state.active().unwrap()), ["from history"]);
    }

    #[tokio::test]
    async fn select_drops_inbox_when_history_succeeds() {
        let api = InMemoryApi::new();
        let token = api.issue_token("alice");
        api.add_history("carol", "alice", "stored");

        let mut state = ConversationState::new(id("alice"));
        state.receive(frame("carol", "alice", "stored"));
        state.select(&api, &token, id("carol")).await;

        assert_eq!(contents(state.active().unwrap()), ["stored"]);
        assert_eq!(state.unread(&id("carol")), 0);
    }

    #[tokio::test]
    async fn select_falls_back_to_inbox_when_history_fails() {
        let api = InMemoryApi::new();
        let token = api.issue_token("alice");
        api.set_history_failing(true);

        let mut state = ConversationState::new(id("alice"));
        state.receive(frame("carol", "alice", "one"));
        state.receive(frame("carol", "alice", "two"));
        let seeded = state.select(&api, &token, id("carol")).await;

        assert!(matches!(seeded, Seeded::Inbox { count: 2, .. }));
        let conv = state.active().unwrap();
        assert_eq!(contents(conv), ["one", "two"]);
        assert!(conv.messages().iter().all(|m| m.origin == Origin::Remote));
    }

    #[tokio::test]
    async fn record_local_ignores_other_peers() {
        let api = InMemoryApi::new();
        let token = api.issue_token("alice");
        let mut state = ConversationState::new(id("alice"));
        assert!(state
            .record_local(&ChatFrame::outbound(id("alice"), id("bob"), "x"))
            .is_none());

        state.select(&api, &token, id("bob")).await;
        assert!(state
            .record_local(&ChatFrame::outbound(id("alice"), id("carol"), "x"))
            .is_none());
        assert_eq!(
            state.record_local(&ChatFrame::outbound(id("alice"), id("bob"), "x")),
            Some(0)
        );
    }

    #[test]
    fn clear_drops_everything() {
        let mut state = ConversationState::new(id("alice"));
        state.receive(frame("carol", "alice", "x"));
        state.clear();
        assert_eq!(state.unread(&id("carol")), 0);
        assert!(state.active_peer().is_none());
    }
}
