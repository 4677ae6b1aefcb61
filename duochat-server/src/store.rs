//! In-memory accounts, tokens, contacts and message history.
//!
//! [`ChatStore`] is thread-safe via [`RwLock`]. Nothing is persisted; a
//! restart forgets everything.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::RwLock;
use uuid::Uuid;

use duochat_proto::api::HistoryMessage;
use duochat_proto::frame::ChatFrame;
use duochat_proto::identity::{Identity, SessionToken};

/// Why an account could not be created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The name is already taken.
    #[error("user {0} already exists")]
    UserExists(String),

    /// Empty or whitespace-only username or password.
    #[error("username and password must not be blank")]
    BlankCredentials,
}

#[derive(Debug, Default)]
struct Inner {
    passwords: HashMap<Identity, String>,
    tokens: HashMap<String, Identity>,
    contacts: HashMap<Identity, BTreeSet<Identity>>,
    history: HashMap<(Identity, Identity), Vec<HistoryMessage>>,
}

/// Accounts, sessions, contacts and per-pair history.
#[derive(Debug, Default)]
pub struct ChatStore {
    inner: RwLock<Inner>,
}

/// Both orderings of a pair share one history log.
fn pair_key(a: &Identity, b: &Identity) -> (Identity, Identity) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl ChatStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// [`StoreError::BlankCredentials`] for blank input,
    /// [`StoreError::UserExists`] if the name is taken.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let username = username.trim();
        if username.is_empty() || password.trim().is_empty() {
            return Err(StoreError::BlankCredentials);
        }
        let identity = Identity::new(username);
        let mut inner = self.inner.write().await;
        if inner.passwords.contains_key(&identity) {
            return Err(StoreError::UserExists(username.to_string()));
        }
        inner.passwords.insert(identity, password.to_string());
        drop(inner);
        tracing::info!(username, "account created");
        Ok(())
    }

    /// Checks credentials and issues a fresh token.
    pub async fn login(&self, username: &str, password: &str) -> Option<SessionToken> {
        let identity = Identity::new(username.trim());
        let mut inner = self.inner.write().await;
        if inner.passwords.get(&identity).map(String::as_str) != Some(password) {
            return None;
        }
        let token = Uuid::now_v7().simple().to_string();
        inner.tokens.insert(token.clone(), identity);
        Some(SessionToken::new(token))
    }

    /// The identity a token was issued to.
    pub async fn validate(&self, token: &str) -> Option<Identity> {
        self.inner.read().await.tokens.get(token).cloned()
    }

    /// Invalidates every issued token.
    pub async fn revoke_all_tokens(&self) {
        self.inner.write().await.tokens.clear();
    }

    /// Adds `contact` to `owner`'s contact list.
    pub async fn add_contact(&self, owner: &Identity, contact: &Identity) {
        self.inner
            .write()
            .await
            .contacts
            .entry(owner.clone())
            .or_default()
            .insert(contact.clone());
    }

    /// `user`'s contacts in name order.
    pub async fn contacts(&self, user: &Identity) -> Vec<Identity> {
        self.inner
            .read()
            .await
            .contacts
            .get(user)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every registered identity in name order.
    pub async fn users(&self) -> Vec<Identity> {
        let mut users: Vec<Identity> = self.inner.read().await.passwords.keys().cloned().collect();
        users.sort();
        users
    }

    /// Whether `user` has an account.
    pub async fn exists(&self, user: &Identity) -> bool {
        self.inner.read().await.passwords.contains_key(user)
    }

    /// Appends a delivered frame to the pair's history and makes the two
    /// parties contacts of each other.
    pub async fn record(&self, frame: &ChatFrame) {
        let mut inner = self.inner.write().await;
        inner
            .history
            .entry(pair_key(&frame.sender_id, &frame.receiver_id))
            .or_default()
            .push(HistoryMessage {
                sender_id: frame.sender_id.clone(),
                receiver_id: Some(frame.receiver_id.clone()),
                content: frame.content.clone(),
            });
        inner
            .contacts
            .entry(frame.sender_id.clone())
            .or_default()
            .insert(frame.receiver_id.clone());
        inner
            .contacts
            .entry(frame.receiver_id.clone())
            .or_default()
            .insert(frame.sender_id.clone());
    }

    /// Messages between `a` and `b`, oldest first.
    pub async fn history(&self, a: &Identity, b: &Identity) -> Vec<HistoryMessage> {
        self.inner
            .read()
            .await
            .history
            .get(&pair_key(a, b))
            .cloned()
            .unwrap_or_default()
    }
}
