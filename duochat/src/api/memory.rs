//! In-process backend for tests and offline runs.
//!
//! [`InMemoryApi`] implements every API trait against shared in-memory maps.
//! Clones share state, so a test can keep a handle to seed users, history
//! and failures while the session under test owns another.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use duochat_proto::api::Credentials;
use duochat_proto::identity::{Identity, SessionToken};

use super::{AuthApi, AuthError, DirectoryApi, HistoryApi, NetworkError};
use crate::conversation::Message;
use crate::directory::PeerSet;

#[derive(Debug, Default)]
struct Inner {
    passwords: HashMap<String, String>,
    tokens: HashMap<String, Identity>,
    contacts: HashMap<Identity, BTreeSet<Identity>>,
    /// Stored as `(sender, receiver, content)` in insertion order.
    messages: Vec<(Identity, Identity, String)>,
    unavailable: bool,
    directory_failing: bool,
    history_failing: bool,
    history_requests: usize,
}

/// Shared in-memory implementation of the request/response APIs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryApi {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryApi {
    /// Creates an empty backend with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_user`](Self::add_user).
    #[must_use]
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.add_user(username, password);
        self
    }

    /// Registers an account directly, bypassing [`AuthApi::register`].
    pub fn add_user(&self, username: &str, password: &str) {
        self.inner
            .lock()
            .passwords
            .insert(username.to_string(), password.to_string());
    }

    /// Issues a token for `username` as if it had logged in earlier.
    pub fn issue_token(&self, username: &str) -> SessionToken {
        let token = Uuid::now_v7().simple().to_string();
        self.inner
            .lock()
            .tokens
            .insert(token.clone(), Identity::new(username));
        SessionToken::new(token)
    }

    /// Invalidates every issued token.
    pub fn revoke_tokens(&self) {
        self.inner.lock().tokens.clear();
    }

    /// Adds `contact` to `owner`'s contact list.
    pub fn add_contact(&self, owner: &str, contact: &str) {
        self.inner
            .lock()
            .contacts
            .entry(Identity::new(owner))
            .or_default()
            .insert(Identity::new(contact));
    }

    /// Appends a stored message to the history service.
    pub fn add_history(&self, sender: &str, receiver: &str, content: &str) {
        self.inner.lock().messages.push((
            Identity::new(sender),
            Identity::new(receiver),
            content.to_string(),
        ));
    }

    /// Makes every authentication call fail with a network error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Makes directory fetches fail with a 503.
    pub fn set_directory_failing(&self, failing: bool) {
        self.inner.lock().directory_failing = failing;
    }

    /// Makes history fetches fail with a 503.
    pub fn set_history_failing(&self, failing: bool) {
        self.inner.lock().history_failing = failing;
    }

    /// Number of history fetches served or refused so far.
    #[must_use]
    pub fn history_requests(&self) -> usize {
        self.inner.lock().history_requests
    }

    fn identity_for(inner: &Inner, token: &SessionToken) -> Result<Identity, NetworkError> {
        inner
            .tokens
            .get(token.as_str())
            .cloned()
            .ok_or(NetworkError::Status { status: 401 })
    }
}

const UNAVAILABLE: NetworkError = NetworkError::Status { status: 503 };

impl AuthApi for InMemoryApi {
    async fn login(&self, credentials: &Credentials) -> Result<SessionToken, AuthError> {
        {
            let inner = self.inner.lock();
            if inner.unavailable {
                return Err(AuthError::Network(UNAVAILABLE));
            }
            if inner.passwords.get(&credentials.username) != Some(&credentials.password) {
                return Err(AuthError::InvalidCredentials);
            }
        }
        Ok(self.issue_token(&credentials.username))
    }

    async fn register(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(AuthError::Network(UNAVAILABLE));
        }
        if credentials.username.trim().is_empty()
            || credentials.password.is_empty()
            || inner.passwords.contains_key(&credentials.username)
        {
            return Err(AuthError::RegistrationFailed);
        }
        inner
            .passwords
            .insert(credentials.username.clone(), credentials.password.clone());
        Ok(())
    }

    async fn validate_token(&self, token: &SessionToken) -> Result<Identity, AuthError> {
        let inner = self.inner.lock();
        if inner.unavailable {
            return Err(AuthError::Network(UNAVAILABLE));
        }
        inner
            .tokens
            .get(token.as_str())
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

impl DirectoryApi for InMemoryApi {
    async fn fetch_contacts(&self, token: &SessionToken) -> Result<PeerSet, NetworkError> {
        let inner = self.inner.lock();
        if inner.directory_failing {
            return Err(UNAVAILABLE);
        }
        let me = Self::identity_for(&inner, token)?;
        Ok(inner
            .contacts
            .get(&me)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_all_users(&self, token: &SessionToken) -> Result<PeerSet, NetworkError> {
        let inner = self.inner.lock();
        if inner.directory_failing {
            return Err(UNAVAILABLE);
        }
        Self::identity_for(&inner, token)?;
        Ok(inner
            .passwords
            .keys()
            .map(|name| Identity::new(name.as_str()))
            .collect())
    }
}

impl HistoryApi for InMemoryApi {
    async fn fetch_history(
        &self,
        self_id: &Identity,
        peer: &Identity,
        token: &SessionToken,
    ) -> Result<Vec<Message>, NetworkError> {
        let mut inner = self.inner.lock();
        inner.history_requests += 1;
        if inner.history_failing {
            return Err(UNAVAILABLE);
        }
        Self::identity_for(&inner, token)?;
        Ok(inner
            .messages
            .iter()
            .filter(|(s, r, _)| (s == self_id && r == peer) || (s == peer && r == self_id))
            .map(|(s, r, content)| Message::history(s.clone(), r.clone(), content.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn login_checks_password() {
        let api = InMemoryApi::new().with_user("alice", "pw");
        assert!(api.login(&Credentials::new("alice", "pw")).await.is_ok());
        assert_eq!(
            api.login(&Credentials::new("alice", "nope")).await,
            Err(AuthError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn issued_tokens_validate_until_revoked() {
        let api = InMemoryApi::new();
        let token = api.issue_token("alice");
        assert_eq!(
            api.validate_token(&token).await.unwrap(),
            Identity::new("alice")
        );
        api.revoke_tokens();
        assert_eq!(
            api.validate_token(&token).await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let api = InMemoryApi::new().with_user("alice", "pw");
        assert_eq!(
            api.register(&Credentials::new("alice", "other")).await,
            Err(AuthError::RegistrationFailed)
        );
    }

    #[tokio::test]
    async fn history_is_filtered_to_the_pair() {
        let api = InMemoryApi::new();
        let token = api.issue_token("alice");
        api.add_history("alice", "bob", "one");
        api.add_history("carol", "alice", "other");
        api.add_history("bob", "alice", "two");

        let history = api
            .fetch_history(&Identity::new("alice"), &Identity::new("bob"), &token)
            .await
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two"]);
        assert_eq!(api.history_requests(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let api = InMemoryApi::new();
        let handle = api.clone();
        handle.set_directory_failing(true);
        let token = api.issue_token("alice");
        assert!(api.fetch_contacts(&token).await.is_err());
    }
}
