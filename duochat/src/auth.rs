//! Session token store and authentication bookkeeping.
//!
//! [`TokenStore`] persists the one piece of state that survives restarts:
//! the session token, kept as a single file at a well-known path. A missing
//! or empty file means "not logged in".
//!
//! [`Authenticator`] wraps an [`AuthApi`] and keeps the store in step with
//! login, registration, restore and logout.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use duochat_proto::api::Credentials;
use duochat_proto::identity::{Identity, SessionToken};

use crate::api::{AuthApi, AuthError};

/// Token file I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    /// Reading, writing or removing the token file failed.
    #[error("token file {path}: {source}")]
    Io {
        /// The token file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// File-backed storage for the session token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Creates a store backed by `path`. Nothing is touched until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/duochat/token`, if the platform has a data directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("duochat").join("token"))
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenStoreError::Io`] for any failure other than the file
    /// not existing.
    pub fn load(&self) -> Result<Option<SessionToken>, TokenStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| SessionToken::new(token)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Replaces the persisted token, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`TokenStoreError::Io`] if the directory or file cannot be written.
    pub fn save(&self, token: &SessionToken) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        std::fs::write(&self.path, token.as_str()).map_err(|e| self.io_error(e))
    }

    /// Removes the persisted token. Removing an absent token succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`TokenStoreError::Io`] if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), TokenStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: io::Error) -> TokenStoreError {
        TokenStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Result of validating the persisted token at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Nothing was persisted.
    NoToken,
    /// The token is still good; the session can resume.
    Valid {
        /// Identity reported by the authentication service.
        identity: Identity,
        /// The restored token.
        token: SessionToken,
    },
    /// The token was rejected and has been cleared.
    Invalid,
}

/// Login, registration and restore, with token persistence.
#[derive(Debug)]
pub struct Authenticator<A> {
    api: Arc<A>,
    store: TokenStore,
}

impl<A: AuthApi> Authenticator<A> {
    /// Creates an authenticator over `api`, persisting tokens in `store`.
    pub const fn new(api: Arc<A>, store: TokenStore) -> Self {
        Self { api, store }
    }

    /// The token store in use.
    pub const fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Logs in and persists the issued token.
    ///
    /// A token that cannot be written to disk still yields a usable session;
    /// only the next restart is affected.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] reported by the service. Nothing is
    /// persisted on failure.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Identity, SessionToken), AuthError> {
        let credentials = Credentials::new(username, password);
        let token = self.api.login(&credentials).await?;
        if let Err(e) = self.store.save(&token) {
            tracing::warn!(err = %e, "could not persist session token");
        }
        Ok((Identity::new(username), token))
    }

    /// Registers an account and then logs in with the same credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RegistrationFailed`] (or a network error) if the
    /// account could not be created, otherwise whatever [`login`](Self::login)
    /// returns.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Identity, SessionToken), AuthError> {
        self.api
            .register(&Credentials::new(username, password))
            .await?;
        self.login(username, password).await
    }

    /// Validates the persisted token.
    ///
    /// Any validation failure, including an unreachable service, clears the
    /// persisted token and reports [`RestoreOutcome::Invalid`].
    pub async fn restore(&self) -> RestoreOutcome {
        let token = match self.store.load() {
            Ok(Some(token)) => token,
            Ok(None) => return RestoreOutcome::NoToken,
            Err(e) => {
                tracing::warn!(err = %e, "could not read session token");
                return RestoreOutcome::NoToken;
            }
        };

        match self.api.validate_token(&token).await {
            Ok(identity) => {
                tracing::info!(identity = %identity, "session token restored");
                RestoreOutcome::Valid { identity, token }
            }
            Err(e) => {
                tracing::warn!(err = %e, "stored session token rejected");
                self.forget();
                RestoreOutcome::Invalid
            }
        }
    }

    /// Removes the persisted token. Safe to call with nothing stored.
    pub fn forget(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(err = %e, "could not remove session token");
        }
    }
}
