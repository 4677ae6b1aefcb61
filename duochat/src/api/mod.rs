//! Request/response collaborators: authentication, directory and history.
//!
//! Each external service sits behind a trait so the session layer can be
//! driven by the real HTTP client ([`http::HttpApi`]) or by the in-memory
//! backend ([`memory::InMemoryApi`]) in tests.

pub mod http;
pub mod memory;

use duochat_proto::api::Credentials;
use duochat_proto::identity::{Identity, SessionToken};

use crate::conversation::Message;
use crate::directory::PeerSet;

/// Failure of a request/response call to the directory or history service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The request could not be sent or no response arrived.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("unexpected status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// A request URL could not be built from the configured base.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

/// Failure of an authentication call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Login was rejected.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Registration was rejected.
    #[error("registration failed")]
    RegistrationFailed,

    /// The token is unknown, expired or revoked.
    #[error("session token is invalid or expired")]
    InvalidToken,

    /// The authentication service could not be reached.
    #[error("authentication service unavailable: {0}")]
    Network(#[from] NetworkError),
}

/// The authentication service.
pub trait AuthApi: Send + Sync + 'static {
    /// Exchange credentials for a session token.
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<SessionToken, AuthError>> + Send;

    /// Create an account. Does not log in.
    fn register(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<(), AuthError>> + Send;

    /// Check a previously issued token, returning the identity it belongs to.
    fn validate_token(
        &self,
        token: &SessionToken,
    ) -> impl std::future::Future<Output = Result<Identity, AuthError>> + Send;
}

/// The directory/contact service. Read-only and idempotent.
pub trait DirectoryApi: Send + Sync + 'static {
    /// The caller's existing contacts.
    fn fetch_contacts(
        &self,
        token: &SessionToken,
    ) -> impl std::future::Future<Output = Result<PeerSet, NetworkError>> + Send;

    /// Every known identity, the caller's own included.
    fn fetch_all_users(
        &self,
        token: &SessionToken,
    ) -> impl std::future::Future<Output = Result<PeerSet, NetworkError>> + Send;
}

/// The history service.
pub trait HistoryApi: Send + Sync + 'static {
    /// All prior messages between `self_id` and `peer`, oldest first, with
    /// origin [`Origin::History`](crate::conversation::Origin::History).
    fn fetch_history(
        &self,
        self_id: &Identity,
        peer: &Identity,
        token: &SessionToken,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, NetworkError>> + Send;
}

/// Everything a session needs from the request/response side.
pub trait ChatBackend: AuthApi + DirectoryApi + HistoryApi {}

impl<T: AuthApi + DirectoryApi + HistoryApi> ChatBackend for T {}
