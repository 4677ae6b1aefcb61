//! reqwest implementation of the authentication, directory and history APIs.
//!
//! Every authenticated call sends the raw session token in the
//! `Authorization` header, with no scheme prefix.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use url::Url;

use duochat_proto::api::{
    Credentials, LoginResponse, MessagesResponse, UsersResponse, ValidateTokenResponse,
};
use duochat_proto::identity::{Identity, SessionToken};

use super::{AuthApi, AuthError, DirectoryApi, HistoryApi, NetworkError};
use crate::conversation::Message;
use crate::directory::PeerSet;

/// HTTP client for the chat backend's request/response endpoints.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
}

impl HttpApi {
    /// Creates a client rooted at `base_url` (e.g. `http://localhost:8080`).
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Endpoint`] if `base_url` is not a valid base
    /// URL, or [`NetworkError::Request`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let base = Url::parse(base_url).map_err(|e| NetworkError::Endpoint(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(NetworkError::Endpoint(format!(
                "{base_url} cannot be used as a base URL"
            )));
        }
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(request_error)?;
        Ok(Self { client, base })
    }

    /// Returns the base URL requests are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, NetworkError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| NetworkError::Endpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_authorized(
        &self,
        segments: &[&str],
        token: &SessionToken,
    ) -> Result<reqwest::Response, NetworkError> {
        let url = self.endpoint(segments)?;
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, token.as_str())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(path = %segments.join("/"), status = status.as_u16(), "request rejected");
            return Err(NetworkError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn fetch_users(
        &self,
        segments: &[&str],
        token: &SessionToken,
    ) -> Result<PeerSet, NetworkError> {
        let body: UsersResponse = self
            .get_authorized(segments, token)
            .await?
            .json()
            .await
            .map_err(decode_error)?;
        Ok(body.users.into_iter().collect())
    }
}

impl AuthApi for HttpApi {
    async fn login(&self, credentials: &Credentials) -> Result<SessionToken, AuthError> {
        let url = self.endpoint(&["users", "login"])?;
        let response = self
            .client
            .post(url)
            .json(credentials)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(username = %credentials.username, status = status.as_u16(), "login rejected");
            return Err(rejection(status, AuthError::InvalidCredentials));
        }

        let body: LoginResponse = response.json().await.map_err(decode_error)?;
        tracing::info!(username = %credentials.username, "login succeeded");
        Ok(body.user.token)
    }

    async fn register(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let url = self.endpoint(&["users", "register"])?;
        let response = self
            .client
            .post(url)
            .json(credentials)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status != StatusCode::CREATED {
            tracing::warn!(username = %credentials.username, status = status.as_u16(), "registration rejected");
            return Err(rejection(status, AuthError::RegistrationFailed));
        }
        tracing::info!(username = %credentials.username, "registration succeeded");
        Ok(())
    }

    async fn validate_token(&self, token: &SessionToken) -> Result<Identity, AuthError> {
        let url = self.endpoint(&["validate-token"])?;
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, token.as_str())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "token validation rejected");
            return Err(rejection(status, AuthError::InvalidToken));
        }

        let body: ValidateTokenResponse = response.json().await.map_err(decode_error)?;
        if body.username.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(body.username)
    }
}

impl DirectoryApi for HttpApi {
    async fn fetch_contacts(&self, token: &SessionToken) -> Result<PeerSet, NetworkError> {
        self.fetch_users(&["friends"], token).await
    }

    async fn fetch_all_users(&self, token: &SessionToken) -> Result<PeerSet, NetworkError> {
        self.fetch_users(&["users"], token).await
    }
}

impl HistoryApi for HttpApi {
    async fn fetch_history(
        &self,
        self_id: &Identity,
        peer: &Identity,
        token: &SessionToken,
    ) -> Result<Vec<Message>, NetworkError> {
        let body: MessagesResponse = self
            .get_authorized(&["messages", self_id.as_str(), peer.as_str()], token)
            .await?
            .json()
            .await
            .map_err(decode_error)?;

        tracing::debug!(peer = %peer, count = body.messages.len(), "history fetched");
        Ok(body
            .messages
            .into_iter()
            .map(|m| Message::from_history(m, self_id, peer))
            .collect())
    }
}

/// Server errors mean the service is down, not that the request was refused.
fn rejection(status: StatusCode, refused: AuthError) -> AuthError {
    if status.is_server_error() {
        AuthError::Network(NetworkError::Status {
            status: status.as_u16(),
        })
    } else {
        refused
    }
}

fn request_error(err: reqwest::Error) -> NetworkError {
    tracing::warn!(err = %err, "request failed");
    NetworkError::Request(err.to_string())
}

fn decode_error(err: reqwest::Error) -> NetworkError {
    tracing::warn!(err = %err, "response body did not decode");
    NetworkError::Decode(err.to_string())
}
