//! Request and response bodies for the authentication, directory and
//! history endpoints.

use serde::{Deserialize, Deserializer, Serialize};

use crate::identity::{Identity, SessionToken};

/// Body of `POST /users/login` and `POST /users/register`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Plaintext password, sent over the request/response channel only.
    pub password: String,
}

impl Credentials {
    /// Builds a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Response of `POST /users/login`: `{"user":{"Token":"..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// The logged-in user record.
    pub user: LoginUser,
}

/// User record inside [`LoginResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginUser {
    /// Issued session token.
    #[serde(rename = "Token", alias = "token")]
    pub token: SessionToken,
}

/// Response of `GET /validate-token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateTokenResponse {
    /// Identity the token belongs to.
    pub username: Identity,
}

/// Response of `GET /friends` and `GET /users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersResponse {
    /// Identities in server order. A JSON `null` decodes as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<Identity>,
}

/// Response of `GET /messages/{senderID}/{receiverID}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Prior messages, oldest first. A JSON `null` decodes as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<HistoryMessage>,
}

/// A stored message as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Who wrote the message.
    #[serde(rename = "senderID", alias = "SenderID")]
    pub sender_id: Identity,
    /// Who the message was addressed to. Older backends omit it.
    #[serde(
        rename = "receiverID",
        alias = "ReceipientID",
        alias = "RecipientID",
        alias = "ReceiverID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub receiver_id: Option<Identity>,
    /// Message text.
    #[serde(alias = "Content")]
    pub content: String,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
