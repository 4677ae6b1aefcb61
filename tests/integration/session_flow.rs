// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Login, registration, token restore and logout against an in-process
//! `duochat-server`.
//!
//! Each test starts its own server on `127.0.0.1:0` and drives a real
//! `Client` (reqwest + tokio-tungstenite) with the token persisted in a
//! temporary directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use duochat::api::AuthError;
use duochat::api::http::HttpApi;
use duochat::auth::{RestoreOutcome, TokenStore};
use duochat::connection::ws::WsConnector;
use duochat::connection::ConnectionState;
use duochat::session::{Client, SessionConfig, SessionEvent};
use duochat_proto::identity::Identity;
use duochat_server::server::{ServerState, start_server_with_state};
use tokio::sync::mpsc;

type LiveClient = Client<HttpApi, WsConnector>;

struct Backend {
    http: String,
    ws: String,
    state: Arc<ServerState>,
}

async fn backend() -> Backend {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    Backend {
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}/ws"),
        state,
    }
}

fn client(backend: &Backend, token_path: &Path) -> (LiveClient, mpsc::Receiver<SessionEvent>) {
    let api = HttpApi::new(&backend.http, Duration::from_secs(5), Duration::from_secs(5)).unwrap();
    Client::new(
        api,
        WsConnector::new(backend.ws.clone(), 64),
        TokenStore::new(token_path),
        SessionConfig::default(),
    )
}

/// Drives connection events until `done` holds.
async fn pump_until(client: &mut LiveClient, done: impl Fn(&LiveClient) -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(&*client) {
            client.process_connection_event().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn connected(client: &LiveClient) -> bool {
    client
        .session()
        .is_some_and(|s| s.connection_state() == ConnectionState::Connected)
}

fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn register_logs_in_and_opens_channel() {
    let backend = backend().await;
    backend.state.store.register("bob", "pw").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    let (mut alice, mut events) = client(&backend, &token_path);

    alice.register("alice", "pw").await.unwrap();
    pump_until(&mut alice, connected).await;

    let session = alice.session().unwrap();
    assert_eq!(session.identity(), &Identity::new("alice"));
    assert!(session.directory().all_users().contains(&Identity::new("bob")));
    assert!(!session.directory().all_users().contains(&Identity::new("alice")));
    assert!(session.directory().contacts().is_empty());

    assert!(token_path.exists());
    assert!(backend.state.is_connected(&Identity::new("alice")).await);

    let events = drain(&mut events);
    assert!(events.contains(&SessionEvent::LoggedIn {
        identity: Identity::new("alice")
    }));
    assert!(events.contains(&SessionEvent::ConnectionChanged(ConnectionState::Connected)));
}

#[tokio::test]
async fn duplicate_registration_fails() {
    let backend = backend().await;
    backend.state.store.register("alice", "pw").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let (mut alice, _events) = client(&backend, &dir.path().join("token"));

    let err = alice.register("alice", "pw").await.unwrap_err();
    assert_eq!(err, AuthError::RegistrationFailed);
    assert!(!alice.is_logged_in());
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() {
    let backend = backend().await;
    backend.state.store.register("alice", "pw").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    let (mut alice, mut events) = client(&backend, &token_path);

    let err = alice.login("alice", "wrong").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
    assert!(!alice.is_logged_in());
    assert!(!token_path.exists());
    assert_eq!(
        drain(&mut events),
        [SessionEvent::AuthFailed(AuthError::InvalidCredentials)]
    );
}

#[tokio::test]
async fn restart_restores_session_from_token() {
    let backend = backend().await;
    backend.state.store.register("alice", "pw").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");

    {
        let (mut first, _events) = client(&backend, &token_path);
        first.login("alice", "pw").await.unwrap();
    }

    let (mut second, mut events) = client(&backend, &token_path);
    let outcome = second.restore().await;
    assert!(matches!(
        outcome,
        RestoreOutcome::Valid { ref identity, .. } if identity == &Identity::new("alice")
    ));
    pump_until(&mut second, connected).await;

    let events = drain(&mut events);
    assert_eq!(events[0], SessionEvent::Validating);
    assert!(events.contains(&SessionEvent::LoggedIn {
        identity: Identity::new("alice")
    }));
}

#[tokio::test]
async fn revoked_token_forces_login() {
    let backend = backend().await;
    backend.state.store.register("alice", "pw").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");

    {
        let (mut first, _events) = client(&backend, &token_path);
        first.login("alice", "pw").await.unwrap();
    }
    backend.state.store.revoke_all_tokens().await;

    let (mut second, mut events) = client(&backend, &token_path);
    assert_eq!(second.restore().await, RestoreOutcome::Invalid);
    assert!(!second.is_logged_in());
    assert!(!token_path.exists());
    assert_eq!(
        drain(&mut events),
        [SessionEvent::Validating, SessionEvent::LoginRequired]
    );
}

#[tokio::test]
async fn no_token_asks_for_login() {
    let backend = backend().await;
    let dir = tempfile::tempdir().unwrap();
    let (mut alice, mut events) = client(&backend, &dir.path().join("token"));

    assert_eq!(alice.restore().await, RestoreOutcome::NoToken);
    assert_eq!(
        drain(&mut events),
        [SessionEvent::Validating, SessionEvent::LoginRequired]
    );
}

#[tokio::test]
async fn logout_closes_channel_and_forgets_token() {
    let backend = backend().await;
    backend.state.store.register("alice", "pw").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    let (mut alice, _events) = client(&backend, &token_path);

    alice.login("alice", "pw").await.unwrap();
    pump_until(&mut alice, connected).await;
    assert!(token_path.exists());

    alice.logout().await;
    alice.logout().await;
    assert!(!alice.is_logged_in());
    assert!(!token_path.exists());

    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.state.is_connected(&Identity::new("alice")).await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("server still holds the channel after logout");
}
