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

//! Real-time channel recovery against an in-process `duochat-server`.
//!
//! The server drops every channel with a chosen close code; the client must
//! come back on its own after any code other than 1000, and stay down after
//! a normal closure.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use duochat::api::http::HttpApi;
use duochat::auth::TokenStore;
use duochat::connection::ws::WsConnector;
use duochat::connection::{ChannelError, ConnectionState, ReconnectPolicy, SendOutcome};
use duochat::conversation::Origin;
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
    state.store.register("alice", "pw").await.unwrap();
    state.store.register("bob", "pw").await.unwrap();
    Backend {
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}/ws"),
        state,
    }
}

fn fast_retry() -> ReconnectPolicy {
    ReconnectPolicy {
        retry_delay: Duration::from_millis(100),
        ..ReconnectPolicy::default()
    }
}

fn client(
    http: &str,
    ws: &str,
    token_path: &Path,
    reconnect: ReconnectPolicy,
) -> (LiveClient, mpsc::Receiver<SessionEvent>) {
    let api = HttpApi::new(http, Duration::from_secs(5), Duration::from_secs(5)).unwrap();
    Client::new(
        api,
        WsConnector::new(ws, 64),
        TokenStore::new(token_path),
        SessionConfig {
            reconnect,
            ..SessionConfig::default()
        },
    )
}

async fn pump_until(client: &mut LiveClient, done: impl Fn(&LiveClient) -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(&*client) {
            client.process_connection_event().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn state_is(state: ConnectionState) -> impl Fn(&LiveClient) -> bool {
    move |client| client.session().is_some_and(|s| s.connection_state() == state)
}

async fn logged_in_alice(backend: &Backend, dir: &Path, reconnect: ReconnectPolicy) -> LiveClient {
    let (mut alice, _events) = client(&backend.http, &backend.ws, &dir.join("token"), reconnect);
    alice.login("alice", "pw").await.unwrap();
    pump_until(&mut alice, state_is(ConnectionState::Connected)).await;
    alice
}

#[tokio::test]
async fn abnormal_close_reconnects() {
    let backend = backend().await;
    let dir = tempfile::tempdir().unwrap();
    let (mut alice, mut events) =
        client(&backend.http, &backend.ws, &dir.path().join("token"), fast_retry());
    alice.login("alice", "pw").await.unwrap();
    pump_until(&mut alice, state_is(ConnectionState::Connected)).await;
    while events.try_recv().is_ok() {}

    backend.state.close_all_connections(1011).await;
    pump_until(&mut alice, state_is(ConnectionState::Disconnected)).await;
    assert!(alice.session().unwrap().retry_pending());

    pump_until(&mut alice, state_is(ConnectionState::Connected)).await;
    assert!(!alice.session().unwrap().retry_pending());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        [
            SessionEvent::ConnectionChanged(ConnectionState::Disconnected),
            SessionEvent::ConnectionChanged(ConnectionState::Connecting),
            SessionEvent::ConnectionChanged(ConnectionState::Connected),
        ]
    );
    assert!(backend.state.is_connected(&Identity::new("alice")).await);
}

#[tokio::test]
async fn default_policy_waits_three_seconds() {
    let backend = backend().await;
    let dir = tempfile::tempdir().unwrap();
    let mut alice = logged_in_alice(&backend, dir.path(), ReconnectPolicy::default()).await;

    backend.state.close_all_connections(4000).await;
    pump_until(&mut alice, state_is(ConnectionState::Disconnected)).await;
    let lost_at = Instant::now();

    pump_until(&mut alice, state_is(ConnectionState::Connecting)).await;
    assert!(lost_at.elapsed() >= Duration::from_millis(2900));
    pump_until(&mut alice, state_is(ConnectionState::Connected)).await;
}

#[tokio::test]
async fn normal_close_from_server_does_not_reconnect() {
    let backend = backend().await;
    let dir = tempfile::tempdir().unwrap();
    let mut alice = logged_in_alice(&backend, dir.path(), fast_retry()).await;

    backend.state.close_all_connections(1000).await;
    pump_until(&mut alice, state_is(ConnectionState::Disconnected)).await;
    assert!(!alice.session().unwrap().retry_pending());

    let quiet = tokio::time::timeout(Duration::from_millis(500), alice.process_connection_event()).await;
    assert!(quiet.is_err(), "no further channel activity expected");
    assert_eq!(
        alice.session().unwrap().connection_state(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn message_sent_while_down_is_delivered_after_reconnect() {
    let backend = backend().await;
    let dir = tempfile::tempdir().unwrap();
    let mut alice = logged_in_alice(&backend, dir.path(), fast_retry()).await;
    alice.select_peer(Identity::new("bob")).await.unwrap();

    backend.state.close_all_connections(1011).await;
    pump_until(&mut alice, state_is(ConnectionState::Disconnected)).await;

    let outcome = alice.send("sent while offline").await;
    assert!(matches!(outcome, SendOutcome::Queued(_)));
    let log = alice.session().unwrap().conversations().active().unwrap().messages();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].origin, Origin::LocalPending);

    pump_until(&mut alice, |c| {
        c.session()
            .and_then(|s| s.conversations().active())
            .is_some_and(|conv| conv.messages()[0].origin == Origin::LocalConfirmed)
    })
    .await;

    let history = backend
        .state
        .store
        .history(&Identity::new("alice"), &Identity::new("bob"))
        .await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "sent while offline");
}

#[tokio::test]
async fn unreachable_channel_gives_up_after_max_attempts() {
    let backend = backend().await;
    let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_ws = format!("ws://{}/ws", dead.local_addr().unwrap());
    drop(dead);

    let dir = tempfile::tempdir().unwrap();
    let policy = ReconnectPolicy {
        retry_delay: Duration::from_millis(50),
        max_attempts: 2,
        ..ReconnectPolicy::default()
    };
    let (mut alice, mut events) = client(&backend.http, &dead_ws, &dir.path().join("token"), policy);
    alice.login("alice", "pw").await.unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            alice.process_connection_event().await;
            while let Ok(event) = events.try_recv() {
                if let SessionEvent::ChannelFailed(err) = event {
                    return err;
                }
            }
        }
    })
    .await
    .expect("never gave up");

    assert_eq!(failure, ChannelError::RetriesExhausted { attempts: 2 });
    let session = alice.session().unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(!session.retry_pending());
}
