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

//! Live delivery, echo confirmation, unread buffering and history seeding
//! between several clients sharing one in-process `duochat-server`.

use std::sync::Arc;
use std::time::Duration;

use duochat::api::http::HttpApi;
use duochat::auth::TokenStore;
use duochat::connection::ws::WsConnector;
use duochat::connection::{ConnectionState, SendOutcome};
use duochat::conversation::{Origin, Seeded};
use duochat::session::{Client, SessionConfig, SessionEvent};
use duochat_proto::identity::Identity;
use duochat_server::server::{ServerState, start_server_with_state};
use tokio::sync::mpsc;

type LiveClient = Client<HttpApi, WsConnector>;

struct User {
    client: LiveClient,
    events: mpsc::Receiver<SessionEvent>,
    _dir: tempfile::TempDir,
}

struct Backend {
    http: String,
    ws: String,
    state: Arc<ServerState>,
}

async fn backend(users: &[&str]) -> Backend {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    for name in users {
        state.store.register(name, "pw").await.unwrap();
    }
    Backend {
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}/ws"),
        state,
    }
}

async fn online(backend: &Backend, name: &str) -> User {
    let dir = tempfile::tempdir().unwrap();
    let api = HttpApi::new(&backend.http, Duration::from_secs(5), Duration::from_secs(5)).unwrap();
    let (mut client, events) = Client::new(
        api,
        WsConnector::new(backend.ws.clone(), 64),
        TokenStore::new(dir.path().join("token")),
        SessionConfig::default(),
    );
    client.login(name, "pw").await.unwrap();
    pump_until(&mut client, |c| {
        c.session()
            .is_some_and(|s| s.connection_state() == ConnectionState::Connected)
    })
    .await;
    User {
        client,
        events,
        _dir: dir,
    }
}

async fn wait_for_connections(state: &ServerState, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.connection_count().await < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never saw every channel");
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

fn active_log(client: &LiveClient) -> Vec<(String, String, Origin)> {
    client
        .session()
        .and_then(|s| s.conversations().active())
        .map(|conv| {
            conv.messages()
                .iter()
                .map(|m| (m.sender_id.to_string(), m.content.clone(), m.origin))
                .collect()
        })
        .unwrap_or_default()
}

fn unread(client: &LiveClient, peer: &str) -> usize {
    client
        .session()
        .map_or(0, |s| s.conversations().unread(&Identity::new(peer)))
}

fn id(name: &str) -> Identity {
    Identity::new(name)
}

#[tokio::test]
async fn message_reaches_peer_and_confirms_for_sender() {
    let backend = backend(&["alice", "bob"]).await;
    let mut alice = online(&backend, "alice").await;
    let mut bob = online(&backend, "bob").await;
    wait_for_connections(&backend.state, 2).await;

    alice.client.select_peer(id("bob")).await.unwrap();
    bob.client.select_peer(id("alice")).await.unwrap();
    while alice.events.try_recv().is_ok() {}

    let outcome = alice.client.send("hello bob").await;
    assert!(matches!(outcome, SendOutcome::Transmitted(_)));
    assert_eq!(
        active_log(&alice.client),
        [("alice".to_string(), "hello bob".to_string(), Origin::LocalPending)]
    );

    pump_until(&mut bob.client, |c| !active_log(c).is_empty()).await;
    assert_eq!(
        active_log(&bob.client),
        [("alice".to_string(), "hello bob".to_string(), Origin::Remote)]
    );

    pump_until(&mut alice.client, |c| {
        active_log(c).first().is_some_and(|m| m.2 == Origin::LocalConfirmed)
    })
    .await;
    assert_eq!(active_log(&alice.client).len(), 1);

    let mut confirmed = false;
    while let Ok(event) = alice.events.try_recv() {
        if event
            == (SessionEvent::MessageConfirmed {
                peer: id("bob"),
                index: 0,
            })
        {
            confirmed = true;
        }
    }
    assert!(confirmed);
}

#[tokio::test]
async fn message_for_other_peer_is_buffered_as_unread() {
    let backend = backend(&["alice", "bob", "carol"]).await;
    let mut alice = online(&backend, "alice").await;
    let mut carol = online(&backend, "carol").await;
    wait_for_connections(&backend.state, 2).await;

    alice.client.select_peer(id("bob")).await.unwrap();
    carol.client.select_peer(id("alice")).await.unwrap();

    carol.client.send("one").await;
    carol.client.send("two").await;

    pump_until(&mut alice.client, |c| unread(c, "carol") == 2).await;
    assert!(active_log(&alice.client).is_empty());

    let mut badges = Vec::new();
    while let Ok(event) = alice.events.try_recv() {
        if let SessionEvent::UnreadChanged { peer, unread } = event {
            badges.push((peer.to_string(), unread));
        }
    }
    assert!(badges.ends_with(&[("carol".to_string(), 1), ("carol".to_string(), 2)]));
}

#[tokio::test]
async fn selecting_peer_seeds_from_history_and_clears_unread() {
    let backend = backend(&["alice", "bob", "carol"]).await;
    let mut alice = online(&backend, "alice").await;
    let mut carol = online(&backend, "carol").await;
    wait_for_connections(&backend.state, 2).await;

    alice.client.select_peer(id("bob")).await.unwrap();
    carol.client.select_peer(id("alice")).await.unwrap();
    carol.client.send("are you there?").await;
    pump_until(&mut alice.client, |c| unread(c, "carol") == 1).await;

    let seeded = alice.client.select_peer(id("carol")).await.unwrap();
    assert_eq!(seeded, Seeded::History { count: 1 });
    assert_eq!(unread(&alice.client, "carol"), 0);
    assert_eq!(
        active_log(&alice.client),
        [("carol".to_string(), "are you there?".to_string(), Origin::History)]
    );

    alice.client.refresh_directory().await;
    let contacts = alice.client.session().unwrap().directory().contacts().clone();
    assert!(contacts.contains(&id("carol")));
}

#[tokio::test]
async fn switching_back_shows_exactly_the_stored_history() {
    let backend = backend(&["alice", "bob", "carol"]).await;
    let mut alice = online(&backend, "alice").await;
    let mut bob = online(&backend, "bob").await;
    wait_for_connections(&backend.state, 2).await;

    alice.client.select_peer(id("bob")).await.unwrap();
    bob.client.select_peer(id("alice")).await.unwrap();

    alice.client.send("first").await;
    pump_until(&mut bob.client, |c| active_log(c).len() == 1).await;
    bob.client.send("second").await;
    pump_until(&mut alice.client, |c| active_log(c).len() == 2).await;

    alice.client.select_peer(id("carol")).await.unwrap();
    assert!(active_log(&alice.client).is_empty());

    alice.client.select_peer(id("bob")).await.unwrap();
    let stored: Vec<(String, String)> = backend
        .state
        .store
        .history(&id("alice"), &id("bob"))
        .await
        .into_iter()
        .map(|m| (m.sender_id.to_string(), m.content))
        .collect();
    let shown: Vec<(String, String)> = active_log(&alice.client)
        .into_iter()
        .map(|(sender, content, origin)| {
            assert_eq!(origin, Origin::History);
            (sender, content)
        })
        .collect();
    assert_eq!(shown, stored);
    assert_eq!(shown.len(), 2);
}
