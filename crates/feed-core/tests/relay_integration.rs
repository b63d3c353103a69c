//! Feed against a real relay.
//!
//! Requires the `nak` binary (available at `/run/current-system/sw/bin/nak`).
//! Run with: `cargo test -p feed-core -- --ignored relay_integration`

use std::sync::Arc;
use std::time::Duration;

use feed_core::nostr_sdk::prelude::*;
use feed_core::{
    Feed, FeedConfig, FeedDeps, FeedOptions, ProfileCache, ProfileLoader, RelayNetwork, TagHints,
};

const NAK_BIN: &str = "/run/current-system/sw/bin/nak";
const RELAY_PORT: u16 = 19848;
const RELAY_URL: &str = "ws://127.0.0.1:19848";

/// Start `nak serve` as a background process, returning the child handle.
fn start_nak_relay() -> std::process::Child {
    std::process::Command::new(NAK_BIN)
        .args(["serve", "--port", &RELAY_PORT.to_string(), "--quiet"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .spawn()
        .expect("Failed to start nak serve, is nak installed?")
}

/// Wait for the relay to accept TCP connections.
async fn wait_for_relay() {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{RELAY_PORT}"))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Relay did not start within 5 seconds");
}

#[tokio::test]
#[ignore] // requires nak binary
async fn relay_integration_threads_replies() {
    let mut nak = start_nak_relay();
    wait_for_relay().await;

    // --- Seed the relay ---
    let author = Keys::generate();
    let publisher = Client::new(author.clone());
    publisher.add_relay(RELAY_URL).await.expect("add relay");
    publisher.connect().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let metadata = EventBuilder::metadata(&Metadata::new().name("alice"));
    publisher
        .send_event_builder(metadata)
        .await
        .expect("publish metadata");
    let root = publisher
        .send_event_builder(EventBuilder::text_note("root note"))
        .await
        .expect("publish root")
        .val;
    let reply = EventBuilder::text_note("first reply").tag(Tag::parse(vec![
        "e".to_string(),
        root.to_hex(),
        RELAY_URL.to_string(),
        "reply".to_string(),
    ])
    .expect("valid e tag"));
    publisher
        .send_event_builder(reply)
        .await
        .expect("publish reply");

    // --- Read it back through the feed ---
    let reader = Client::default();
    let network = Arc::new(RelayNetwork::new(reader.clone()).with_timeout(Duration::from_secs(3)));
    let profiles = Arc::new(ProfileCache::new());
    let loader = ProfileLoader::new(network.clone(), profiles.clone(), vec![RELAY_URL.into()]);

    let feed = Feed::new(
        FeedOptions {
            relays: vec![RELAY_URL.to_string()],
            filters: vec![feed_core::Filter::new()
                .kinds([1])
                .authors([author.public_key().to_hex()])],
            config: FeedConfig::default(),
        },
        FeedDeps {
            network,
            hints: Arc::new(TagHints::default()),
            pubkeys: Arc::new(loader),
        },
    );
    feed.start().expect("start feed");
    tokio::time::sleep(Duration::from_secs(1)).await;
    feed.load().await.expect("load page");
    tokio::time::sleep(Duration::from_secs(4)).await;

    let entries = feed.feed().get();
    let root_entry = entries
        .iter()
        .find(|e| e.id() == root.to_hex())
        .expect("root note in feed");
    assert_eq!(root_entry.replies.len(), 1);
    assert_eq!(root_entry.replies[0].event.content, "first reply");
    assert_eq!(profiles.display_name(&author.public_key().to_hex()), "alice");

    // --- A live reply arrives after start ---
    let late = EventBuilder::text_note("late reply").tag(Tag::parse(vec![
        "e".to_string(),
        root.to_hex(),
        String::new(),
        "reply".to_string(),
    ])
    .expect("valid e tag"));
    publisher
        .send_event_builder(late)
        .await
        .expect("publish late reply");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let root_entry = feed
        .feed()
        .key(&root.to_hex())
        .get()
        .expect("root still in feed");
    assert_eq!(root_entry.replies.len(), 2);
    assert!(root_entry
        .replies
        .iter()
        .any(|r| r.event.content == "late reply"));

    // --- Cleanup ---
    feed.stop();
    publisher.disconnect().await;
    reader.disconnect().await;
    nak.kill().expect("Failed to kill nak");
    let _ = nak.wait();
}
