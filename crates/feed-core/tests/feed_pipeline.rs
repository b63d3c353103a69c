//! End-to-end feed behaviour against in-memory relays.
//!
//! Run with: `cargo test -p feed-core --test feed_pipeline`

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use feed_core::{
    apply_context, Cursor, DisplayEvent, Event, ExpandOptions, FeedError, Filter, MultiCursor,
};
use parking_lot::Mutex;

const HOUR: u64 = 3600;

#[tokio::test(start_paused = true)]
async fn duplicate_batches_are_idempotent() {
    let network = MockNetwork::with_events(Vec::new());
    let feed = feed(network, &["wss://r1"], vec![Filter::new()]);
    let t = now();
    feed.add_to_feed(vec![note("1", t)]);

    let batch = vec![reply("2", t + 1, "1"), reaction("3", t + 2, "1")];
    feed.add_context(batch.clone(), ExpandOptions::default());
    let context_once = feed.context().get();
    let feed_once = feed.feed().get();

    feed.add_context(batch, ExpandOptions::default());
    assert_eq!(feed.context().get(), context_once);
    assert_eq!(feed.feed().get(), feed_once);

    let entry = &feed_once[0];
    assert_eq!(entry.replies.len(), 1);
    assert_eq!(entry.reactions.len(), 1);
    assert_eq!(feed.stats().duplicates, 2);
}

#[tokio::test(start_paused = true)]
async fn context_expansion_stops_at_depth() {
    let t = now();
    let network = MockNetwork::with_events(vec![
        reply("r1", t + 1, "root"),
        reply("r2", t + 2, "r1"),
        reply("r3", t + 3, "r2"),
        reply("r4", t + 4, "r3"),
    ]);
    let feed = feed(network.clone(), &["wss://r1"], vec![Filter::new()]);

    feed.add_context(vec![note("root", t)], ExpandOptions::new(false, 2));
    settle().await;

    let context = feed.context();
    assert!(context.key("r1").exists());
    assert!(context.key("r2").exists());
    assert!(!context.key("r3").exists());
    assert_eq!(network.context_loads_for("r2"), 0);
}

#[tokio::test(start_paused = true)]
async fn cyclic_tags_terminate() {
    let t = now();
    // x and y each claim the other as parent
    let x = reply("x", t, "y");
    let y = reply("y", t + 1, "x");
    let network = MockNetwork::with_events(vec![x.clone(), y]);
    let feed = feed(network.clone(), &["wss://r1"], vec![Filter::new()]);

    feed.add_context(vec![x], ExpandOptions::new(true, 6));
    settle().await;

    assert_eq!(feed.context().len(), 2);
    assert!(network.load_count() <= 4, "loads: {}", network.load_count());

    feed.add_to_feed(vec![feed.context().key("y").get().unwrap()]);
    assert_eq!(feed.feed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_events_never_precede_fresh_ones() {
    let t = now();
    let network = MockNetwork::with_events(vec![
        note("fresh-1", t - 10),
        note("fresh-2", t - 20),
        note("ancient", t - 7 * HOUR),
    ]);
    let feed = feed(network, &["wss://r1"], vec![Filter::new().kinds([1])]);
    feed.start().unwrap();
    settle().await;

    feed.load().await.unwrap();
    assert_eq!(ids(&feed), vec!["fresh-1", "fresh-2"]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(ids(&feed), vec!["fresh-1", "fresh-2", "ancient"]);
}

#[tokio::test(start_paused = true)]
async fn orphan_reply_surfaces_after_retry() {
    let t = now();
    let network = MockNetwork::with_events(vec![reply("child", t - 5, "lost")]);
    let feed = feed(network, &["wss://r1"], vec![Filter::new()]);
    feed.start().unwrap();
    settle().await;

    feed.load().await.unwrap();
    assert!(feed.feed().is_empty());

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(ids(&feed), vec!["child"]);
}

#[tokio::test(start_paused = true)]
async fn orphan_reaction_waits_for_parent() {
    let t = now();
    let network = MockNetwork::with_events(vec![reaction("like", t - 5, "target")]);
    let feed = feed(network, &["wss://r1"], vec![Filter::new()]);
    feed.start().unwrap();
    settle().await;

    feed.load().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3100)).await;
    // still orphaned: parked for the next load, not shown
    assert!(feed.feed().is_empty());

    feed.add_context(vec![note("target", t - 60)], ExpandOptions::default());
    feed.load().await.unwrap();

    let entries = feed.feed().get();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id(), "target");
    assert_eq!(entries[0].reactions[0].id, "like");
}

#[tokio::test(start_paused = true)]
async fn slow_relay_does_not_hold_back_page() {
    let t = now();
    let network = MockNetwork::with_events(Vec::new());
    network.relay_events("wss://fast", vec![note("f1", t - 1), note("f2", t - 2)]);
    network.relay_events("wss://slow", vec![note("s1", t)]);
    network.delay("wss://slow", Duration::from_secs(8));

    let feed = feed(network, &["wss://fast", "wss://slow"], vec![Filter::new()]);
    feed.start().unwrap();
    settle().await;

    feed.load().await.unwrap();
    assert_eq!(ids(&feed), vec!["f1", "f2"]);
}

#[tokio::test(start_paused = true)]
async fn stop_halts_mutation() {
    let network = MockNetwork::with_events(Vec::new());
    let feed = feed(network.clone(), &["wss://r1"], vec![Filter::new()]);
    feed.start().unwrap();
    settle().await;

    let handler = network.subscriptions.lock()[0].handler.clone();
    feed.stop();
    assert!(network.subscriptions.lock()[0].subscription.is_closed());

    handler(vec![note("late", now())]);
    feed.add_to_feed(vec![note("late", now())]);
    assert!(feed.context().is_empty());
    assert!(feed.feed().is_empty());

    // stopping again is harmless
    feed.stop();
    assert!(!feed.is_running());
}

#[tokio::test(start_paused = true)]
async fn pending_retry_is_dropped_after_stop() {
    let t = now();
    let network = MockNetwork::with_events(vec![note("ancient", t - 7 * HOUR)]);
    let feed = feed(network, &["wss://r1"], vec![Filter::new().kinds([1])]);
    feed.start().unwrap();
    settle().await;

    feed.load().await.unwrap();
    assert!(feed.feed().is_empty());
    assert_eq!(feed.stats().deferred, 1);

    feed.stop();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(feed.feed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn live_reply_pulls_in_parent() {
    let t = now();
    let network = MockNetwork::with_events(vec![note("parent", t - 100)]);
    let feed = feed(network.clone(), &["wss://r1"], vec![Filter::new().kinds([1])]);
    feed.start().unwrap();
    settle().await;

    network.push_live(vec![reply("kid", t + 5, "parent")]);
    settle().await;

    assert!(feed.context().key("kid").exists());
    assert!(feed.context().key("parent").exists());
}

#[tokio::test(start_paused = true)]
async fn misuse_fails_fast() {
    let network = MockNetwork::with_events((0..3).map(|i| note(&i.to_string(), now() - i)).collect());
    let feed = feed(network, &["wss://r1"], vec![Filter::new()]);

    assert_eq!(feed.load().await, Err(FeedError::NotStarted));
    feed.start().unwrap();
    assert_eq!(feed.start(), Err(FeedError::AlreadyStarted));

    let (a, b) = tokio::join!(feed.load(), feed.load());
    assert!(a.is_ok());
    assert_eq!(b, Err(FeedError::LoadInProgress));
}

#[tokio::test(start_paused = true)]
async fn stopped_feed_cannot_restart() {
    let network = MockNetwork::with_events(vec![note("1", now())]);
    let stopped = feed(network.clone(), &["wss://r1"], vec![Filter::new()]);

    stopped.stop();
    assert_eq!(stopped.start(), Err(FeedError::Stopped));
    settle().await;
    assert!(network.subscriptions.lock().is_empty());
    assert_eq!(network.load_count(), 0);

    let running = feed(network.clone(), &["wss://r1"], vec![Filter::new()]);
    running.start().unwrap();
    settle().await;
    running.stop();
    assert_eq!(running.start(), Err(FeedError::Stopped));
    assert!(network
        .subscriptions
        .lock()
        .iter()
        .all(|s| s.subscription.is_closed()));
}

#[tokio::test(start_paused = true)]
async fn shared_event_from_two_relays_taken_once() {
    let e1 = note("1", 100);
    let network = MockNetwork::with_events(vec![e1.clone()]);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();

    let cursor = MultiCursor::new(
        vec![
            Cursor::new("wss://R1", vec![Filter::new()]),
            Cursor::new("wss://R2", vec![Filter::new()]),
        ],
        network,
        Arc::new(move |events: Vec<Event>| sink.lock().extend(events)),
        Duration::from_secs(10),
    );
    cursor.load(20);
    settle().await;

    assert_eq!(cursor.take(5), vec![e1.clone()]);
    assert!(cursor.take(5).is_empty());
    assert_eq!(received.lock().len(), 2);

    let network = MockNetwork::with_events(Vec::new());
    let feed = feed(network, &["wss://R1", "wss://R2"], vec![Filter::new()]);
    let e2 = reply("2", 90, "1");
    feed.add_context(vec![e2.clone()], ExpandOptions::new(false, 0));

    let out = apply_context(
        vec![DisplayEvent::new(e1)],
        &feed.context().get(),
        false,
        &[Filter::new()],
    );
    assert_eq!(out[0].replies.len(), 1);
    assert_eq!(out[0].replies[0].event, e2);
}
