//! In-memory relays for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feed_core::event::{REACTION, TEXT_NOTE};
use feed_core::{
    Event, EventHandler, Feed, FeedConfig, FeedDeps, FeedError, FeedOptions, Filter, Network,
    NoopPubkeyLoader, Request, Subscription, TagHints,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub fn now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

pub fn note(id: &str, created_at: u64) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "a".repeat(64),
        kind: TEXT_NOTE,
        created_at,
        tags: Vec::new(),
        content: format!("note {id}"),
    }
}

pub fn reply(id: &str, created_at: u64, parent: &str) -> Event {
    let mut event = note(id, created_at);
    event
        .tags
        .push(vec!["e".into(), parent.into(), "".into(), "reply".into()]);
    event
}

pub fn reaction(id: &str, created_at: u64, parent: &str) -> Event {
    let mut event = reply(id, created_at, parent);
    event.kind = REACTION;
    event.content = "+".into();
    event
}

pub struct OpenSubscription {
    pub request: Request,
    pub handler: EventHandler,
    pub subscription: Subscription,
}

/// Relays that all hold the same events. Per-relay delays and failures
/// simulate slow and dead sources.
#[derive(Default)]
pub struct MockNetwork {
    events: Mutex<Vec<Event>>,
    delays: Mutex<HashMap<String, Duration>>,
    only: Mutex<HashMap<String, Vec<Event>>>,
    pub loads: Mutex<Vec<Request>>,
    pub subscriptions: Mutex<Vec<OpenSubscription>>,
}

impl MockNetwork {
    pub fn with_events(events: Vec<Event>) -> Arc<Self> {
        let network = Self::default();
        *network.events.lock() = events;
        Arc::new(network)
    }

    /// Serve `events` from `relay` instead of the shared set.
    pub fn relay_events(&self, relay: &str, events: Vec<Event>) {
        self.only.lock().insert(relay.to_string(), events);
    }

    pub fn delay(&self, relay: &str, delay: Duration) {
        self.delays.lock().insert(relay.to_string(), delay);
    }

    pub fn publish(&self, event: Event) {
        self.events.lock().push(event);
    }

    /// Deliver `events` to every open subscription with a matching filter.
    pub fn push_live(&self, events: Vec<Event>) {
        let targets: Vec<(EventHandler, Vec<Event>)> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| !s.subscription.is_closed())
            .map(|s| {
                let matched = events
                    .iter()
                    .filter(|e| s.request.filters.iter().any(|f| f.matches(e)))
                    .cloned()
                    .collect::<Vec<_>>();
                (s.handler.clone(), matched)
            })
            .filter(|(_, matched)| !matched.is_empty())
            .collect();
        for (handler, matched) in targets {
            handler(matched);
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().len()
    }

    /// Requests that asked for events tagging one of `ids`.
    pub fn context_loads_for(&self, id: &str) -> usize {
        self.loads
            .lock()
            .iter()
            .filter(|r| {
                r.filters
                    .iter()
                    .any(|f| f.events.as_ref().is_some_and(|e| e.iter().any(|x| x == id)))
            })
            .count()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn load(&self, request: Request) -> Result<Vec<Event>, FeedError> {
        self.loads.lock().push(request.clone());
        let relay = request.relays.first().cloned().unwrap_or_default();
        let delay = self.delays.lock().get(&relay).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let source = match self.only.lock().get(&relay) {
            Some(events) => events.clone(),
            None => self.events.lock().clone(),
        };
        let mut out = Vec::new();
        for filter in &request.filters {
            let mut matched: Vec<Event> = source
                .iter()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            matched.truncate(filter.limit.unwrap_or(usize::MAX));
            out.extend(matched);
        }
        Ok(out)
    }

    fn subscribe(&self, request: Request, on_event: EventHandler) -> Subscription {
        let subscription = Subscription::new(CancellationToken::new());
        self.subscriptions.lock().push(OpenSubscription {
            request,
            handler: on_event,
            subscription: subscription.clone(),
        });
        subscription
    }
}

pub fn feed(network: Arc<MockNetwork>, relays: &[&str], filters: Vec<Filter>) -> Feed {
    Feed::new(
        FeedOptions {
            relays: relays.iter().map(|r| r.to_string()).collect(),
            filters,
            config: FeedConfig::default(),
        },
        FeedDeps {
            network,
            hints: Arc::new(TagHints::default()),
            pubkeys: Arc::new(NoopPubkeyLoader),
        },
    )
}

pub fn ids(feed: &Feed) -> Vec<String> {
    feed.feed().get().into_iter().map(|d| d.event.id).collect()
}

/// Let spawned tasks run without moving the clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
