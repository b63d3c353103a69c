//! [`Network`] backed by a `nostr_sdk::Client`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::prelude::{Client, RelayPoolNotification, RelayUrl, SubscriptionId};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::event::Event;
use crate::network::{EventHandler, Network, Request, Subscription};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(100);

/// Relay access through a shared nostr-sdk client.
///
/// Relays named in a request are added and connected on first use.
#[derive(Clone)]
pub struct RelayNetwork {
    client: Client,
    timeout: Duration,
    batch_window: Duration,
    known: Arc<Mutex<HashSet<RelayUrl>>>,
}

impl RelayNetwork {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_FETCH_TIMEOUT,
            batch_window: DEFAULT_BATCH_WINDOW,
            known: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Per-request timeout handed to the client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long subscription events are collected before a batch is
    /// delivered.
    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Parse `relays`, connecting any the client does not know yet.
    /// Unparseable or unreachable relays are skipped.
    async fn ensure_relays(&self, relays: &[String]) -> Vec<RelayUrl> {
        let mut urls = Vec::with_capacity(relays.len());
        for relay in relays {
            let url = match RelayUrl::parse(relay) {
                Ok(url) => url,
                Err(e) => {
                    warn!(relay = %relay, "skipping invalid relay url: {e}");
                    continue;
                }
            };
            let fresh = self.known.lock().insert(url.clone());
            if fresh {
                if let Err(e) = self.client.add_relay(url.clone()).await {
                    warn!(relay = %url, "failed to add relay: {e}");
                    self.known.lock().remove(&url);
                    continue;
                }
                if let Err(e) = self.client.connect_relay(url.clone()).await {
                    warn!(relay = %url, "failed to connect relay: {e}");
                }
                debug!(relay = %url, "relay added");
            }
            urls.push(url);
        }
        urls
    }

    async fn run_subscription(
        self,
        request: Request,
        on_event: EventHandler,
        token: CancellationToken,
    ) {
        // Take the receiver before subscribing so no early event is missed.
        let mut notifications = self.client.notifications();
        let urls = self.ensure_relays(&request.relays).await;
        if urls.is_empty() {
            return;
        }

        let mut ids: HashSet<SubscriptionId> = HashSet::new();
        for filter in &request.filters {
            match self
                .client
                .subscribe_to(urls.clone(), filter.to_sdk(), None)
                .await
            {
                Ok(output) => {
                    ids.insert(output.val);
                }
                Err(e) => warn!("subscribe failed: {e}"),
            }
        }
        if ids.is_empty() {
            return;
        }
        debug!(relays = urls.len(), subscriptions = ids.len(), "subscription opened");

        let mut batch = Vec::new();
        let mut flush = tokio::time::interval(self.batch_window);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = flush.tick() => {
                    if !batch.is_empty() {
                        on_event(std::mem::take(&mut batch));
                    }
                }
                notification = notifications.recv() => match notification {
                    Ok(RelayPoolNotification::Event { subscription_id, event, .. }) => {
                        if ids.contains(&subscription_id) {
                            batch.push(Event::from(event.as_ref()));
                        }
                    }
                    Ok(RelayPoolNotification::Shutdown) => {
                        info!("relay pool shut down");
                        break;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!(dropped = n, "notification receiver lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        for id in &ids {
            self.client.unsubscribe(id).await;
        }
        debug!(subscriptions = ids.len(), "subscription closed");
    }
}

#[async_trait]
impl Network for RelayNetwork {
    async fn load(&self, request: Request) -> Result<Vec<Event>, FeedError> {
        let urls = self.ensure_relays(&request.relays).await;
        if urls.is_empty() {
            return Err(FeedError::Network("no usable relays".into()));
        }

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut failure = None;
        for filter in &request.filters {
            match self
                .client
                .fetch_events_from(urls.clone(), filter.to_sdk(), self.timeout)
                .await
            {
                Ok(fetched) => events.extend(
                    fetched
                        .into_iter()
                        .filter(|e| seen.insert(e.id))
                        .map(Event::from),
                ),
                Err(e) => {
                    warn!(relays = urls.len(), "fetch failed: {e}");
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) if events.is_empty() => Err(FeedError::Network(e.to_string())),
            _ => Ok(events),
        }
    }

    fn subscribe(&self, request: Request, on_event: EventHandler) -> Subscription {
        let token = CancellationToken::new();
        let subscription = Subscription::new(token.clone());
        let network = self.clone();
        tokio::spawn(network.run_subscription(request, on_event, token));
        subscription
    }
}
