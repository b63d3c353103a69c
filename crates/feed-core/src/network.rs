//! Seams to the outside world: relay I/O and author metadata.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::FeedError;
use crate::event::Event;
use crate::filter::Filter;

/// Callback receiving batches of events from a request.
pub type EventHandler = Arc<dyn Fn(Vec<Event>) + Send + Sync>;

/// Which relays to ask, and what to ask them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub relays: Vec<String>,
    pub filters: Vec<Filter>,
}

impl Request {
    pub fn new(relays: Vec<String>, filters: Vec<Filter>) -> Self {
        Self { relays, filters }
    }
}

/// Handle to a live subscription.
#[derive(Clone)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A subscription that was never opened.
    pub fn noop() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self { token }
    }

    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token an adapter waits on to learn about cancellation.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Relay access used by the feed.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// One-shot fetch. Resolves once every relay answered or timed out.
    async fn load(&self, request: Request) -> Result<Vec<Event>, FeedError>;

    /// Open a push subscription. `on_event` may be called any number of
    /// times until the returned handle is unsubscribed.
    fn subscribe(&self, request: Request, on_event: EventHandler) -> Subscription;
}

/// Resolves author metadata in the background.
pub trait PubkeyLoader: Send + Sync + 'static {
    fn load_pubkeys(&self, pubkeys: Vec<String>);
}

/// Loader that ignores every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPubkeyLoader;

impl PubkeyLoader for NoopPubkeyLoader {
    fn load_pubkeys(&self, _pubkeys: Vec<String>) {}
}
