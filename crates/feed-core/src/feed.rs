//! Feed orchestration.
//!
//! A [`Feed`] owns the context index and the visible feed collection. It
//! pulls history through a [`MultiCursor`], listens for live events, expands
//! context around everything it sees and decides when a candidate is ready
//! to be appended.
//!
//! All mutation happens in [`Feed::add_context`], [`Feed::add_to_feed`] and
//! the deferral timers. Each of those runs as one critical section on the
//! feed state and first checks whether the feed was stopped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::context::{apply_context, find_notes, ContextIndex};
use crate::cursor::Cursor;
use crate::deferral::{self, DeferralContext, Retry};
use crate::error::FeedError;
use crate::event::{DisplayEvent, Event};
use crate::expander::{
    author_pubkeys, plan_context_fetches, plan_listeners, plan_parent_fetch, ExpandOptions,
};
use crate::filter::Filter;
use crate::hints::HintResolver;
use crate::multi_cursor::MultiCursor;
use crate::network::{EventHandler, Network, PubkeyLoader, Request, Subscription};
use crate::store::{Collection, Merge};

/// What a feed shows and where it looks.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub relays: Vec<String>,
    pub filters: Vec<Filter>,
    pub config: FeedConfig,
}

/// Collaborators injected into a feed.
#[derive(Clone)]
pub struct FeedDeps {
    pub network: Arc<dyn Network>,
    pub hints: Arc<dyn HintResolver>,
    pub pubkeys: Arc<dyn PubkeyLoader>,
}

/// Snapshot of a feed's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    /// Events handed to `add_context`, duplicates included.
    pub received: u64,
    /// Events dropped because they were already seen.
    pub duplicates: u64,
    /// Events held back by the deferral pipeline.
    pub deferred: u64,
    /// Entries added to the visible feed.
    pub appended: u64,
    /// Fetches and subscriptions issued for context.
    pub requests: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    duplicates: AtomicU64,
    deferred: AtomicU64,
    appended: AtomicU64,
    requests: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FeedStats {
        FeedStats {
            received: self.received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            appended: self.appended.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// Leading plus one trailing call per window.
#[derive(Default)]
struct Throttle {
    last: Option<Instant>,
    trailing: bool,
}

#[derive(Default)]
struct State {
    seen: HashSet<String>,
    /// Reactions still waiting on their target, retried on the next load.
    deferred: Vec<Event>,
    live: Option<Subscription>,
    listeners: Vec<Subscription>,
    cursor: Option<MultiCursor>,
    throttle: Throttle,
}

struct Inner {
    relays: Vec<String>,
    filters: Vec<Filter>,
    config: FeedConfig,
    deps: FeedDeps,
    /// Unix seconds at construction; the live subscription starts here.
    since: u64,
    feed: Collection<DisplayEvent>,
    context: ContextIndex,
    state: Mutex<State>,
    started: AtomicBool,
    stopped: AtomicBool,
    loading: tokio::sync::Mutex<()>,
    counters: Counters,
}

/// Aggregates events from many relays into one threaded feed.
///
/// Cloning yields another handle to the same feed.
#[derive(Clone)]
pub struct Feed {
    inner: Arc<Inner>,
}

pub(crate) fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

impl Feed {
    pub fn new(options: FeedOptions, deps: FeedDeps) -> Self {
        let FeedOptions {
            relays,
            filters,
            config,
        } = options;
        Self {
            inner: Arc::new(Inner {
                relays,
                filters,
                config,
                deps,
                since: unix_now(),
                feed: Collection::new(),
                context: ContextIndex::new(),
                state: Mutex::new(State::default()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                loading: tokio::sync::Mutex::new(()),
                counters: Counters::default(),
            }),
        }
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Handler that feeds batches into `add_context` for as long as the
    /// feed is alive.
    fn context_handler(&self, options: ExpandOptions) -> EventHandler {
        let weak = self.downgrade();
        Arc::new(move |events: Vec<Event>| {
            if let Some(feed) = Self::upgrade(&weak) {
                feed.add_context(events, options);
            }
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.is_stopped()
    }

    /// Unix timestamp the live subscription starts from.
    pub fn since(&self) -> u64 {
        self.inner.since
    }

    pub fn filters(&self) -> &[Filter] {
        &self.inner.filters
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    /// The visible feed, in append order.
    pub fn feed(&self) -> Collection<DisplayEvent> {
        self.inner.feed.clone()
    }

    /// Every event observed so far.
    pub fn context(&self) -> ContextIndex {
        self.inner.context.clone()
    }

    pub fn stats(&self) -> FeedStats {
        self.inner.counters.snapshot()
    }

    /// Open the live subscription and prime the cursors.
    pub fn start(&self) -> Result<(), FeedError> {
        if self.is_stopped() {
            return Err(FeedError::Stopped);
        }
        for filter in &self.inner.filters {
            filter.validate()?;
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(FeedError::AlreadyStarted);
        }

        let config = &self.inner.config;
        let live_options = ExpandOptions::new(true, config.live_depth);

        // No point subscribing when every filter has an end date.
        let bounded = self.inner.filters.iter().all(|f| f.until.is_some());
        let live = if bounded {
            None
        } else {
            let filters = self
                .inner
                .filters
                .iter()
                .cloned()
                .map(|f| f.since(self.inner.since))
                .collect();
            let request = Request::new(self.inner.relays.clone(), filters);
            Some(
                self.inner
                    .deps
                    .network
                    .subscribe(request, self.context_handler(live_options)),
            )
        };

        let cursors = self
            .inner
            .relays
            .iter()
            .map(|relay| Cursor::new(relay.as_str(), self.inner.filters.clone()))
            .collect();
        let cursor = MultiCursor::new(
            cursors,
            self.inner.deps.network.clone(),
            self.context_handler(live_options),
            config.fetch_timeout(),
        );

        {
            let mut state = self.inner.state.lock();
            // stop() may have run while the subscription was being opened
            if self.is_stopped() {
                drop(state);
                if let Some(live) = live {
                    live.unsubscribe();
                }
                return Err(FeedError::Stopped);
            }
            state.live = live;
            state.cursor = Some(cursor.clone());
        }

        info!(
            relays = self.inner.relays.len(),
            filters = self.inner.filters.len(),
            since = self.inner.since,
            live = !bounded,
            "feed started"
        );

        cursor.load(config.page_size);
        Ok(())
    }

    /// Cancel every subscription. Later callbacks and timers do nothing.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let (live, listeners) = {
            let mut state = self.inner.state.lock();
            (state.live.take(), std::mem::take(&mut state.listeners))
        };
        if let Some(live) = live {
            live.unsubscribe();
        }
        for sub in &listeners {
            sub.unsubscribe();
        }
        info!(listeners = listeners.len(), "feed stopped");
    }

    /// Take the next page of candidates and append whatever is ready.
    pub async fn load(&self) -> Result<(), FeedError> {
        let _guard = self
            .inner
            .loading
            .try_lock()
            .map_err(|_| FeedError::LoadInProgress)?;

        let cursor = self
            .inner
            .state
            .lock()
            .cursor
            .clone()
            .ok_or(FeedError::NotStarted)?;
        if self.is_stopped() {
            return Ok(());
        }

        let config = &self.inner.config;
        // Wait briefly for a refill so the page is less likely to be out
        // of order.
        if cursor.count() < config.page_size {
            cursor.load(config.page_size);
            tokio::time::sleep(config.load_wait()).await;
        }

        let notes = cursor.take(config.take_size);
        let outcome = {
            let mut state = self.inner.state.lock();
            if self.is_stopped() {
                return Ok(());
            }
            let mut candidates = notes;
            candidates.append(&mut state.deferred);
            let ctx = self.deferral_context(unix_now());
            let outcome = deferral::run_pipeline(candidates, &ctx);
            self.append_locked(outcome.ready.clone());
            outcome
        };

        let held: usize = outcome.retries.iter().map(|r| r.events.len()).sum();
        Counters::add(&self.inner.counters.deferred, held);
        debug!(
            ready = outcome.ready.len(),
            held,
            exhausted = cursor.is_exhausted(),
            "feed page loaded"
        );

        for retry in outcome.retries {
            self.schedule_retry(retry);
        }
        Ok(())
    }

    fn deferral_context(&self, now: u64) -> DeferralContext<'_> {
        DeferralContext {
            index: &self.inner.context,
            filters: &self.inner.filters,
            config: &self.inner.config,
            now,
        }
    }

    fn schedule_retry(&self, retry: Retry) {
        let weak = self.downgrade();
        tokio::spawn(async move {
            tokio::time::sleep(retry.delay).await;
            let Some(feed) = Self::upgrade(&weak) else {
                return;
            };
            let stage = retry.stage;
            let mut state = feed.inner.state.lock();
            if feed.is_stopped() {
                return;
            }
            let resolution = deferral::resolve(retry, &feed.deferral_context(unix_now()));
            debug!(
                ?stage,
                append = resolution.append.len(),
                requeue = resolution.requeue.len(),
                "deferred events resolved"
            );
            state.deferred.extend(resolution.requeue);
            feed.append_locked(resolution.append);
        });
    }

    /// Fold a batch into the context index and the visible feed, then
    /// fetch whatever context it is missing.
    pub fn add_context(&self, events: Vec<Event>, options: ExpandOptions) {
        if self.is_stopped() {
            return;
        }
        let total = events.len();
        Counters::add(&self.inner.counters.received, total);

        let (fresh, parents) = {
            let mut state = self.inner.state.lock();
            if self.is_stopped() {
                return;
            }
            let fresh: Vec<Event> = events
                .into_iter()
                .filter(|e| state.seen.insert(e.id.clone()))
                .collect();
            if fresh.is_empty() {
                Counters::add(&self.inner.counters.duplicates, total);
                return;
            }

            let filters = &self.inner.filters;
            self.inner
                .feed
                .update(|items| apply_context(items, &fresh, false, filters));
            self.inner.context.extend_absent(fresh.iter().cloned());

            let parents = if options.should_load_parents {
                plan_parent_fetch(
                    &fresh,
                    &state.seen,
                    self.inner.deps.hints.as_ref(),
                    &self.inner.config,
                    &self.inner.relays,
                )
            } else {
                None
            };
            (fresh, parents)
        };

        Counters::add(&self.inner.counters.duplicates, total - fresh.len());
        debug!(
            fresh = fresh.len(),
            duplicates = total - fresh.len(),
            depth = options.depth,
            "context batch applied"
        );

        let pubkeys = author_pubkeys(&fresh);
        if !pubkeys.is_empty() {
            self.inner.deps.pubkeys.load_pubkeys(pubkeys);
        }

        let config = &self.inner.config;
        if let Some(request) = parents {
            self.fetch(request, ExpandOptions::new(false, config.parent_depth));
        }

        if options.depth > 0 {
            let deeper = ExpandOptions::new(false, options.depth - 1);
            for request in plan_context_fetches(
                &fresh,
                options.depth,
                self.inner.deps.hints.as_ref(),
                config,
                &self.inner.relays,
            ) {
                self.fetch(request, deeper);
            }
        }

        self.listen_for_context();
    }

    /// One-shot fetch whose results re-enter `add_context`.
    fn fetch(&self, request: Request, options: ExpandOptions) {
        Counters::add(&self.inner.counters.requests, 1);
        let weak = self.downgrade();
        let network = self.inner.deps.network.clone();
        let timeout = self.inner.config.fetch_timeout();
        tokio::spawn(async move {
            let relays = request.relays.len();
            let events = match tokio::time::timeout(timeout, network.load(request)).await {
                Ok(Ok(events)) => events,
                Ok(Err(e)) => {
                    warn!(relays, "context fetch failed: {e}");
                    return;
                }
                Err(_) => {
                    warn!(relays, "context fetch failed: {}", FeedError::Timeout(timeout));
                    return;
                }
            };
            if let Some(feed) = Self::upgrade(&weak) {
                if !events.is_empty() {
                    feed.add_context(events, options);
                }
            }
        });
    }

    /// Rebuild the live context subscriptions, at most once per throttle
    /// window with one trailing rebuild.
    fn listen_for_context(&self) {
        if self.is_stopped() {
            return;
        }
        let window = self.inner.config.listen_throttle();
        let now = Instant::now();
        let wait = {
            let mut state = self.inner.state.lock();
            match state.throttle.last {
                Some(last) if now.duration_since(last) < window => {
                    if state.throttle.trailing {
                        return;
                    }
                    state.throttle.trailing = true;
                    Some(window - now.duration_since(last))
                }
                _ => {
                    state.throttle.last = Some(now);
                    None
                }
            }
        };

        match wait {
            None => self.refresh_listeners(),
            Some(wait) => {
                let weak = self.downgrade();
                tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    if let Some(feed) = Self::upgrade(&weak) {
                        {
                            let mut state = feed.inner.state.lock();
                            state.throttle.trailing = false;
                            state.throttle.last = Some(Instant::now());
                        }
                        feed.refresh_listeners();
                    }
                });
            }
        }
    }

    fn refresh_listeners(&self) {
        if self.is_stopped() {
            return;
        }
        let notes = find_notes(&self.inner.feed.get(), &self.inner.context.get());
        let requests = plan_listeners(
            &notes,
            unix_now(),
            self.inner.deps.hints.as_ref(),
            &self.inner.config,
            &self.inner.relays,
        );

        let options = ExpandOptions::new(false, self.inner.config.listen_depth);
        let subs: Vec<Subscription> = requests
            .into_iter()
            .map(|request| {
                self.inner
                    .deps
                    .network
                    .subscribe(request, self.context_handler(options))
            })
            .collect();
        Counters::add(&self.inner.counters.requests, subs.len());

        let previous = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut state.listeners, subs)
        };
        for sub in &previous {
            sub.unsubscribe();
        }

        // `stop` may have run while subscribing.
        if self.is_stopped() {
            let current = std::mem::take(&mut self.inner.state.lock().listeners);
            for sub in &current {
                sub.unsubscribe();
            }
            return;
        }
        debug!(notes = notes.len(), "context listeners rebuilt");
    }

    /// Append `notes` to the visible feed, newest first.
    pub fn add_to_feed(&self, notes: Vec<Event>) {
        let _state = self.inner.state.lock();
        if self.is_stopped() {
            return;
        }
        self.append_locked(notes);
    }

    /// Caller holds the state lock.
    fn append_locked(&self, notes: Vec<Event>) {
        if notes.is_empty() || self.is_stopped() {
            return;
        }
        let context = self.inner.context.get();
        let mut applied = apply_context(
            notes.into_iter().map(DisplayEvent::new).collect(),
            &context,
            true,
            &self.inner.filters,
        );
        applied.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        let mut appended = 0;
        self.inner.feed.update(|mut items| {
            let mut positions: HashMap<String, usize> = items
                .iter()
                .enumerate()
                .map(|(i, item)| (item.id().to_string(), i))
                .collect();
            for entry in applied {
                match positions.get(entry.id()) {
                    Some(&i) => items[i].merge(entry),
                    None => {
                        positions.insert(entry.id().to_string(), items.len());
                        items.push(entry);
                        appended += 1;
                    }
                }
            }
            items
        });
        Counters::add(&self.inner.counters.appended, appended);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(live) = state.live.take() {
            live.unsubscribe();
        }
        for sub in state.listeners.drain(..) {
            sub.unsubscribe();
        }
    }
}
