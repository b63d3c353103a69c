//! Fair pagination across many relays.
//!
//! Each relay is paged independently and buffered on its own, so a slow or
//! dead relay never holds back events other relays already delivered.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cursor::Cursor;
use crate::error::FeedError;
use crate::event::Event;
use crate::network::{EventHandler, Network};

struct State {
    cursors: Vec<Cursor>,
    /// Ids already handed out by `take`, across every source.
    taken: HashSet<String>,
}

/// Merges a set of cursors behind one pull interface.
#[derive(Clone)]
pub struct MultiCursor {
    state: Arc<Mutex<State>>,
    network: Arc<dyn Network>,
    on_event: EventHandler,
    fetch_timeout: Duration,
}

impl MultiCursor {
    /// `on_event` receives every page as it arrives, before it is taken.
    pub fn new(
        cursors: Vec<Cursor>,
        network: Arc<dyn Network>,
        on_event: EventHandler,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                cursors,
                taken: HashSet::new(),
            })),
            network,
            on_event,
            fetch_timeout,
        }
    }

    /// Unique events buffered and ready without further I/O.
    pub fn count(&self) -> usize {
        let state = self.state.lock();
        let mut ids = HashSet::new();
        for cursor in &state.cursors {
            for id in cursor.buffered_ids() {
                if !state.taken.contains(id) {
                    ids.insert(id);
                }
            }
        }
        ids.len()
    }

    /// Remove up to `n` buffered events, newest first across all sources.
    pub fn take(&self, n: usize) -> Vec<Event> {
        let mut state = self.state.lock();
        let State { cursors, taken } = &mut *state;
        let mut out = Vec::with_capacity(n);

        while out.len() < n {
            let newest = cursors
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.peek_newest().map(|e| (i, e.created_at)))
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));

            let Some((i, _)) = newest else {
                break;
            };
            let Some(event) = cursors[i].take_newest() else {
                break;
            };
            if taken.insert(event.id.clone()) {
                out.push(event);
            }
        }
        out
    }

    /// Ask every idle source holding fewer than `n` buffered events for
    /// another page of `n`.
    pub fn load(&self, n: usize) {
        let requests = {
            let mut state = self.state.lock();
            let mut starved: Vec<usize> = (0..state.cursors.len())
                .filter(|&i| {
                    let c = &state.cursors[i];
                    !c.is_exhausted() && !c.is_loading() && c.buffered() < n
                })
                .collect();
            starved.sort_by_key(|&i| state.cursors[i].buffered());

            starved
                .into_iter()
                .filter_map(|i| state.cursors[i].request(n).ok().map(|req| (i, req)))
                .collect::<Vec<_>>()
        };
        debug!(requested = requests.len(), "multi-cursor load");

        for (i, request) in requests {
            let state = self.state.clone();
            let network = self.network.clone();
            let on_event = self.on_event.clone();
            let timeout = self.fetch_timeout;

            tokio::spawn(async move {
                let result = tokio::time::timeout(timeout, network.load(request)).await;
                let fresh = {
                    let mut state = state.lock();
                    let cursor = &mut state.cursors[i];
                    match result {
                        Ok(Ok(events)) => cursor.receive(n, events),
                        Ok(Err(e)) => {
                            warn!(relay = %cursor.relay(), "cursor fetch failed: {e}");
                            cursor.fail();
                            Vec::new()
                        }
                        Err(_) => {
                            warn!(
                                relay = %cursor.relay(),
                                "cursor fetch failed: {}",
                                FeedError::Timeout(timeout)
                            );
                            cursor.fail();
                            Vec::new()
                        }
                    }
                };
                if !fresh.is_empty() {
                    on_event(fresh);
                }
            });
        }
    }

    /// True once every source has run dry.
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().cursors.iter().all(Cursor::is_exhausted)
    }

    pub fn sources(&self) -> usize {
        self.state.lock().cursors.len()
    }

    pub fn in_flight(&self) -> usize {
        let state = self.state.lock();
        state.cursors.iter().filter(|c| c.is_loading()).count()
    }
}
