//! Decides what extra context a batch of events needs.
//!
//! Planning is pure: given a batch and a snapshot of what the feed has seen,
//! produce the requests to issue. The feed dispatches them and routes the
//! results back through `add_context` with a smaller depth.

use std::collections::HashSet;

use crate::config::FeedConfig;
use crate::event::Event;
use crate::filter::Filter;
use crate::hints::HintResolver;
use crate::network::Request;

/// How far to chase context for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpandOptions {
    pub should_load_parents: bool,
    pub depth: u8,
}

impl ExpandOptions {
    pub fn new(should_load_parents: bool, depth: u8) -> Self {
        Self {
            should_load_parents,
            depth,
        }
    }
}

/// Authors and mentioned pubkeys of the text notes in `events`.
pub fn author_pubkeys(events: &[Event]) -> Vec<String> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| e.is_text_note())
        .flat_map(|e| {
            e.tags()
                .pubkeys()
                .into_iter()
                .map(str::to_string)
                .chain(std::iter::once(e.pubkey.clone()))
                .collect::<Vec<_>>()
        })
        .filter(|pk| seen.insert(pk.clone()))
        .collect()
}

fn relays_for(
    hints: &dyn HintResolver,
    config: &FeedConfig,
    groups: Vec<Vec<String>>,
    fallback: &[String],
) -> Vec<String> {
    let merged = hints.merge_hints(config.relay_limit, groups);
    if merged.is_empty() {
        fallback.iter().take(config.relay_limit).cloned().collect()
    } else {
        merged
    }
}

/// One request for every parent referenced by `events` that has not been
/// seen yet.
pub fn plan_parent_fetch(
    events: &[Event],
    seen: &HashSet<String>,
    hints: &dyn HintResolver,
    config: &FeedConfig,
    fallback: &[String],
) -> Option<Request> {
    let mut ids = Vec::new();
    let mut groups = Vec::new();
    let mut planned = HashSet::new();

    for event in events {
        let Some(parent) = event.parent_id() else {
            continue;
        };
        if seen.contains(parent) || !planned.insert(parent) {
            continue;
        }
        ids.push(parent.to_string());
        groups.push(hints.parent_hints(config.hint_limit, event));
    }

    if ids.is_empty() {
        return None;
    }
    let relays = relays_for(hints, config, groups, fallback);
    Some(Request::new(relays, vec![Filter::new().ids(ids)]))
}

fn reply_requests(
    notes: Vec<&Event>,
    since: Option<u64>,
    hints: &dyn HintResolver,
    config: &FeedConfig,
    fallback: &[String],
) -> Vec<Request> {
    notes
        .chunks(config.chunk_size.max(1))
        .map(|chunk| {
            let groups = chunk
                .iter()
                .map(|e| hints.reply_hints(config.hint_limit, e))
                .collect();
            let mut filter = Filter::new()
                .kinds(config.reply_kinds())
                .events(chunk.iter().map(|e| e.id.clone()));
            filter.since = since;
            Request::new(relays_for(hints, config, groups, fallback), vec![filter])
        })
        .collect()
}

/// Requests for replies, reactions and zaps to the text notes in `events`.
/// Nothing is planned at depth zero.
pub fn plan_context_fetches(
    events: &[Event],
    depth: u8,
    hints: &dyn HintResolver,
    config: &FeedConfig,
    fallback: &[String],
) -> Vec<Request> {
    if depth == 0 {
        return Vec::new();
    }
    let notes: Vec<&Event> = events.iter().filter(|e| e.is_text_note()).collect();
    reply_requests(notes, None, hints, config, fallback)
}

/// Live subscriptions for new context on already-visible notes.
pub fn plan_listeners(
    notes: &[Event],
    since: u64,
    hints: &dyn HintResolver,
    config: &FeedConfig,
    fallback: &[String],
) -> Vec<Request> {
    let notes: Vec<&Event> = notes.iter().filter(|e| e.is_text_note()).collect();
    reply_requests(notes, Some(since), hints, config, fallback)
}
