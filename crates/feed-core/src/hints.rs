//! Relay hint resolution.
//!
//! Routing policy lives outside the engine; the feed only asks for a few
//! candidate relays per event and merges them into one request.

use std::collections::HashSet;

use crate::event::Event;

pub trait HintResolver: Send + Sync + 'static {
    /// Relays likely to hold the parent of `event`.
    fn parent_hints(&self, limit: usize, event: &Event) -> Vec<String>;

    /// Relays likely to hold replies to `event`.
    fn reply_hints(&self, limit: usize, event: &Event) -> Vec<String>;

    /// Flatten per-event hint lists into one relay set of at most `limit`.
    fn merge_hints(&self, limit: usize, groups: Vec<Vec<String>>) -> Vec<String> {
        merge_round_robin(limit, groups)
    }
}

/// Interleave groups so every event gets its top hints in before anyone's
/// second choice.
pub fn merge_round_robin(limit: usize, groups: Vec<Vec<String>>) -> Vec<String> {
    let mut merged = Vec::new();
    let mut seen = HashSet::new();
    let depth = groups.iter().map(Vec::len).max().unwrap_or(0);

    for i in 0..depth {
        for group in &groups {
            if merged.len() >= limit {
                return merged;
            }
            if let Some(url) = group.get(i) {
                if seen.insert(url.clone()) {
                    merged.push(url.clone());
                }
            }
        }
    }
    merged
}

/// Hints taken from the event's own `e` tags, topped up with fallbacks.
#[derive(Debug, Clone, Default)]
pub struct TagHints {
    fallback: Vec<String>,
}

impl TagHints {
    pub fn new(fallback: Vec<String>) -> Self {
        Self { fallback }
    }

    fn collect(&self, limit: usize, tagged: Vec<&str>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for url in tagged
            .into_iter()
            .map(str::to_string)
            .chain(self.fallback.iter().cloned())
        {
            if out.len() >= limit {
                break;
            }
            if !out.contains(&url) {
                out.push(url);
            }
        }
        out
    }
}

impl HintResolver for TagHints {
    fn parent_hints(&self, limit: usize, event: &Event) -> Vec<String> {
        self.collect(limit, event.tags().relay_hints())
    }

    fn reply_hints(&self, limit: usize, _event: &Event) -> Vec<String> {
        self.collect(limit, Vec::new())
    }
}
