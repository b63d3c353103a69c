//! Context graph: which replies, reactions and zaps belong to which note.
//!
//! Everything here is a pure function over a snapshot of events. Parent
//! links come from tags supplied by strangers, so every walk tracks the
//! ids on its current path and refuses to revisit them.

use std::collections::{HashMap, HashSet};

use crate::event::{DisplayEvent, Event};
use crate::filter::{matches_any, Filter};
use crate::store::Collection;

/// Every event the feed has observed, keyed by id. First write wins.
pub type ContextIndex = Collection<Event>;

/// Hops walked when replacing a note with its ancestor.
pub const MAX_PARENT_HOPS: usize = 3;

#[derive(Default)]
struct Grouped<'a> {
    by_id: HashMap<&'a str, &'a Event>,
    replies: HashMap<&'a str, Vec<&'a Event>>,
    reactions: HashMap<&'a str, Vec<&'a Event>>,
    zaps: HashMap<&'a str, Vec<&'a Event>>,
}

impl<'a> Grouped<'a> {
    fn build(events: impl Iterator<Item = &'a Event>) -> Self {
        let mut g = Self::default();
        for event in events {
            if g.by_id.contains_key(event.id.as_str()) {
                continue;
            }
            g.by_id.insert(&event.id, event);

            let Some(parent) = event.parent_id() else {
                continue;
            };
            let bucket = if event.is_zap() {
                &mut g.zaps
            } else if event.is_reaction() {
                &mut g.reactions
            } else {
                &mut g.replies
            };
            bucket.entry(parent).or_default().push(event);
        }
        g
    }
}

struct Annotator<'a> {
    grouped: Grouped<'a>,
    force_show: HashSet<String>,
    filters: &'a [Filter],
}

impl Annotator<'_> {
    fn annotate(&self, note: DisplayEvent, path: &mut HashSet<String>) -> DisplayEvent {
        let DisplayEvent {
            event,
            replies,
            reactions,
            zaps,
            ..
        } = note;
        let id = event.id.clone();
        path.insert(id.clone());

        let zaps = unique(zaps, self.grouped.zaps.get(id.as_str()));
        let reactions = unique(reactions, self.grouped.reactions.get(id.as_str()));

        let mut seen = HashSet::new();
        let mut annotated = Vec::new();
        let new_replies = self
            .grouped
            .replies
            .get(id.as_str())
            .into_iter()
            .flatten()
            .map(|e| DisplayEvent::new((*e).clone()));
        for reply in replies.into_iter().chain(new_replies) {
            if path.contains(reply.id()) || !seen.insert(reply.id().to_string()) {
                continue;
            }
            annotated.push(self.annotate(reply, path));
        }
        annotated.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        path.remove(&id);

        let matches_filter = self.force_show.contains(&id) || matches_any(self.filters, &event);
        DisplayEvent {
            event,
            replies: annotated,
            reactions,
            zaps,
            matches_filter,
        }
    }
}

fn unique(existing: Vec<Event>, extra: Option<&Vec<&Event>>) -> Vec<Event> {
    let mut seen = HashSet::new();
    existing
        .into_iter()
        .chain(extra.into_iter().flatten().map(|e| (*e).clone()))
        .filter(|e| seen.insert(e.id.clone()))
        .collect()
}

/// Fold `context` into `notes`.
///
/// A note is force-shown when it is one of `notes` or the parent of one.
/// With `substitute_parents`, each note is first replaced by its furthest
/// known ancestor (up to [`MAX_PARENT_HOPS`]), so a reply whose thread is
/// already known surfaces as that thread's root.
pub fn apply_context(
    notes: Vec<DisplayEvent>,
    context: &[Event],
    substitute_parents: bool,
    filters: &[Filter],
) -> Vec<DisplayEvent> {
    let mut force_show: HashSet<String> = notes.iter().map(|n| n.id().to_string()).collect();
    force_show.extend(
        notes
            .iter()
            .filter_map(|n| n.event.parent_id())
            .map(str::to_string),
    );

    let note_events: Vec<Event> = notes.iter().map(|n| n.event.clone()).collect();
    let annotator = Annotator {
        grouped: Grouped::build(context.iter().chain(note_events.iter())),
        force_show,
        filters,
    };

    notes
        .into_iter()
        .map(|mut note| {
            if substitute_parents {
                for _ in 0..MAX_PARENT_HOPS {
                    let parent = note
                        .event
                        .parent_id()
                        .and_then(|pid| annotator.grouped.by_id.get(pid));
                    match parent {
                        Some(parent) if parent.id != note.event.id => {
                            note = DisplayEvent::new((*parent).clone());
                        }
                        _ => break,
                    }
                }
            }
            annotator.annotate(note, &mut HashSet::new())
        })
        .collect()
}

/// Text notes visible in `feed` plus every text-note descendant known in
/// `context`, descendants before their ancestors.
pub fn find_notes(feed: &[DisplayEvent], context: &[Event]) -> Vec<Event> {
    let mut children: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in context {
        if let Some(parent) = event.parent_id() {
            children.entry(parent).or_default().push(event);
        }
    }

    fn walk<'a>(
        events: impl Iterator<Item = &'a Event>,
        children: &HashMap<&str, Vec<&'a Event>>,
        visited: &mut HashSet<&'a str>,
        out: &mut Vec<Event>,
    ) {
        for event in events {
            if !event.is_text_note() || !visited.insert(event.id.as_str()) {
                continue;
            }
            if let Some(kids) = children.get(event.id.as_str()) {
                walk(kids.iter().copied(), children, visited, out);
            }
            out.push(event.clone());
        }
    }

    let mut visited = HashSet::new();
    let mut out = Vec::new();
    walk(feed.iter().map(|d| &d.event), &children, &mut visited, &mut out);
    out
}

/// Whether `event` points at a parent the index does not hold yet.
///
/// Only events matching the feed filters count; context pulled in for
/// other reasons never waits on its own parent.
pub fn missing_parent(event: &Event, index: &ContextIndex, filters: &[Filter]) -> bool {
    match event.parent_id() {
        Some(parent) => matches_any(filters, event) && !index.key(parent).exists(),
        None => false,
    }
}
