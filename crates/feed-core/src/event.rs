//! Event and display types shared by every stage of the feed.

use serde::{Deserialize, Serialize};

use crate::store::{Keyed, Merge};
use crate::tags::Tags;

/// Profile metadata (kind 0).
pub const METADATA: u16 = 0;
/// Short text note (kind 1).
pub const TEXT_NOTE: u16 = 1;
/// Reaction (kind 7).
pub const REACTION: u16 = 7;
/// Zap receipt (kind 9735).
pub const ZAP_RECEIPT: u16 = 9735;
/// Long-form article (kind 30023).
pub const LONG_FORM: u16 = 30023;

/// Kinds that carry standalone readable content.
pub const NOTE_KINDS: [u16; 2] = [TEXT_NOTE, LONG_FORM];

/// An immutable Nostr event as seen by the feed.
///
/// Ids and pubkeys are kept as lowercase hex so the engine never has to
/// re-validate them; the relay adapter converts from `nostr_sdk::Event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub kind: u16,
    pub created_at: u64,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
}

impl Event {
    pub fn is_text_note(&self) -> bool {
        NOTE_KINDS.contains(&self.kind)
    }

    pub fn is_reaction(&self) -> bool {
        self.kind == REACTION
    }

    pub fn is_zap(&self) -> bool {
        self.kind == ZAP_RECEIPT
    }

    /// Tag accessor view.
    pub fn tags(&self) -> Tags<'_> {
        Tags::new(&self.tags)
    }

    /// Id of the event this one replies to, reacts to or zaps.
    pub fn parent_id(&self) -> Option<&str> {
        self.tags().parent_id()
    }
}

impl From<nostr_sdk::Event> for Event {
    fn from(event: nostr_sdk::Event) -> Self {
        Self::from(&event)
    }
}

impl From<&nostr_sdk::Event> for Event {
    fn from(event: &nostr_sdk::Event) -> Self {
        Self {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            kind: event.kind.as_u16(),
            created_at: event.created_at.as_secs(),
            tags: event.tags.iter().map(|t| t.as_slice().to_vec()).collect(),
            content: event.content.clone(),
        }
    }
}

impl Keyed for Event {
    fn key(&self) -> &str {
        &self.id
    }
}

/// An event decorated with the context the feed has gathered for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayEvent {
    #[serde(flatten)]
    pub event: Event,
    /// Newest first.
    pub replies: Vec<DisplayEvent>,
    pub reactions: Vec<Event>,
    pub zaps: Vec<Event>,
    /// Whether the event satisfies the feed filter on its own, as opposed
    /// to being pulled in only as context.
    pub matches_filter: bool,
}

impl DisplayEvent {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            replies: Vec::new(),
            reactions: Vec::new(),
            zaps: Vec::new(),
            matches_filter: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.event.id
    }

    pub fn created_at(&self) -> u64 {
        self.event.created_at
    }

    /// Total number of replies in the subtree.
    pub fn reply_count(&self) -> usize {
        self.replies.iter().map(|r| 1 + r.reply_count()).sum()
    }
}

impl Keyed for DisplayEvent {
    fn key(&self) -> &str {
        &self.event.id
    }
}

impl Merge for DisplayEvent {
    fn merge(&mut self, other: Self) {
        push_unique(&mut self.reactions, other.reactions);
        push_unique(&mut self.zaps, other.zaps);
        for reply in other.replies {
            match self.replies.iter_mut().find(|r| r.id() == reply.id()) {
                Some(existing) => existing.merge(reply),
                None => self.replies.push(reply),
            }
        }
        self.replies.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        self.matches_filter |= other.matches_filter;
    }
}

fn push_unique(into: &mut Vec<Event>, from: Vec<Event>) {
    for event in from {
        if !into.iter().any(|e| e.id == event.id) {
            into.push(event);
        }
    }
}
