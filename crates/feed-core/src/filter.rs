//! NIP-01 subscription filters.

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::event::Event;

/// The subset of NIP-01 filter fields the feed understands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(default, rename = "#e", skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    #[serde(default, rename = "#p", skip_serializing_if = "Option::is_none")]
    pub pubkeys: Option<Vec<String>>,
    #[serde(default, rename = "#t", skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn events<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies every constraint of this filter.
    ///
    /// `limit` only shapes relay responses and is ignored here.
    pub fn matches(&self, event: &Event) -> bool {
        fn contains(set: &Option<Vec<String>>, value: &str) -> bool {
            set.as_ref().map_or(true, |s| s.iter().any(|v| v == value))
        }

        fn tag_match(set: &Option<Vec<String>>, event: &Event, name: &str) -> bool {
            match set {
                None => true,
                Some(wanted) => event
                    .tags()
                    .values(name)
                    .any(|v| wanted.iter().any(|w| w == v)),
            }
        }

        contains(&self.ids, &event.id)
            && contains(&self.authors, &event.pubkey)
            && self.kinds.as_ref().map_or(true, |k| k.contains(&event.kind))
            && tag_match(&self.events, event, "e")
            && tag_match(&self.pubkeys, event, "p")
            && tag_match(&self.topics, event, "t")
            && self.since.map_or(true, |s| event.created_at >= s)
            && self.until.map_or(true, |u| event.created_at <= u)
    }

    /// Rejects filters that can never match anything.
    pub fn validate(&self) -> Result<(), FeedError> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(FeedError::InvalidFilter(format!(
                    "since ({since}) is after until ({until})"
                )));
            }
        }
        if self.kinds.as_ref().is_some_and(|k| k.is_empty()) {
            return Err(FeedError::InvalidFilter("empty kinds list".into()));
        }
        Ok(())
    }

    /// Convert to the relay client's filter type. Malformed ids and keys
    /// are dropped rather than failing the whole request.
    pub fn to_sdk(&self) -> nostr_sdk::Filter {
        use nostr_sdk::{EventId, Kind, PublicKey, Timestamp};

        let mut filter = nostr_sdk::Filter::new();
        if let Some(ids) = &self.ids {
            filter = filter.ids(ids.iter().filter_map(|id| EventId::from_hex(id).ok()));
        }
        if let Some(authors) = &self.authors {
            filter = filter.authors(authors.iter().filter_map(|pk| PublicKey::from_hex(pk).ok()));
        }
        if let Some(kinds) = &self.kinds {
            filter = filter.kinds(kinds.iter().map(|k| Kind::from(*k)));
        }
        if let Some(events) = &self.events {
            filter = filter.events(events.iter().filter_map(|id| EventId::from_hex(id).ok()));
        }
        if let Some(pubkeys) = &self.pubkeys {
            filter = filter.pubkeys(pubkeys.iter().filter_map(|pk| PublicKey::from_hex(pk).ok()));
        }
        if let Some(topics) = &self.topics {
            filter = filter.hashtags(topics.iter().cloned());
        }
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since));
        }
        if let Some(until) = self.until {
            filter = filter.until(Timestamp::from(until));
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }
}

/// True when any filter in the set matches.
pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|f| f.matches(event))
}
