//! Tag lookups for relationship and mention extraction.
//!
//! Relays relay whatever authors sign, so every accessor here tolerates
//! short, empty or otherwise malformed tags by skipping them.

/// Borrowed view over an event's tag list.
#[derive(Debug, Clone, Copy)]
pub struct Tags<'a> {
    tags: &'a [Vec<String>],
}

impl<'a> Tags<'a> {
    pub fn new(tags: &'a [Vec<String>]) -> Self {
        Self { tags }
    }

    /// All well-formed tags with the given name.
    pub fn named(&self, name: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        self.tags
            .iter()
            .map(|t| t.as_slice())
            .filter(move |t| t.first().map(|v| v.as_str()) == Some(name))
            .filter(|t| t.get(1).is_some_and(|v| !v.is_empty()))
    }

    /// Values (second element) of every tag with the given name.
    pub fn values(&self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.named(name).map(|t| t[1].as_str())
    }

    /// Pubkeys from `p` tags.
    pub fn pubkeys(&self) -> Vec<&'a str> {
        self.values("p").filter(|v| is_hex64(v)).collect()
    }

    /// Hashtags from `t` tags, lower-cased.
    pub fn topics(&self) -> Vec<String> {
        self.values("t")
            .map(|v| v.trim_start_matches('#').trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// Relay URLs suggested by `e` tags.
    pub fn relay_hints(&self) -> Vec<&'a str> {
        self.named("e")
            .filter_map(|t| t.get(2))
            .map(|v| v.as_str())
            .filter(|v| v.starts_with("wss://") || v.starts_with("ws://"))
            .collect()
    }

    /// Thread root, if the event declares one.
    pub fn root_id(&self) -> Option<&'a str> {
        self.marked("root")
            .or_else(|| self.named("e").next().map(|t| t[1].as_str()))
    }

    /// The event this one responds to (NIP-10).
    ///
    /// Prefers the `reply` marker, then `root`; for legacy positional tags
    /// the last `e` tag wins.
    pub fn parent_id(&self) -> Option<&'a str> {
        if let Some(id) = self.marked("reply") {
            return Some(id);
        }
        if let Some(id) = self.marked("root") {
            return Some(id);
        }
        self.named("e")
            .filter(|t| t.get(3).map_or(true, |m| m.is_empty()))
            .last()
            .map(|t| t[1].as_str())
    }

    fn marked(&self, marker: &str) -> Option<&'a str> {
        self.named("e")
            .find(|t| t.get(3).map(|m| m.as_str()) == Some(marker))
            .map(|t| t[1].as_str())
    }
}

fn is_hex64(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
