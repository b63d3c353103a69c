//! Author metadata (kind 0) cache and background loader.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::{Event, METADATA};
use crate::filter::Filter;
use crate::network::{Network, PubkeyLoader, Request};

const DEFAULT_CACHE_SIZE: usize = 1000;
const PROFILE_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
}

impl Profile {
    /// `display_name`, then `name`, ignoring blank values.
    pub fn best_name(&self) -> Option<&str> {
        [&self.display_name, &self.name]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone)]
struct CachedProfile {
    profile: Profile,
    created_at: u64,
    expires_at: DateTime<Utc>,
}

/// LRU of parsed profiles keyed by hex pubkey. Entries expire after a TTL
/// and are evicted lazily on access.
#[derive(Debug)]
pub struct ProfileCache {
    cache: Mutex<LruCache<String, CachedProfile>>,
    ttl: Duration,
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::hours(PROFILE_TTL_HOURS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn get(&self, pubkey: &str) -> Option<Profile> {
        let mut cache = self.cache.lock();
        match cache.get(pubkey) {
            Some(cached) if Utc::now() < cached.expires_at => Some(cached.profile.clone()),
            Some(_) => {
                cache.pop(pubkey);
                None
            }
            None => None,
        }
    }

    pub fn has(&self, pubkey: &str) -> bool {
        self.cache
            .lock()
            .peek(pubkey)
            .is_some_and(|cached| Utc::now() < cached.expires_at)
    }

    /// Cache the profile carried by a kind 0 event. Older metadata never
    /// replaces newer. Returns whether the cache changed.
    pub fn store(&self, event: &Event) -> bool {
        if event.kind != METADATA {
            return false;
        }
        let profile: Profile = match serde_json::from_str(&event.content) {
            Ok(p) => p,
            Err(e) => {
                warn!(pubkey = %event.pubkey, "skipping malformed profile: {e}");
                return false;
            }
        };

        let mut cache = self.cache.lock();
        if cache
            .peek(&event.pubkey)
            .is_some_and(|cached| cached.created_at > event.created_at)
        {
            return false;
        }
        cache.put(
            event.pubkey.clone(),
            CachedProfile {
                profile,
                created_at: event.created_at,
                expires_at: Utc::now() + self.ttl,
            },
        );
        true
    }

    /// Name to show for `pubkey`, falling back to a shortened key.
    pub fn display_name(&self, pubkey: &str) -> String {
        self.get(pubkey)
            .and_then(|p| p.best_name().map(str::to_string))
            .unwrap_or_else(|| format!("{}…", pubkey.chars().take(8).collect::<String>()))
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetches metadata for authors the cache does not hold yet.
pub struct ProfileLoader {
    network: Arc<dyn Network>,
    cache: Arc<ProfileCache>,
    relays: Vec<String>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl ProfileLoader {
    pub fn new(network: Arc<dyn Network>, cache: Arc<ProfileCache>, relays: Vec<String>) -> Self {
        Self {
            network,
            cache,
            relays,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn cache(&self) -> &Arc<ProfileCache> {
        &self.cache
    }
}

impl PubkeyLoader for ProfileLoader {
    fn load_pubkeys(&self, pubkeys: Vec<String>) {
        let missing: Vec<String> = {
            let mut pending = self.pending.lock();
            pubkeys
                .into_iter()
                .filter(|pk| !self.cache.has(pk) && pending.insert(pk.clone()))
                .collect()
        };
        if missing.is_empty() {
            return;
        }

        let request = Request::new(
            self.relays.clone(),
            vec![Filter::new().kinds([METADATA]).authors(missing.clone())],
        );
        let network = self.network.clone();
        let cache = self.cache.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            match network.load(request).await {
                Ok(events) => {
                    let mut newest: HashMap<&str, &Event> = HashMap::new();
                    for event in &events {
                        let slot = newest.entry(event.pubkey.as_str()).or_insert(event);
                        if event.created_at > slot.created_at {
                            *slot = event;
                        }
                    }
                    let stored = newest.values().filter(|e| cache.store(e)).count();
                    debug!(requested = missing.len(), stored, "profiles loaded");
                }
                Err(e) => warn!(requested = missing.len(), "profile fetch failed: {e}"),
            }
            let mut pending = pending.lock();
            for pk in &missing {
                pending.remove(pk);
            }
        });
    }
}
