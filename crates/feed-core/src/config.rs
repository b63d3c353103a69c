//! Tunables for a feed instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::{REACTION, TEXT_NOTE, ZAP_RECEIPT};

/// Feed configuration. Every field has a default, so an empty TOML table
/// yields the stock behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Target number of buffered events before a page is taken.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Events taken from the cursors per `load()`.
    #[serde(default = "default_take_size")]
    pub take_size: usize,
    /// How long `load()` waits for a cursor refill.
    #[serde(default = "default_load_wait_ms")]
    pub load_wait_ms: u64,
    /// Context depth for live and backfilled events.
    #[serde(default = "default_live_depth")]
    pub live_depth: u8,
    /// Context depth for targeted parent fetches.
    #[serde(default = "default_parent_depth")]
    pub parent_depth: u8,
    /// Context depth for events from the live context subscription.
    #[serde(default = "default_listen_depth")]
    pub listen_depth: u8,
    /// Relay hints requested per event.
    #[serde(default = "default_hint_limit")]
    pub hint_limit: usize,
    /// Cap on relays in one merged request.
    #[serde(default = "default_relay_limit")]
    pub relay_limit: usize,
    /// Maximum ids per context request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_listen_throttle_ms")]
    pub listen_throttle_ms: u64,
    #[serde(default = "default_orphan_delay_ms")]
    pub orphan_delay_ms: u64,
    #[serde(default = "default_ancient_delay_ms")]
    pub ancient_delay_ms: u64,
    /// Events older than this (relative to now) are parked during backfill.
    #[serde(default = "default_ancient_threshold_secs")]
    pub ancient_threshold_secs: u64,
    /// Fetch zap receipts as context.
    #[serde(default = "default_enable_zaps")]
    pub enable_zaps: bool,
    /// Upper bound on a single cursor page fetch.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            take_size: default_take_size(),
            load_wait_ms: default_load_wait_ms(),
            live_depth: default_live_depth(),
            parent_depth: default_parent_depth(),
            listen_depth: default_listen_depth(),
            hint_limit: default_hint_limit(),
            relay_limit: default_relay_limit(),
            chunk_size: default_chunk_size(),
            listen_throttle_ms: default_listen_throttle_ms(),
            orphan_delay_ms: default_orphan_delay_ms(),
            ancient_delay_ms: default_ancient_delay_ms(),
            ancient_threshold_secs: default_ancient_threshold_secs(),
            enable_zaps: default_enable_zaps(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl FeedConfig {
    /// Kinds fetched as replies/reactions/zaps to a note.
    pub fn reply_kinds(&self) -> Vec<u16> {
        if self.enable_zaps {
            vec![TEXT_NOTE, REACTION, ZAP_RECEIPT]
        } else {
            vec![TEXT_NOTE, REACTION]
        }
    }

    pub fn load_wait(&self) -> Duration {
        Duration::from_millis(self.load_wait_ms)
    }

    pub fn listen_throttle(&self) -> Duration {
        Duration::from_millis(self.listen_throttle_ms)
    }

    pub fn orphan_delay(&self) -> Duration {
        Duration::from_millis(self.orphan_delay_ms)
    }

    pub fn ancient_delay(&self) -> Duration {
        Duration::from_millis(self.ancient_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn default_page_size() -> usize {
    20
}

fn default_take_size() -> usize {
    5
}

fn default_load_wait_ms() -> u64 {
    500
}

fn default_live_depth() -> u8 {
    6
}

fn default_parent_depth() -> u8 {
    2
}

fn default_listen_depth() -> u8 {
    2
}

fn default_hint_limit() -> usize {
    3
}

fn default_relay_limit() -> usize {
    10
}

fn default_chunk_size() -> usize {
    256
}

fn default_listen_throttle_ms() -> u64 {
    5_000
}

fn default_orphan_delay_ms() -> u64 {
    3_000
}

fn default_ancient_delay_ms() -> u64 {
    1_500
}

fn default_ancient_threshold_secs() -> u64 {
    6 * 60 * 60
}

fn default_enable_zaps() -> bool {
    true
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}
