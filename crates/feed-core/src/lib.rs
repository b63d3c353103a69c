//! Multi-relay feed aggregation for Snowfeed
//!
//! This crate pages history from many untrusted relays, merges it into one
//! newest-first feed, and threads replies, reactions and zaps around every
//! visible note. Relay I/O and author metadata sit behind small traits so
//! the engine runs against `nostr-sdk` in production and in-memory mocks
//! in tests.

pub mod config;
pub mod context;
pub mod cursor;
pub mod deferral;
pub mod error;
pub mod event;
pub mod expander;
pub mod feed;
pub mod filter;
pub mod hints;
pub mod multi_cursor;
pub mod network;
pub mod profiles;
pub mod relay;
pub mod store;
pub mod tags;

// Re-export commonly used types
pub use config::FeedConfig;
pub use context::{apply_context, find_notes, ContextIndex};
pub use cursor::Cursor;
pub use error::{CursorError, FeedError};
pub use event::{DisplayEvent, Event};
pub use expander::ExpandOptions;
pub use feed::{Feed, FeedDeps, FeedOptions, FeedStats};
pub use filter::Filter;
pub use hints::{HintResolver, TagHints};
pub use multi_cursor::MultiCursor;
pub use network::{EventHandler, Network, NoopPubkeyLoader, PubkeyLoader, Request, Subscription};
pub use profiles::{Profile, ProfileCache, ProfileLoader};
pub use relay::RelayNetwork;
pub use store::{Collection, Entry, Keyed, Merge};
pub use tags::Tags;

// Re-export nostr-sdk for convenience
pub use nostr_sdk;
