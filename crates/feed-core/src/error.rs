//! Error types for the feed engine.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the feed API.
///
/// Only caller misuse reaches the presentation layer; network and decode
/// failures are logged and degrade to missing data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("feed already started")]
    AlreadyStarted,

    #[error("feed has not been started")]
    NotStarted,

    #[error("feed has been stopped")]
    Stopped,

    #[error("a load is already in progress")]
    LoadInProgress,

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Misuse of a single cursor.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor already has a page in flight")]
    Busy,

    #[error("cursor source is exhausted")]
    Exhausted,
}
