//! Holds back events that are not yet safe to show.
//!
//! A page of candidates passes three stages in order. Each stage splits off
//! the events it wants to hold and schedules its own re-check; the feed turns
//! each [`Retry`] into a timer.

use std::time::Duration;

use crate::config::FeedConfig;
use crate::context::{missing_parent, ContextIndex};
use crate::event::Event;
use crate::filter::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Reactions and zaps whose target is unknown.
    Reactions,
    /// Text notes whose parent is unknown.
    Orphans,
    /// Events far older than the rest of the backfill.
    Ancient,
}

/// Events held by one stage, to be re-checked after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retry {
    pub stage: Stage,
    pub delay: Duration,
    pub events: Vec<Event>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub ready: Vec<Event>,
    pub retries: Vec<Retry>,
}

/// What a retry decided once its timer fired.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Append to the feed now.
    pub append: Vec<Event>,
    /// Hand back to the deferred queue for the next load.
    pub requeue: Vec<Event>,
}

/// Read-only view the stages decide against.
pub struct DeferralContext<'a> {
    pub index: &'a ContextIndex,
    pub filters: &'a [Filter],
    pub config: &'a FeedConfig,
    /// Unix seconds.
    pub now: u64,
}

impl DeferralContext<'_> {
    fn orphaned(&self, event: &Event) -> bool {
        missing_parent(event, self.index, self.filters)
    }

    fn stale_before(&self) -> u64 {
        self.now.saturating_sub(self.config.ancient_threshold_secs)
    }
}

/// Returns `(ready, held)`.
pub fn defer_reactions(events: Vec<Event>, ctx: &DeferralContext<'_>) -> (Vec<Event>, Vec<Event>) {
    let (held, ready) = events
        .into_iter()
        .partition(|e| !e.is_text_note() && ctx.orphaned(e));
    (ready, held)
}

/// Returns `(ready, held)`.
pub fn defer_orphans(events: Vec<Event>, ctx: &DeferralContext<'_>) -> (Vec<Event>, Vec<Event>) {
    let (held, ready) = events
        .into_iter()
        .partition(|e| e.is_text_note() && ctx.orphaned(e));
    (ready, held)
}

/// Returns `(ready, held)`.
pub fn defer_ancient(events: Vec<Event>, ctx: &DeferralContext<'_>) -> (Vec<Event>, Vec<Event>) {
    let cutoff = ctx.stale_before();
    let (held, ready) = events.into_iter().partition(|e| e.created_at < cutoff);
    (ready, held)
}

/// Run every stage in order.
pub fn run_pipeline(events: Vec<Event>, ctx: &DeferralContext<'_>) -> PipelineOutcome {
    let mut retries = Vec::new();
    let mut hold = |stage: Stage, delay: Duration, events: Vec<Event>| {
        if !events.is_empty() {
            retries.push(Retry {
                stage,
                delay,
                events,
            });
        }
    };

    let (ready, held) = defer_reactions(events, ctx);
    hold(Stage::Reactions, ctx.config.orphan_delay(), held);

    let (ready, held) = defer_orphans(ready, ctx);
    hold(Stage::Orphans, ctx.config.orphan_delay(), held);

    let (ready, held) = defer_ancient(ready, ctx);
    hold(Stage::Ancient, ctx.config.ancient_delay(), held);

    PipelineOutcome { ready, retries }
}

/// Decide what happens to a retry's events once its delay elapsed.
///
/// Orphaned reactions keep waiting for their target; orphaned notes and
/// stale events are shown regardless.
pub fn resolve(retry: Retry, ctx: &DeferralContext<'_>) -> Resolution {
    match retry.stage {
        Stage::Reactions => {
            let (requeue, append) = retry.events.into_iter().partition(|e| ctx.orphaned(e));
            Resolution { append, requeue }
        }
        Stage::Orphans | Stage::Ancient => Resolution {
            append: retry.events,
            requeue: Vec::new(),
        },
    }
}
