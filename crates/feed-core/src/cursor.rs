//! Pagination state against a single relay.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::error::CursorError;
use crate::event::Event;
use crate::filter::Filter;
use crate::network::Request;

/// Pages backwards through one relay.
///
/// The cursor itself does no I/O: `request` produces the next page request
/// and `receive`/`fail` record its outcome. The owner must not ask for a
/// new page while one is in flight.
#[derive(Debug)]
pub struct Cursor {
    relay: String,
    filters: Vec<Filter>,
    /// Everything newer than this has been paged already.
    watermark: Option<u64>,
    exhausted: bool,
    loading: bool,
    /// Received but not yet taken, newest first.
    buffer: VecDeque<Event>,
    received: HashSet<String>,
}

impl Cursor {
    pub fn new(relay: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            relay: relay.into(),
            filters,
            watermark: None,
            exhausted: false,
            loading: false,
            buffer: VecDeque::new(),
            received: HashSet::new(),
        }
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Build the request for the next `n` older events and mark the cursor busy.
    pub fn request(&mut self, n: usize) -> Result<Request, CursorError> {
        if self.exhausted {
            return Err(CursorError::Exhausted);
        }
        if self.loading {
            return Err(CursorError::Busy);
        }
        self.loading = true;

        let filters = self
            .filters
            .iter()
            .map(|f| {
                let mut f = f.clone();
                f.until = match (f.until, self.watermark) {
                    (Some(u), Some(w)) => Some(u.min(w)),
                    (u, w) => u.or(w),
                };
                f.limit = Some(n);
                f
            })
            .collect();

        Ok(Request::new(vec![self.relay.clone()], filters))
    }

    /// Record a page of up to `n` events. Returns the events this cursor
    /// had not delivered before.
    ///
    /// `until` is inclusive, so a full page made only of events already
    /// seen means more than `n` events share the watermark second. The
    /// watermark then steps one second back instead of exhausting; events
    /// in that second beyond the first `n` are not paged.
    pub fn receive(&mut self, n: usize, events: Vec<Event>) -> Vec<Event> {
        self.loading = false;
        let returned = events.len();
        let page_oldest = events.iter().map(|e| e.created_at).min();
        let page_newest = events.iter().map(|e| e.created_at).max();

        let fresh: Vec<Event> = events
            .into_iter()
            .filter(|e| self.received.insert(e.id.clone()))
            .collect();

        if let Some(oldest) = fresh.iter().map(|e| e.created_at).min() {
            self.watermark = Some(self.watermark.map_or(oldest, |w| w.min(oldest)));
        }

        // Only a page pinned to the watermark second counts; a relay that
        // ignores `until` must still run dry.
        let crowded = fresh.is_empty()
            && returned >= n
            && n > 0
            && page_oldest == self.watermark
            && page_newest == self.watermark;
        match self.watermark {
            Some(w) if crowded && w > 0 => self.watermark = Some(w - 1),
            // A short page, or a page with nothing new, means the relay has
            // no older data to give.
            _ if returned < n || fresh.is_empty() => self.exhausted = true,
            _ => {}
        }

        self.buffer.extend(fresh.iter().cloned());
        self.buffer
            .make_contiguous()
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));

        debug!(
            relay = %self.relay,
            returned,
            fresh = fresh.len(),
            watermark = ?self.watermark,
            exhausted = self.exhausted,
            "cursor page received"
        );
        fresh
    }

    /// A failed source contributes nothing further.
    pub fn fail(&mut self) {
        self.loading = false;
        self.exhausted = true;
    }

    pub fn peek_newest(&self) -> Option<&Event> {
        self.buffer.front()
    }

    pub fn take_newest(&mut self) -> Option<Event> {
        self.buffer.pop_front()
    }

    pub(crate) fn buffered_ids(&self) -> impl Iterator<Item = &str> {
        self.buffer.iter().map(|e| e.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_support::*;

    fn cursor() -> Cursor {
        Cursor::new("wss://r1.example", vec![Filter::new().kinds([1])])
    }

    #[test]
    fn first_request_has_no_until() {
        let mut c = cursor();
        let req = c.request(20).unwrap();
        assert_eq!(req.relays, vec!["wss://r1.example".to_string()]);
        assert_eq!(req.filters[0].until, None);
        assert_eq!(req.filters[0].limit, Some(20));
        assert!(c.is_loading());
    }

    #[test]
    fn request_while_loading_is_busy() {
        let mut c = cursor();
        c.request(2).unwrap();
        assert_eq!(c.request(2), Err(CursorError::Busy));
    }

    #[test]
    fn watermark_advances_to_oldest() {
        let mut c = cursor();
        c.request(2).unwrap();
        c.receive(2, vec![note("a", 100), note("b", 90)]);
        assert_eq!(c.watermark(), Some(90));
        assert!(!c.is_exhausted());

        let req = c.request(2).unwrap();
        assert_eq!(req.filters[0].until, Some(90));
    }

    #[test]
    fn filter_until_is_respected() {
        let mut c = Cursor::new("wss://r", vec![Filter::new().until(50)]);
        let req = c.request(2).unwrap();
        assert_eq!(req.filters[0].until, Some(50));
    }

    #[test]
    fn short_page_exhausts() {
        let mut c = cursor();
        c.request(3).unwrap();
        c.receive(3, vec![note("a", 100)]);
        assert!(c.is_exhausted());
        assert_eq!(c.request(3), Err(CursorError::Exhausted));
    }

    #[test]
    fn crowded_second_steps_watermark_back() {
        let mut c = cursor();
        c.request(1).unwrap();
        assert_eq!(c.receive(1, vec![note("a", 100)]).len(), 1);
        c.request(1).unwrap();
        assert!(c.receive(1, vec![note("a", 100)]).is_empty());
        assert!(!c.is_exhausted());
        assert_eq!(c.watermark(), Some(99));

        let req = c.request(1).unwrap();
        assert_eq!(req.filters[0].until, Some(99));
        assert_eq!(c.receive(1, vec![note("b", 95)]).len(), 1);
        assert_eq!(c.buffered(), 2);
    }

    #[test]
    fn stale_full_page_exhausts() {
        let mut c = cursor();
        c.request(2).unwrap();
        c.receive(2, vec![note("a", 100), note("b", 90)]);
        c.request(2).unwrap();
        // relay ignored `until` and resent the newer page
        assert!(c.receive(2, vec![note("a", 100), note("b", 90)]).is_empty());
        assert!(c.is_exhausted());
    }

    #[test]
    fn repeated_short_page_exhausts() {
        let mut c = cursor();
        c.request(2).unwrap();
        c.receive(2, vec![note("a", 100), note("b", 100)]);
        c.request(2).unwrap();
        assert!(c.receive(2, vec![note("b", 100)]).is_empty());
        assert!(c.is_exhausted());
    }

    #[test]
    fn buffer_is_newest_first() {
        let mut c = cursor();
        c.request(3).unwrap();
        c.receive(3, vec![note("b", 90), note("a", 100), note("c", 95)]);
        assert_eq!(c.peek_newest().unwrap().id, "a");
        assert_eq!(c.take_newest().unwrap().id, "a");
        assert_eq!(c.take_newest().unwrap().id, "c");
    }

    #[test]
    fn failure_exhausts() {
        let mut c = cursor();
        c.request(3).unwrap();
        c.fail();
        assert!(!c.is_loading());
        assert!(c.is_exhausted());
    }
}
