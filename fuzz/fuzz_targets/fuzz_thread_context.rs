#![no_main]
use feed_core::{apply_context, find_notes, DisplayEvent, Event, Filter};
use libfuzzer_sys::fuzz_target;

// Arbitrary tag graphs, cycles included, must fold without hanging.
fuzz_target!(|data: &[u8]| {
    if let Ok(events) = serde_json::from_slice::<Vec<Event>>(data) {
        let notes: Vec<DisplayEvent> = events.iter().take(4).cloned().map(DisplayEvent::new).collect();
        let folded = apply_context(notes, &events, true, &[Filter::new()]);
        let _ = find_notes(&folded, &events);
    }
});
