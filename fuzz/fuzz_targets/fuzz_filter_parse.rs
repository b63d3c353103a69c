#![no_main]
use feed_core::{Event, Filter};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(filter) = serde_json::from_slice::<Filter>(data) {
        let _ = filter.validate();
        let _ = filter.to_sdk();
    }
    if let Ok(event) = serde_json::from_slice::<Event>(data) {
        let _ = event.parent_id();
        let _ = event.tags().relay_hints();
        let _ = event.tags().topics();
    }
});
