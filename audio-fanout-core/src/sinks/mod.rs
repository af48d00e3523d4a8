pub mod container_writer;
pub mod encoder_sink;
pub mod latch;
pub mod live_stream;

use std::sync::atomic::{AtomicU64, Ordering};

/// Count a dropped frame, logging the first drop and every 100th after it.
pub(crate) fn note_drop(counter: &AtomicU64, sink_id: &str, reason: &str) {
    let dropped = counter.fetch_add(1, Ordering::Relaxed) + 1;
    if dropped == 1 || dropped % 100 == 0 {
        log::warn!("{}: dropped frame ({}), {} dropped so far", sink_id, reason, dropped);
    }
}
