use std::path::PathBuf;

use crate::models::audio_models::{AudioFrame, PcmFormat};
use crate::models::error::SinkError;

/// One output destination fed by the fan-out.
///
/// Sinks never panic or propagate errors out of `write`: failures are latched
/// and read back through [`Sink::error`]. `write` runs on the capture thread
/// and must hand its work off without blocking on I/O.
pub trait Sink: Send {
    /// Stable identifier used as the key in session results.
    fn id(&self) -> &str;

    /// Open the output for the canonical format.
    fn start(&mut self, format: PcmFormat) -> Result<(), SinkError>;

    /// Consume one converted frame.
    fn write(&mut self, frame: &AudioFrame<'_>);

    /// Drain and finalize. Allowed to block.
    fn stop(&mut self) -> Result<(), SinkError>;

    /// Drop every handle still held. Idempotent.
    fn release(&mut self);

    /// Path of a structurally valid artifact, if one exists.
    fn output_path(&self) -> Option<PathBuf>;

    /// The latched error, if any.
    fn error(&self) -> Option<SinkError>;

    /// Delete the produced artifact so `output_path` returns `None`.
    fn discard(&mut self) -> Result<(), SinkError>;

    fn bytes_written(&self) -> u64 {
        0
    }

    /// Frames skipped because the sink was not ready for them.
    fn frames_dropped(&self) -> u64 {
        0
    }

    fn checksum(&self) -> Option<String> {
        None
    }
}
