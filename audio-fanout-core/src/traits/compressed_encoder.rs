use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::models::audio_models::PcmFormat;
use crate::models::config::CodecKind;

/// Completion signal of an encoder flush: the finished file or the reason
/// it could not be produced.
pub type EncoderCompletion = Receiver<Result<PathBuf, String>>;

/// Boundary to a platform compressed-audio encoder (AAC, Opus, ...).
///
/// The bitstream itself is produced outside the core. One instance backs
/// exactly one `EncoderSink` and is driven from that sink's worker thread.
pub trait CompressedEncoder: Send {
    fn codec(&self) -> CodecKind;

    /// Configure for canonical PCM input.
    fn open(&mut self, format: PcmFormat, bit_rate: Option<u32>) -> Result<(), String>;

    /// `false` while the encoder applies backpressure; frames offered then
    /// are dropped by the sink.
    fn is_ready(&self) -> bool;

    /// Feed interleaved PCM16 tagged with its presentation time.
    fn encode(&mut self, samples: &[i16], presentation_time: Duration) -> Result<(), String>;

    /// Signal end of stream. The returned channel yields once the encoder
    /// has flushed asynchronously.
    fn finish(&mut self) -> EncoderCompletion;

    /// Abandon the stream and remove any partial output.
    fn abort(&mut self) {}
}
