//! # audio-fanout-core
//!
//! Platform-agnostic capture fan-out core.
//!
//! One capture source feeds several independent outputs (a WAV container, a
//! compressed encoder, a live byte stream) without letting a failure in one
//! of them affect the others. Platform backends implement [`CaptureSource`]
//! and plug into the generic [`SessionCoordinator`].
//!
//! ## Architecture
//!
//! ```text
//! audio-fanout-core (this crate)
//! ├── traits/       ← CaptureSource, Sink, CompressedEncoder, SessionDelegate, AudioSessionControl
//! ├── models/       ← CaptureError, SinkError, SessionConfig, SessionState, AudioFrame, SessionReport
//! ├── processing/   ← FormatConverter, AmplitudeMeter, WAV header codec
//! ├── sinks/        ← ContainerWriter, EncoderSink, LiveStream
//! ├── storage/      ← ChunkStore (file + memory), ChunkPersister, recovery
//! └── session/      ← OutputFanout, SessionStateMachine, SessionCoordinator
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod sinks;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{
    AmplitudeLevels, AudioFrame, AudioSource, PcmFormat, SampleFormat, SessionDiagnostics,
    SourceBuffer, SourceFormat, SourceSamples,
};
pub use models::config::{CodecKind, InterruptionPolicy, ResumeRetryPolicy, SessionConfig};
pub use models::error::{CaptureError, SinkError};
pub use models::recording_result::{RecordingManifest, SessionReport, SinkOutcome};
pub use models::state::{Interruption, SessionState};
pub use processing::amplitude_meter::AmplitudeMeter;
pub use processing::format_converter::FormatConverter;
pub use session::coordinator::SessionCoordinator;
pub use session::fanout::OutputFanout;
pub use session::state_machine::SessionStateMachine;
pub use sinks::container_writer::ContainerWriter;
pub use sinks::encoder_sink::EncoderSink;
pub use sinks::live_stream::{LiveStream, LiveStreamReceiver};
pub use storage::chunk_persister::ChunkPersister;
pub use storage::chunk_store::{ChunkRecord, ChunkStore, MemoryChunkStore};
pub use storage::file_chunk_store::FileChunkStore;
pub use storage::recovery::{pending_recordings, recover_to_wav, repair_wav_header, RecoveredRecording};
pub use traits::audio_session::{AudioSessionControl, AudioSessionLease};
pub use traits::capture_source::{CaptureCallback, CaptureSource};
pub use traits::compressed_encoder::{CompressedEncoder, EncoderCompletion};
pub use traits::session_delegate::SessionDelegate;
pub use traits::sink::Sink;
