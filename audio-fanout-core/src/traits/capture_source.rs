use std::sync::Arc;

use crate::models::audio_models::{AudioSource, SourceBuffer, SourceFormat};
use crate::models::error::CaptureError;

/// Callback invoked once per hardware buffer.
///
/// Runs on the backend's real-time thread: it must not block, and the
/// buffer is only valid for the duration of the call.
pub type CaptureCallback = Arc<dyn Fn(SourceBuffer<'_>) + Send + Sync + 'static>;

/// Push-based adapter over a platform capture API.
///
/// Backends (CoreAudio, WASAPI, AAudio, a web worklet bridge, ...) implement
/// this outside the core. The coordinator only subscribes a callback and
/// drives the lifecycle.
pub trait CaptureSource: Send {
    /// Whether the device can currently be opened.
    fn is_available(&self) -> bool;

    /// Native hardware format, queried once at session start.
    fn native_format(&self) -> Result<SourceFormat, CaptureError>;

    /// Start delivering buffers to `callback`, asking the hardware for
    /// roughly `buffer_frames` frames per callback. Backends may round it to
    /// what the device supports.
    fn start(&mut self, buffer_frames: u32, callback: CaptureCallback) -> Result<(), CaptureError>;

    /// Suspend the hardware without dropping the subscription.
    fn pause(&mut self) -> Result<(), CaptureError>;

    /// Re-acquire the hardware after `pause` or an interruption.
    fn resume(&mut self) -> Result<(), CaptureError>;

    /// Stop capturing and drop the callback. Once this returns the callback
    /// is never invoked again.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Information about the device backing this source.
    fn device_info(&self) -> AudioSource;
}
