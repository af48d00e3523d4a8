use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::PcmFormat;
use super::error::CaptureError;

/// Compressed codec requested for the session's encoder sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Aac,
    Opus,
    Flac,
}

/// What to do when another audio session takes the hardware away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptionPolicy {
    /// Suspend capture, keep every sink open.
    Pause,
    /// Finalize the session through the normal stop path.
    Stop,
}

/// Exponential backoff used when re-acquiring the capture hardware on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeRetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl ResumeRetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

impl Default for ResumeRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

/// Configuration for one recording session. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Canonical output sample rate in Hz (default: 48000).
    pub sample_rate: u32,

    /// Canonical output channel count, 1 or 2 (default: 1).
    pub channels: u16,

    /// Codec for the compressed sink, if the host adds one.
    pub codec: Option<CodecKind>,

    /// Bit rate hint handed to the encoder.
    pub bit_rate: Option<u32>,

    /// Requested capture buffer size in frames.
    pub buffer_frames: u32,

    /// Directory where output artifacts are written.
    pub output_directory: PathBuf,

    /// Stable id for the recording; generated when absent.
    pub recording_id: Option<String>,

    /// Add the built-in WAV container sink.
    pub write_container: bool,

    /// Persist PCM chunks to the configured chunk store for crash recovery.
    pub persist_chunks: bool,

    /// Duration of one persisted chunk in milliseconds.
    pub chunk_duration_ms: u32,

    /// Keep persisted chunks after a clean stop.
    pub retain_chunks_after_stop: bool,

    pub interruption_policy: InterruptionPolicy,

    /// Resume automatically when an interruption ends and the OS allows it.
    pub auto_resume_after_interruption: bool,

    pub resume_retry: ResumeRetryPolicy,

    /// Depth of each encoder sink's frame queue before frames are dropped.
    pub encoder_queue_frames: usize,

    /// How long `stop` waits for an encoder to flush.
    pub finalize_timeout_ms: u64,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::ConfigurationFailed("sample rate must be positive".into()));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(CaptureError::ConfigurationFailed(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if self.buffer_frames == 0 {
            return Err(CaptureError::ConfigurationFailed("buffer size must be positive".into()));
        }
        if self.chunk_duration_ms == 0 {
            return Err(CaptureError::ConfigurationFailed("chunk duration must be positive".into()));
        }
        if self.resume_retry.max_attempts == 0 {
            return Err(CaptureError::ConfigurationFailed(
                "resume retry needs at least one attempt".into(),
            ));
        }
        if self.encoder_queue_frames == 0 {
            return Err(CaptureError::ConfigurationFailed("encoder queue must hold at least one frame".into()));
        }
        if let Some(id) = &self.recording_id {
            if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
                return Err(CaptureError::ConfigurationFailed(format!("invalid recording id: {:?}", id)));
            }
        }
        Ok(())
    }

    /// The canonical PCM format every sink consumes.
    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat::new(self.sample_rate, self.channels)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }

    /// Parse a configuration from JSON, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid config json: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            codec: None,
            bit_rate: None,
            buffer_frames: 1024,
            output_directory: PathBuf::from("."),
            recording_id: None,
            write_container: true,
            persist_chunks: false,
            chunk_duration_ms: 1000,
            retain_chunks_after_stop: false,
            interruption_policy: InterruptionPolicy::Pause,
            auto_resume_after_interruption: true,
            resume_retry: ResumeRetryPolicy::default(),
            encoder_queue_frames: 32,
            finalize_timeout_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_rate_and_surround() {
        let config = SessionConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            channels: 6,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CaptureError::ConfigurationFailed(_))));
    }

    #[test]
    fn rejects_path_like_recording_id() {
        let config = SessionConfig {
            recording_id: Some("../escape".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles() {
        let policy = ResumeRetryPolicy {
            max_attempts: 4,
            base_delay_ms: 50,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn json_fills_defaults() {
        let config = SessionConfig::from_json(r#"{"sample_rate": 16000, "codec": "aac"}"#).unwrap();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.codec, Some(CodecKind::Aac));
        assert_eq!(config.resume_retry.max_attempts, 3);
    }
}
