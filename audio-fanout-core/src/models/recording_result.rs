use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::PcmFormat;
use super::config::CodecKind;
use super::error::SinkError;

/// Terminal outcome of one sink after `stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkOutcome {
    pub output_path: Option<PathBuf>,
    pub error: Option<SinkError>,
    pub bytes_written: u64,
    pub frames_dropped: u64,
    /// SHA-256 hex digest of the finalized file, when the sink computes one.
    pub checksum: Option<String>,
}

impl SinkOutcome {
    /// The sink produced a usable artifact.
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.output_path.is_some()
    }
}

/// Result of a finished session: one entry per sink, keyed by sink id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub recording_id: String,
    pub duration_secs: f64,
    pub sinks: BTreeMap<String, SinkOutcome>,
    pub cancelled: bool,
    pub created_at: String,
}

impl SessionReport {
    pub fn new(recording_id: &str, duration_secs: f64, sinks: BTreeMap<String, SinkOutcome>, cancelled: bool) -> Self {
        Self {
            recording_id: recording_id.to_string(),
            duration_secs,
            sinks,
            cancelled,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn sink(&self, id: &str) -> Option<&SinkOutcome> {
        self.sinks.get(id)
    }

    /// At least one sink produced a valid output.
    pub fn any_succeeded(&self) -> bool {
        self.sinks.values().any(SinkOutcome::is_ok)
    }

    pub fn failed_sinks(&self) -> impl Iterator<Item = (&str, &SinkError)> {
        self.sinks
            .iter()
            .filter_map(|(id, outcome)| outcome.error.as_ref().map(|e| (id.as_str(), e)))
    }
}

/// Sidecar stored next to persisted chunks so a recording can be rebuilt
/// without the session that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingManifest {
    pub recording_id: String,
    pub format: PcmFormat,
    pub codec: Option<CodecKind>,
    pub created_at: String,
}

impl RecordingManifest {
    pub fn new(recording_id: &str, format: PcmFormat, codec: Option<CodecKind>) -> Self {
        Self {
            recording_id: recording_id.to_string(),
            format,
            codec,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
