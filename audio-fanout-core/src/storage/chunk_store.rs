use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingManifest;

/// One persisted slice of a recording's PCM stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub recording_id: String,
    pub chunk_index: u64,
    pub data: Vec<u8>,
}

/// Append-only durable chunk log keyed by `(recording_id, chunk_index)`.
///
/// This is also the recovery query surface: the host lists ids left behind
/// by sessions that never reached a clean stop, reads their chunks and
/// deletes them once rebuilt.
pub trait ChunkStore: Send + Sync {
    /// Persist one chunk. Once this returns `Ok` the chunk survives a restart.
    fn save_chunk(&self, recording_id: &str, chunk_index: u64, data: &[u8]) -> Result<(), CaptureError>;

    /// All chunks of `recording_id`, sorted by index. Missing indices are
    /// skipped, not filled.
    fn get_chunks(&self, recording_id: &str) -> Result<Vec<ChunkRecord>, CaptureError>;

    /// Remove every chunk and the manifest of `recording_id`. Readers see
    /// either all of them or none.
    fn delete_chunks(&self, recording_id: &str) -> Result<(), CaptureError>;

    /// Ids with anything stored, sorted.
    fn list_recording_ids(&self) -> Result<Vec<String>, CaptureError>;

    fn put_manifest(&self, manifest: &RecordingManifest) -> Result<(), CaptureError>;

    fn manifest(&self, recording_id: &str) -> Result<Option<RecordingManifest>, CaptureError>;
}

/// Reject ids that could escape a per-id namespace.
pub fn validate_recording_id(recording_id: &str) -> Result<(), CaptureError> {
    let valid = !recording_id.is_empty()
        && !recording_id.starts_with('.')
        && !recording_id.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(CaptureError::StorageError(format!("invalid recording id: {:?}", recording_id)))
    }
}

#[derive(Debug, Default)]
struct MemoryRecording {
    chunks: BTreeMap<u64, Vec<u8>>,
    manifest: Option<RecordingManifest>,
}

/// In-process store for environments without file access, and for tests.
/// Not durable across restarts.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    recordings: RwLock<BTreeMap<String, MemoryRecording>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn save_chunk(&self, recording_id: &str, chunk_index: u64, data: &[u8]) -> Result<(), CaptureError> {
        validate_recording_id(recording_id)?;
        self.recordings
            .write()
            .entry(recording_id.to_string())
            .or_default()
            .chunks
            .insert(chunk_index, data.to_vec());
        Ok(())
    }

    fn get_chunks(&self, recording_id: &str) -> Result<Vec<ChunkRecord>, CaptureError> {
        let recordings = self.recordings.read();
        let Some(recording) = recordings.get(recording_id) else {
            return Ok(Vec::new());
        };
        Ok(recording
            .chunks
            .iter()
            .map(|(&chunk_index, data)| ChunkRecord {
                recording_id: recording_id.to_string(),
                chunk_index,
                data: data.clone(),
            })
            .collect())
    }

    fn delete_chunks(&self, recording_id: &str) -> Result<(), CaptureError> {
        self.recordings.write().remove(recording_id);
        Ok(())
    }

    fn list_recording_ids(&self) -> Result<Vec<String>, CaptureError> {
        Ok(self.recordings.read().keys().cloned().collect())
    }

    fn put_manifest(&self, manifest: &RecordingManifest) -> Result<(), CaptureError> {
        validate_recording_id(&manifest.recording_id)?;
        self.recordings
            .write()
            .entry(manifest.recording_id.clone())
            .or_default()
            .manifest = Some(manifest.clone());
        Ok(())
    }

    fn manifest(&self, recording_id: &str) -> Result<Option<RecordingManifest>, CaptureError> {
        Ok(self
            .recordings
            .read()
            .get(recording_id)
            .and_then(|r| r.manifest.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::PcmFormat;

    #[test]
    fn chunks_come_back_sorted() {
        let store = MemoryChunkStore::new();
        store.save_chunk("a", 2, b"two").unwrap();
        store.save_chunk("a", 0, b"zero").unwrap();
        store.save_chunk("a", 1, b"one").unwrap();

        let chunks = store.get_chunks("a").unwrap();
        let indices: Vec<u64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(chunks[0].data, b"zero");
    }

    #[test]
    fn gaps_are_skipped() {
        let store = MemoryChunkStore::new();
        store.save_chunk("a", 0, b"x").unwrap();
        store.save_chunk("a", 3, b"y").unwrap();
        let indices: Vec<u64> = store.get_chunks("a").unwrap().iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 3]);
    }

    #[test]
    fn delete_is_scoped_to_one_id() {
        let store = MemoryChunkStore::new();
        store.save_chunk("a", 0, b"a0").unwrap();
        store.save_chunk("b", 0, b"b0").unwrap();
        store.put_manifest(&RecordingManifest::new("a", PcmFormat::new(8000, 1), None)).unwrap();

        store.delete_chunks("a").unwrap();

        assert!(store.get_chunks("a").unwrap().is_empty());
        assert!(store.manifest("a").unwrap().is_none());
        assert_eq!(store.get_chunks("b").unwrap().len(), 1);
        assert_eq!(store.list_recording_ids().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!(validate_recording_id("ok-id_1").is_ok());
        assert!(validate_recording_id("").is_err());
        assert!(validate_recording_id(".trash").is_err());
        assert!(validate_recording_id("a/b").is_err());
        let store = MemoryChunkStore::new();
        assert!(store.save_chunk("../x", 0, b"").is_err());
    }
}
