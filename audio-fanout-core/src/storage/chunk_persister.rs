use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::models::audio_models::{AudioFrame, PcmFormat};
use crate::models::config::CodecKind;
use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingManifest;
use crate::storage::chunk_store::ChunkStore;

/// A pending buffer larger than this many chunks is abandoned after
/// repeated save failures.
const MAX_PENDING_CHUNKS: usize = 8;

/// Totals reported when the persister closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub chunks_saved: u64,
    pub save_failures: u64,
    pub bytes_abandoned: u64,
}

/// Background writer that mirrors the session's PCM into a [`ChunkStore`].
///
/// `submit` runs on the capture thread and only enqueues bytes. The
/// `chunk-persister` thread cuts them into chunks of `chunk_duration_ms`
/// (the last one may be shorter) and saves them under contiguous indices
/// starting at 0. A failed save keeps its bytes and is retried when more
/// audio arrives, so an index is only consumed by a chunk that was stored.
pub struct ChunkPersister {
    recording_id: String,
    sender: Option<Sender<Vec<u8>>>,
    worker: Option<thread::JoinHandle<PersistStats>>,
    saved: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl ChunkPersister {
    /// Write the manifest synchronously, then start the worker.
    pub fn spawn(
        store: Arc<dyn ChunkStore>,
        recording_id: &str,
        format: PcmFormat,
        codec: Option<CodecKind>,
        chunk_duration_ms: u32,
    ) -> Result<Self, CaptureError> {
        store.put_manifest(&RecordingManifest::new(recording_id, format, codec))?;

        let chunk_bytes = chunk_size_bytes(format, chunk_duration_ms);
        let (tx, rx) = crossbeam_channel::unbounded();
        let saved = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let worker = {
            let id = recording_id.to_string();
            let saved = Arc::clone(&saved);
            let failed = Arc::clone(&failed);
            thread::Builder::new()
                .name("chunk-persister".into())
                .spawn(move || run_persister(store, &id, rx, chunk_bytes, &saved, &failed))
                .map_err(|e| CaptureError::Unknown(format!("failed to spawn chunk persister: {}", e)))?
        };

        log::info!(
            "persisting {} in chunks of {} bytes",
            recording_id,
            chunk_bytes
        );
        Ok(Self {
            recording_id: recording_id.to_string(),
            sender: Some(tx),
            worker: Some(worker),
            saved,
            failed,
        })
    }

    pub fn recording_id(&self) -> &str {
        &self.recording_id
    }

    /// Enqueue one frame's bytes. Never blocks.
    pub fn submit(&self, frame: &AudioFrame<'_>) {
        if let Some(sender) = &self.sender {
            // A closed channel means the worker is gone; the loss shows up
            // in the failure count at close.
            let _ = sender.send(frame.to_le_bytes());
        }
    }

    pub fn chunks_saved(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }

    pub fn save_failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Flush the final partial chunk and wait for the worker. Idempotent.
    pub fn close(&mut self) -> PersistStats {
        drop(self.sender.take());
        let Some(worker) = self.worker.take() else {
            return PersistStats {
                chunks_saved: self.chunks_saved(),
                save_failures: self.save_failures(),
                bytes_abandoned: 0,
            };
        };
        match worker.join() {
            Ok(stats) => stats,
            Err(_) => {
                log::error!("chunk persister for {} panicked", self.recording_id);
                PersistStats {
                    chunks_saved: self.chunks_saved(),
                    save_failures: self.save_failures() + 1,
                    bytes_abandoned: 0,
                }
            }
        }
    }
}

impl Drop for ChunkPersister {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bytes in one chunk: whole frames, at least one.
fn chunk_size_bytes(format: PcmFormat, chunk_duration_ms: u32) -> usize {
    let align = format.block_align().max(1) as u64;
    let bytes = format.byte_rate() as u64 * chunk_duration_ms as u64 / 1000;
    (bytes / align * align).max(align) as usize
}

fn run_persister(
    store: Arc<dyn ChunkStore>,
    recording_id: &str,
    rx: Receiver<Vec<u8>>,
    chunk_bytes: usize,
    saved: &AtomicU64,
    failed: &AtomicU64,
) -> PersistStats {
    let mut pending: Vec<u8> = Vec::with_capacity(chunk_bytes * 2);
    let mut next_index = 0u64;
    let mut stats = PersistStats::default();

    let mut save = |data: &[u8], stats: &mut PersistStats| match store.save_chunk(recording_id, next_index, data) {
        Ok(()) => {
            next_index += 1;
            stats.chunks_saved += 1;
            saved.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(e) => {
            stats.save_failures += 1;
            failed.fetch_add(1, Ordering::Relaxed);
            log::error!("failed to persist chunk {}/{}: {}", recording_id, next_index, e);
            false
        }
    };

    for bytes in rx.iter() {
        pending.extend_from_slice(&bytes);
        while pending.len() >= chunk_bytes {
            if !save(&pending[..chunk_bytes], &mut stats) {
                break;
            }
            pending.drain(..chunk_bytes);
        }
        if pending.len() >= chunk_bytes * MAX_PENDING_CHUNKS {
            log::error!("abandoning {} pending bytes for {}", pending.len(), recording_id);
            stats.bytes_abandoned += pending.len() as u64;
            pending.clear();
        }
    }
    while !pending.is_empty() {
        let take = pending.len().min(chunk_bytes);
        if !save(&pending[..take], &mut stats) {
            break;
        }
        pending.drain(..take);
    }
    stats.bytes_abandoned += pending.len() as u64;

    log::debug!(
        "chunk persister for {} closed: {} saved, {} failures",
        recording_id,
        stats.chunks_saved,
        stats.save_failures
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunk_store::{ChunkRecord, MemoryChunkStore};
    use parking_lot::Mutex;

    fn frame(samples: &[i16]) -> AudioFrame<'_> {
        AudioFrame::new(samples, PcmFormat::new(1000, 1), 0)
    }

    #[test]
    fn chunk_size_is_frame_aligned() {
        assert_eq!(chunk_size_bytes(PcmFormat::new(48000, 2), 1000), 192000);
        assert_eq!(chunk_size_bytes(PcmFormat::new(44100, 1), 10), 882);
        assert_eq!(chunk_size_bytes(PcmFormat::new(1000, 2), 0), 4);
    }

    #[test]
    fn groups_frames_into_contiguous_chunks() {
        let store = Arc::new(MemoryChunkStore::new());
        // 1000 Hz mono, 10 ms → 20-byte chunks
        let mut persister =
            ChunkPersister::spawn(store.clone(), "rec", PcmFormat::new(1000, 1), None, 10).unwrap();

        for i in 0..25i16 {
            persister.submit(&frame(&[i]));
        }
        let stats = persister.close();

        let chunks = store.get_chunks("rec").unwrap();
        assert_eq!(stats.chunks_saved, 3);
        assert_eq!(chunks.iter().map(|c| c.data.len()).collect::<Vec<_>>(), vec![20, 20, 10]);
        assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index == i as u64));
        assert_eq!(&chunks[1].data[0..2], &10i16.to_le_bytes());
        assert_eq!(store.manifest("rec").unwrap().unwrap().format, PcmFormat::new(1000, 1));
    }

    /// Fails the first `failures` saves, then delegates.
    struct Flaky {
        inner: MemoryChunkStore,
        failures: Mutex<u32>,
    }

    impl ChunkStore for Flaky {
        fn save_chunk(&self, id: &str, index: u64, data: &[u8]) -> Result<(), CaptureError> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(CaptureError::StorageError("disk busy".into()));
            }
            self.inner.save_chunk(id, index, data)
        }
        fn get_chunks(&self, id: &str) -> Result<Vec<ChunkRecord>, CaptureError> {
            self.inner.get_chunks(id)
        }
        fn delete_chunks(&self, id: &str) -> Result<(), CaptureError> {
            self.inner.delete_chunks(id)
        }
        fn list_recording_ids(&self) -> Result<Vec<String>, CaptureError> {
            self.inner.list_recording_ids()
        }
        fn put_manifest(&self, manifest: &RecordingManifest) -> Result<(), CaptureError> {
            self.inner.put_manifest(manifest)
        }
        fn manifest(&self, id: &str) -> Result<Option<RecordingManifest>, CaptureError> {
            self.inner.manifest(id)
        }
    }

    #[test]
    fn failed_save_retries_without_gaps() {
        let store = Arc::new(Flaky {
            inner: MemoryChunkStore::new(),
            failures: Mutex::new(1),
        });
        let mut persister =
            ChunkPersister::spawn(store.clone(), "rec", PcmFormat::new(1000, 1), None, 10).unwrap();
        for i in 0..20i16 {
            persister.submit(&frame(&[i]));
        }
        let stats = persister.close();

        assert_eq!(stats.save_failures, 1);
        assert_eq!(stats.bytes_abandoned, 0);
        let chunks = store.get_chunks("rec").unwrap();
        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        assert_eq!(total, 40);
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index == i as u64));
    }
}
