use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingManifest;
use crate::storage::chunk_store::{validate_recording_id, ChunkRecord, ChunkStore};
use crate::storage::metadata::{self, write_synced};

const CHUNK_EXTENSION: &str = "chunk";

/// Durable chunk store on the local filesystem.
///
/// ```text
/// {root}/
/// ├── {recording_id}/
/// │   ├── manifest.json
/// │   ├── 0000000000.chunk
/// │   └── 0000000001.chunk
/// └── .trash-{recording_id}-{uuid}/    ← transient, during delete
/// ```
///
/// Chunks are written to a temp file, fsynced and renamed, so a chunk file
/// is either complete or absent. Each recording id has its own lock: saves
/// and reads share it, a delete takes it exclusively. Ids never contend with
/// each other.
pub struct FileChunkStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl FileChunkStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| CaptureError::StorageError(format!("failed to create chunk store: {}", e)))?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for(&self, recording_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(recording_id.to_string()).or_default())
    }

    /// Drop `recording_id`'s entry from the lock table unless another
    /// caller still holds a clone. Clones are only handed out under the
    /// table lock, so the count cannot grow while it is held.
    fn prune_lock(&self, recording_id: &str, lock: Arc<RwLock<()>>) {
        let mut locks = self.locks.lock();
        let unshared = locks
            .get(recording_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if unshared {
            locks.remove(recording_id);
        }
    }

    fn remove_recording_dir(&self, recording_id: &str, dir: &Path) -> Result<(), CaptureError> {
        // Rename first: the id disappears from listings in one step even if
        // the recursive removal below is interrupted.
        let trash = self
            .root
            .join(format!(".trash-{}-{}", recording_id, uuid::Uuid::new_v4()));
        match fs::rename(dir, &trash) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(storage_error("failed to delete recording", e)),
        }
        if let Err(e) = fs::remove_dir_all(&trash) {
            log::warn!("left {} behind after delete: {}", trash.display(), e);
        }
        log::info!("deleted persisted chunks for {}", recording_id);
        Ok(())
    }

    fn recording_dir(&self, recording_id: &str) -> Result<PathBuf, CaptureError> {
        validate_recording_id(recording_id)?;
        Ok(self.root.join(recording_id))
    }

    fn chunk_file_name(chunk_index: u64) -> String {
        format!("{:010}.{}", chunk_index, CHUNK_EXTENSION)
    }

    fn parse_chunk_index(path: &Path) -> Option<u64> {
        if path.extension()? != CHUNK_EXTENSION {
            return None;
        }
        path.file_stem()?.to_str()?.parse().ok()
    }
}

fn storage_error(context: &str, e: io::Error) -> CaptureError {
    CaptureError::StorageError(format!("{}: {}", context, e))
}

impl ChunkStore for FileChunkStore {
    fn save_chunk(&self, recording_id: &str, chunk_index: u64, data: &[u8]) -> Result<(), CaptureError> {
        let dir = self.recording_dir(recording_id)?;
        let lock = self.lock_for(recording_id);
        let _shared = lock.read();

        fs::create_dir_all(&dir).map_err(|e| storage_error("failed to create recording dir", e))?;
        let tmp = dir.join(format!(".{}.tmp", chunk_index));
        write_synced(&tmp, data).map_err(|e| storage_error("failed to write chunk", e))?;
        fs::rename(&tmp, dir.join(Self::chunk_file_name(chunk_index)))
            .map_err(|e| storage_error("failed to commit chunk", e))?;

        log::debug!("saved chunk {}/{} ({} bytes)", recording_id, chunk_index, data.len());
        Ok(())
    }

    fn get_chunks(&self, recording_id: &str) -> Result<Vec<ChunkRecord>, CaptureError> {
        let dir = self.recording_dir(recording_id)?;
        let lock = self.lock_for(recording_id);
        let _shared = lock.read();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("failed to list chunks", e)),
        };

        let mut indexed = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| storage_error("failed to list chunks", e))?.path();
            if let Some(index) = Self::parse_chunk_index(&path) {
                indexed.push((index, path));
            }
        }
        indexed.sort_by_key(|(index, _)| *index);

        indexed
            .into_iter()
            .map(|(chunk_index, path)| {
                let data = fs::read(&path).map_err(|e| storage_error("failed to read chunk", e))?;
                Ok(ChunkRecord {
                    recording_id: recording_id.to_string(),
                    chunk_index,
                    data,
                })
            })
            .collect()
    }

    fn delete_chunks(&self, recording_id: &str) -> Result<(), CaptureError> {
        let dir = self.recording_dir(recording_id)?;
        let lock = self.lock_for(recording_id);
        let result = {
            let _exclusive = lock.write();
            self.remove_recording_dir(recording_id, &dir)
        };
        self.prune_lock(recording_id, lock);
        result
    }

    fn list_recording_ids(&self) -> Result<Vec<String>, CaptureError> {
        let entries = fs::read_dir(&self.root).map_err(|e| storage_error("failed to list recordings", e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| storage_error("failed to list recordings", e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_dir && !name.starts_with('.') {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn put_manifest(&self, manifest: &RecordingManifest) -> Result<(), CaptureError> {
        let dir = self.recording_dir(&manifest.recording_id)?;
        let lock = self.lock_for(&manifest.recording_id);
        let _shared = lock.read();

        fs::create_dir_all(&dir).map_err(|e| storage_error("failed to create recording dir", e))?;
        metadata::write_manifest(manifest, &dir)
    }

    fn manifest(&self, recording_id: &str) -> Result<Option<RecordingManifest>, CaptureError> {
        let dir = self.recording_dir(recording_id)?;
        let lock = self.lock_for(recording_id);
        let _shared = lock.read();
        metadata::read_manifest(&dir)
    }
}
