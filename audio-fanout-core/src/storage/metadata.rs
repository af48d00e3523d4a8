use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingManifest;

const MANIFEST_FILE: &str = "manifest.json";

fn manifest_path(recording_dir: &Path) -> PathBuf {
    recording_dir.join(MANIFEST_FILE)
}

/// Write a recording manifest as `manifest.json` inside `recording_dir`.
///
/// Written to a temporary file and renamed into place, so readers see
/// either the old manifest or the new one.
pub fn write_manifest(manifest: &RecordingManifest, recording_dir: &Path) -> Result<(), CaptureError> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| CaptureError::StorageError(format!("failed to serialize manifest: {}", e)))?;
    let tmp = recording_dir.join(".manifest.json.tmp");
    write_synced(&tmp, &json)
        .map_err(|e| CaptureError::StorageError(format!("failed to write manifest: {}", e)))?;
    fs::rename(&tmp, manifest_path(recording_dir))
        .map_err(|e| CaptureError::StorageError(format!("failed to commit manifest: {}", e)))?;
    Ok(())
}

/// Read the manifest inside `recording_dir`, if one was written.
pub fn read_manifest(recording_dir: &Path) -> Result<Option<RecordingManifest>, CaptureError> {
    let json = match fs::read(manifest_path(recording_dir)) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CaptureError::StorageError(format!("failed to read manifest: {}", e))),
    };
    let manifest = serde_json::from_slice(&json)
        .map_err(|e| CaptureError::StorageError(format!("failed to parse manifest: {}", e)))?;
    Ok(Some(manifest))
}

/// Create `path`, write `data` and fsync before returning.
pub(crate) fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}
