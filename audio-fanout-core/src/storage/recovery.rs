use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;
use crate::processing::wav_format::{self, WAV_HEADER_SIZE};
use crate::storage::chunk_store::ChunkStore;

/// A recording rebuilt from persisted chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredRecording {
    pub recording_id: String,
    pub path: PathBuf,
    /// PCM bytes in the data chunk.
    pub bytes: u64,
    pub chunk_count: usize,
}

/// Ids that still have chunks or a manifest in `store`, minus `active`.
///
/// A session that is still recording has chunks in the store too; pass its
/// id (`SessionCoordinator::recording_id`) in `active` so it is not handed
/// to `recover_to_wav`, which deletes chunks the persister is still writing.
/// What remains was left by a session that did not finish, or by one whose
/// retention policy kept its chunks.
pub fn pending_recordings(store: &dyn ChunkStore, active: &[&str]) -> Result<Vec<String>, CaptureError> {
    let mut ids = store.list_recording_ids()?;
    ids.retain(|id| !active.contains(&id.as_str()));
    Ok(ids)
}

/// Rebuild `recording_id` as a WAV file at `output_path`, then delete its
/// chunks.
///
/// Chunks are concatenated in index order; gaps are skipped. A trailing
/// partial frame is dropped. Chunks are only deleted once the file has been
/// synced.
pub fn recover_to_wav(
    store: &dyn ChunkStore,
    recording_id: &str,
    output_path: &Path,
) -> Result<RecoveredRecording, CaptureError> {
    let manifest = store.manifest(recording_id)?.ok_or_else(|| {
        CaptureError::StorageError(format!("no manifest for recording {}", recording_id))
    })?;
    let chunks = store.get_chunks(recording_id)?;
    let format = manifest.format;

    let total: u64 = chunks.iter().map(|c| c.data.len() as u64).sum();
    let data_size = wav_format::declarable_data_size(format, total);
    if (data_size as u64) < total {
        log::warn!(
            "recovering {}: dropping {} trailing bytes",
            recording_id,
            total - data_size as u64
        );
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_error("failed to create output dir"))?;
        }
    }
    let file = File::create(output_path).map_err(io_error("failed to create recovered file"))?;
    let mut out = BufWriter::new(file);
    out.write_all(&wav_format::generate_wav_header(format, data_size))
        .map_err(io_error("failed to write header"))?;

    let mut remaining = data_size as usize;
    for chunk in &chunks {
        if remaining == 0 {
            break;
        }
        let take = chunk.data.len().min(remaining);
        out.write_all(&chunk.data[..take])
            .map_err(io_error("failed to write recovered audio"))?;
        remaining -= take;
    }

    let file = out
        .into_inner()
        .map_err(|e| CaptureError::StorageError(format!("failed to flush recovered file: {}", e)))?;
    file.sync_all().map_err(io_error("failed to sync recovered file"))?;

    store.delete_chunks(recording_id)?;
    log::info!(
        "recovered {} from {} chunks into {} ({} bytes)",
        recording_id,
        chunks.len(),
        output_path.display(),
        data_size
    );

    Ok(RecoveredRecording {
        recording_id: recording_id.to_string(),
        path: output_path.to_path_buf(),
        bytes: data_size as u64,
        chunk_count: chunks.len(),
    })
}

/// Rewrite the header of a WAV left open by an interrupted session so it
/// declares exactly the audio on disk. A trailing partial frame is cut off.
/// Returns the repaired data length.
pub fn repair_wav_header(path: &Path) -> Result<u64, CaptureError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(io_error("failed to open wav"))?;

    let mut header = [0u8; WAV_HEADER_SIZE];
    file.read_exact(&mut header).map_err(io_error("failed to read wav header"))?;
    let info = wav_format::parse_wav_header(&header)?;

    let file_len = file.metadata().map_err(io_error("failed to stat wav"))?.len();
    let on_disk = file_len.saturating_sub(WAV_HEADER_SIZE as u64);
    let data_size = wav_format::declarable_data_size(info.format, on_disk);

    if (data_size as u64) < on_disk {
        file.set_len(WAV_HEADER_SIZE as u64 + data_size as u64)
            .map_err(io_error("failed to truncate wav"))?;
    }
    file.seek(SeekFrom::Start(0)).map_err(io_error("failed to seek wav"))?;
    file.write_all(&wav_format::generate_wav_header(info.format, data_size))
        .map_err(io_error("failed to rewrite wav header"))?;
    file.sync_all().map_err(io_error("failed to sync wav"))?;

    if info.data_size != data_size {
        log::info!(
            "repaired {}: data length {} -> {}",
            path.display(),
            info.data_size,
            data_size
        );
    }
    Ok(data_size as u64)
}

fn io_error(context: &'static str) -> impl Fn(std::io::Error) -> CaptureError {
    move |e| CaptureError::StorageError(format!("{}: {}", context, e))
}
