use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use sha2::{Digest, Sha256};

use crate::models::audio_models::{AudioFrame, PcmFormat};
use crate::models::error::SinkError;
use crate::processing::wav_format;
use crate::sinks::latch::ErrorLatch;
use crate::traits::sink::Sink;

/// Streaming WAV sink with a crash-safe header.
///
/// ## File lifecycle
///
/// ```text
/// start:  [44-byte header, data length = placeholder]
/// write:  [header][PCM16 LE ...]            (appended by the writer thread)
/// stop:   seek(0) → [header, data length = bytes written][PCM16 LE ...]
/// ```
///
/// `write` only copies bytes onto an unbounded channel; the `wav-writer`
/// thread appends them and flushes whenever its queue runs dry. If the
/// process dies before `stop`, the placeholder header still describes a
/// playable file up to the last flushed byte.
pub struct ContainerWriter {
    id: String,
    path: PathBuf,
    sender: Option<Sender<Vec<u8>>>,
    worker: Option<thread::JoinHandle<WavFile>>,
    bytes_written: Arc<AtomicU64>,
    latch: Arc<ErrorLatch>,
    output_path: Option<PathBuf>,
    checksum: Option<String>,
}

/// Counters describing the data chunk of an open WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFileState {
    pub bytes_written: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl WavFileState {
    fn format(&self) -> PcmFormat {
        PcmFormat::new(self.sample_rate, self.channels)
    }
}

/// Open WAV handle owned by the writer thread. Consumed by `finalize`.
struct WavFile {
    file: BufWriter<File>,
    state: WavFileState,
}

impl WavFile {
    fn create(path: &Path, format: PcmFormat) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&wav_format::generate_placeholder_header(format))?;
        file.flush()?;
        Ok(Self {
            file,
            state: WavFileState {
                bytes_written: 0,
                sample_rate: format.sample_rate,
                channels: format.channels,
            },
        })
    }

    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.state.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Rewrite the header with the true data length and close the handle.
    fn finalize(self) -> io::Result<WavFileState> {
        let Self { file, state } = self;
        let mut file = file.into_inner().map_err(|e| e.into_error())?;

        let format = state.format();
        let declared = wav_format::declarable_data_size(format, state.bytes_written);
        if declared as u64 != state.bytes_written {
            log::warn!(
                "wav data length {} exceeds what the header can declare; declaring {}",
                state.bytes_written,
                declared
            );
        }

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&wav_format::generate_wav_header(format, declared))?;
        file.flush()?;
        file.sync_all()?;
        Ok(state)
    }
}

impl ContainerWriter {
    pub fn new(id: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id: id.into(),
            path,
            sender: None,
            worker: None,
            bytes_written: Arc::new(AtomicU64::new(0)),
            latch: Arc::new(ErrorLatch::new()),
            output_path: None,
            checksum: None,
        }
    }

    /// `recording_{id}.wav` inside `directory`.
    pub fn for_recording(directory: &Path, recording_id: &str) -> Self {
        Self::new("wav", directory.join(format!("recording_{}.wav", recording_id)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fail(&self, error: SinkError) -> SinkError {
        if self.latch.latch(error.clone()) {
            log::error!("{}: {}", self.id, error);
        }
        error
    }

    fn join_worker(&mut self) -> Option<WavFile> {
        drop(self.sender.take());
        let handle = self.worker.take()?;
        match handle.join() {
            Ok(wav) => Some(wav),
            Err(_) => {
                self.fail(SinkError::Finalize("wav writer thread panicked".into()));
                None
            }
        }
    }
}

impl Sink for ContainerWriter {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&mut self, format: PcmFormat) -> Result<(), SinkError> {
        if self.worker.is_some() {
            return Err(SinkError::Start("already started".into()));
        }

        let wav = WavFile::create(&self.path, format)
            .map_err(|e| self.fail(SinkError::Start(format!("{}: {}", self.path.display(), e))))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let latch = Arc::clone(&self.latch);
        let bytes = Arc::clone(&self.bytes_written);
        let id = self.id.clone();

        let handle = thread::Builder::new()
            .name("wav-writer".into())
            .spawn(move || run_writer(wav, rx, &latch, &bytes, &id))
            .map_err(|e| self.fail(SinkError::Start(format!("failed to spawn writer thread: {}", e))))?;

        self.sender = Some(tx);
        self.worker = Some(handle);
        self.output_path = Some(self.path.clone());
        log::info!(
            "{}: writing {} Hz / {} ch PCM16 to {}",
            self.id,
            format.sample_rate,
            format.channels,
            self.path.display()
        );
        Ok(())
    }

    fn write(&mut self, frame: &AudioFrame<'_>) {
        if self.latch.is_set() {
            return;
        }
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(frame.to_le_bytes()).is_err() {
            self.fail(SinkError::Write("wav writer thread exited".into()));
        }
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        let Some(wav) = self.join_worker() else {
            return match self.latch.get() {
                Some(e) => Err(e),
                None => Err(SinkError::Finalize("not started".into())),
            };
        };

        let state = wav
            .finalize()
            .map_err(|e| self.fail(SinkError::Finalize(e.to_string())))?;
        self.bytes_written.store(state.bytes_written, Ordering::Release);

        match sha256_file(&self.path) {
            Ok(digest) => self.checksum = Some(digest),
            Err(e) => log::warn!("{}: checksum failed: {}", self.id, e),
        }

        log::info!(
            "{}: finalized {} ({} data bytes)",
            self.id,
            self.path.display(),
            state.bytes_written
        );

        match self.latch.get() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn release(&mut self) {
        // Without a prior stop the file keeps its placeholder header.
        let _ = self.join_worker();
    }

    fn output_path(&self) -> Option<PathBuf> {
        self.output_path.clone()
    }

    fn error(&self) -> Option<SinkError> {
        self.latch.get()
    }

    fn discard(&mut self) -> Result<(), SinkError> {
        self.release();
        self.checksum = None;
        let Some(path) = self.output_path.take() else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SinkError::Discard(format!("{}: {}", path.display(), e))),
        }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    fn checksum(&self) -> Option<String> {
        self.checksum.clone()
    }
}

/// Writer thread body: append until the channel closes, flush when idle.
///
/// After an I/O error the latch is set and remaining chunks are drained
/// without touching the file.
fn run_writer(
    mut wav: WavFile,
    rx: Receiver<Vec<u8>>,
    latch: &ErrorLatch,
    bytes: &AtomicU64,
    id: &str,
) -> WavFile {
    for chunk in rx.iter() {
        if latch.is_set() {
            continue;
        }
        if let Err(e) = wav.append(&chunk) {
            if latch.latch(SinkError::Write(e.to_string())) {
                log::error!("{}: append failed: {}", id, e);
            }
            continue;
        }
        bytes.store(wav.state.bytes_written, Ordering::Release);

        if rx.is_empty() {
            if let Err(e) = wav.file.flush() {
                if latch.latch(SinkError::Write(e.to_string())) {
                    log::error!("{}: flush failed: {}", id, e);
                }
            }
        }
    }
    wav
}

/// Compute SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::wav_format::{parse_wav_header, placeholder_data_size};

    fn frame(samples: &[i16], position: u64) -> AudioFrame<'_> {
        AudioFrame::new(samples, PcmFormat::new(48000, 2), position)
    }

    #[test]
    fn header_states_exact_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let mut writer = ContainerWriter::new("wav", path.clone());
        writer.start(PcmFormat::new(48000, 2)).unwrap();

        let a = [1i16, -1, 2, -2];
        let b = [3i16, -3];
        writer.write(&frame(&a, 0));
        writer.write(&frame(&b, 2));
        writer.stop().unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 44 + 12);
        let info = parse_wav_header(&data).unwrap();
        assert_eq!(info.data_size, 12);
        assert_eq!(info.riff_size, 36 + 12);
        assert_eq!(info.format, PcmFormat::new(48000, 2));
        assert_eq!(&data[44..48], &[1, 0, 0xFF, 0xFF]);
        assert_eq!(writer.bytes_written(), 12);
        assert_eq!(writer.output_path(), Some(path));
        assert!(writer.error().is_none());
    }

    #[test]
    fn empty_recording_is_valid_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("empty.wav");
        let mut writer = ContainerWriter::new("wav", path.clone());
        writer.start(PcmFormat::new(16000, 1)).unwrap();
        writer.stop().unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 44);
        let info = parse_wav_header(&data).unwrap();
        assert_eq!(info.data_size, 0);
        assert_eq!(info.riff_size, 36);
        assert_eq!(info.format, PcmFormat::new(16000, 1));
    }

    #[test]
    fn abandoned_file_keeps_placeholder_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.wav");
        let mut writer = ContainerWriter::new("wav", path.clone());
        let format = PcmFormat::new(48000, 2);
        writer.start(format).unwrap();
        writer.write(&frame(&[7, 7, 7, 7], 0));

        // No stop: simulates a process that never reached finalize.
        writer.release();

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 44 + 8);
        let info = parse_wav_header(&data).unwrap();
        assert_eq!(info.data_size, placeholder_data_size(format));
    }

    #[test]
    fn start_failure_is_latched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();

        let mut writer = ContainerWriter::new("wav", blocker.join("take.wav"));
        let err = writer.start(PcmFormat::new(48000, 1)).unwrap_err();
        assert!(matches!(err, SinkError::Start(_)));
        assert_eq!(writer.error(), Some(err.clone()));
        assert!(writer.output_path().is_none());

        // writes are no-ops and stop reports the original error
        writer.write(&frame(&[1, 2], 0));
        assert_eq!(writer.stop().unwrap_err(), err);
    }

    #[test]
    fn checksum_matches_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sum.wav");
        let mut writer = ContainerWriter::new("wav", path.clone());
        writer.start(PcmFormat::new(8000, 1)).unwrap();
        writer.write(&AudioFrame::new(&[5, 6, 7], PcmFormat::new(8000, 1), 0));
        writer.stop().unwrap();

        let expected = hex_encode(&Sha256::digest(fs::read(&path).unwrap()));
        assert_eq!(writer.checksum(), Some(expected));
    }

    #[test]
    fn discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.wav");
        let mut writer = ContainerWriter::new("wav", path.clone());
        writer.start(PcmFormat::new(48000, 2)).unwrap();
        writer.write(&frame(&[1, 1], 0));
        writer.stop().unwrap();

        writer.discard().unwrap();
        assert!(!path.exists());
        assert!(writer.output_path().is_none());
        assert!(writer.checksum().is_none());
    }

    #[test]
    fn for_recording_names_file_by_id() {
        let writer = ContainerWriter::for_recording(Path::new("/tmp/out"), "abc");
        assert_eq!(writer.id(), "wav");
        assert_eq!(writer.path(), Path::new("/tmp/out/recording_abc.wav"));
    }
}
