use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::models::audio_models::{AudioFrame, PcmFormat};
use crate::models::config::SessionConfig;
use crate::models::error::SinkError;
use crate::sinks::latch::ErrorLatch;
use crate::sinks::note_drop;
use crate::traits::compressed_encoder::CompressedEncoder;
use crate::traits::sink::Sink;

/// Converted frame queued for the encoder thread.
struct QueuedFrame {
    samples: Vec<i16>,
    position: u64,
}

/// Sink that feeds a [`CompressedEncoder`] from its own worker thread.
///
/// Frames are offered with `try_send` on a bounded queue. A full queue, or
/// an encoder reporting not-ready, drops the frame for this sink only; drops
/// are counted and never retried. The first encode error is latched and the
/// encoder is not fed again.
pub struct EncoderSink {
    id: String,
    encoder: Option<Box<dyn CompressedEncoder>>,
    bit_rate: Option<u32>,
    queue_depth: usize,
    finalize_timeout: Duration,
    sender: Option<Sender<QueuedFrame>>,
    worker: Option<thread::JoinHandle<Box<dyn CompressedEncoder>>>,
    latch: Arc<ErrorLatch>,
    dropped: Arc<AtomicU64>,
    fed_bytes: Arc<AtomicU64>,
    output_path: Option<PathBuf>,
}

impl EncoderSink {
    pub fn new(id: impl Into<String>, encoder: Box<dyn CompressedEncoder>) -> Self {
        Self {
            id: id.into(),
            encoder: Some(encoder),
            bit_rate: None,
            queue_depth: 32,
            finalize_timeout: Duration::from_secs(5),
            sender: None,
            worker: None,
            latch: Arc::new(ErrorLatch::new()),
            dropped: Arc::new(AtomicU64::new(0)),
            fed_bytes: Arc::new(AtomicU64::new(0)),
            output_path: None,
        }
    }

    /// Sink keyed by the codec name (`"aac"`, `"opus"`, ...) and tuned from
    /// the session's bit rate, queue depth and finalize timeout.
    pub fn for_session(encoder: Box<dyn CompressedEncoder>, config: &SessionConfig) -> Self {
        let id = format!("{:?}", encoder.codec()).to_lowercase();
        Self::new(id, encoder)
            .with_bit_rate(config.bit_rate)
            .with_queue_depth(config.encoder_queue_frames)
            .with_finalize_timeout(config.finalize_timeout())
    }

    pub fn with_bit_rate(mut self, bit_rate: Option<u32>) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_queue_depth(mut self, frames: usize) -> Self {
        self.queue_depth = frames.max(1);
        self
    }

    pub fn with_finalize_timeout(mut self, timeout: Duration) -> Self {
        self.finalize_timeout = timeout;
        self
    }

    fn fail(&self, error: SinkError) -> SinkError {
        if self.latch.latch(error.clone()) {
            log::warn!("{}: {}", self.id, error);
        }
        error
    }

    /// Close the queue and take the encoder back from the worker.
    fn join_worker(&mut self) {
        drop(self.sender.take());
        let Some(handle) = self.worker.take() else {
            return;
        };
        match handle.join() {
            Ok(encoder) => self.encoder = Some(encoder),
            Err(_) => {
                self.fail(SinkError::Encoder("encoder thread panicked".into()));
            }
        }
    }

    fn wait_for_completion(&self, encoder: &mut dyn CompressedEncoder) -> Result<PathBuf, SinkError> {
        let completion = encoder.finish();
        match completion.recv_timeout(self.finalize_timeout) {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(reason)) => Err(SinkError::Encoder(reason)),
            Err(RecvTimeoutError::Timeout) => {
                encoder.abort();
                Err(SinkError::Timeout(format!(
                    "encoder did not flush within {:?}",
                    self.finalize_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(SinkError::Encoder("encoder dropped its completion signal".into()))
            }
        }
    }
}

impl Sink for EncoderSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&mut self, format: PcmFormat) -> Result<(), SinkError> {
        let Some(mut encoder) = self.encoder.take() else {
            return Err(SinkError::Start("already started".into()));
        };

        if let Err(reason) = encoder.open(format, self.bit_rate) {
            self.encoder = Some(encoder);
            return Err(self.fail(SinkError::Start(reason)));
        }

        let (tx, rx) = crossbeam_channel::bounded(self.queue_depth);
        let latch = Arc::clone(&self.latch);
        let dropped = Arc::clone(&self.dropped);
        let fed = Arc::clone(&self.fed_bytes);
        let id = self.id.clone();
        let sample_rate = format.sample_rate;

        // The encoder moves into the thread; it is handed back on join.
        let handle = thread::Builder::new()
            .name(format!("encoder-{}", self.id))
            .spawn(move || run_encoder(encoder, rx, sample_rate, &latch, &dropped, &fed, &id))
            .map_err(|e| self.fail(SinkError::Start(format!("failed to spawn encoder thread: {}", e))))?;

        self.sender = Some(tx);
        self.worker = Some(handle);
        log::info!("{}: encoder started at {} Hz / {} ch", self.id, format.sample_rate, format.channels);
        Ok(())
    }

    fn write(&mut self, frame: &AudioFrame<'_>) {
        if self.latch.is_set() {
            return;
        }
        let Some(sender) = &self.sender else {
            return;
        };
        let queued = QueuedFrame {
            samples: frame.samples().to_vec(),
            position: frame.position(),
        };
        match sender.try_send(queued) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => note_drop(&self.dropped, &self.id, "encoder queue full"),
            Err(TrySendError::Disconnected(_)) => {
                self.fail(SinkError::Encoder("encoder thread exited".into()));
            }
        }
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.join_worker();

        if let Some(e) = self.latch.get() {
            if let Some(encoder) = self.encoder.as_mut() {
                encoder.abort();
            }
            return Err(e);
        }

        let Some(mut encoder) = self.encoder.take() else {
            return Err(self.fail(SinkError::Finalize("encoder unavailable".into())));
        };
        let result = self.wait_for_completion(encoder.as_mut());
        self.encoder = Some(encoder);

        match result {
            Ok(path) => {
                log::info!(
                    "{}: encoder finished {} ({} frames dropped)",
                    self.id,
                    path.display(),
                    self.dropped.load(Ordering::Relaxed)
                );
                self.output_path = Some(path);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn release(&mut self) {
        self.join_worker();
        self.encoder = None;
    }

    fn output_path(&self) -> Option<PathBuf> {
        self.output_path.clone()
    }

    fn error(&self) -> Option<SinkError> {
        self.latch.get()
    }

    fn discard(&mut self) -> Result<(), SinkError> {
        self.join_worker();
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.abort();
        }
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
        self.fed_bytes.load(Ordering::Relaxed)
    }

    fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Encoder thread body. Returns the encoder once the queue closes.
fn run_encoder(
    mut encoder: Box<dyn CompressedEncoder>,
    rx: Receiver<QueuedFrame>,
    sample_rate: u32,
    latch: &ErrorLatch,
    dropped: &AtomicU64,
    fed: &AtomicU64,
    id: &str,
) -> Box<dyn CompressedEncoder> {
    for frame in rx.iter() {
        if latch.is_set() {
            continue;
        }
        if !encoder.is_ready() {
            note_drop(dropped, id, "encoder not ready");
            continue;
        }
        let pts = Duration::from_secs_f64(frame.position as f64 / sample_rate as f64);
        match encoder.encode(&frame.samples, pts) {
            Ok(()) => {
                fed.fetch_add(frame.samples.len() as u64 * 2, Ordering::Relaxed);
            }
            Err(reason) => {
                if latch.latch(SinkError::Encoder(reason.clone())) {
                    log::warn!("{}: encode failed at {:?}: {}", id, pts, reason);
                }
            }
        }
    }
    encoder
}
