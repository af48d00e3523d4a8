use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};

use crate::models::audio_models::{
    AmplitudeLevels, AudioFrame, AudioSource, PcmFormat, SessionDiagnostics, SourceBuffer,
};
use crate::models::config::{InterruptionPolicy, SessionConfig};
use crate::models::error::CaptureError;
use crate::models::recording_result::SessionReport;
use crate::models::state::{Interruption, SessionState};
use crate::processing::amplitude_meter::AmplitudeMeter;
use crate::processing::format_converter::FormatConverter;
use crate::session::fanout::OutputFanout;
use crate::session::state_machine::{retry_with_backoff, PauseCause, SessionStateMachine};
use crate::sinks::container_writer::ContainerWriter;
use crate::sinks::live_stream::{LiveStream, LiveStreamReceiver};
use crate::storage::chunk_persister::{ChunkPersister, PersistStats};
use crate::storage::chunk_store::ChunkStore;
use crate::traits::audio_session::{AudioSessionControl, AudioSessionLease};
use crate::traits::capture_source::{CaptureCallback, CaptureSource};
use crate::traits::session_delegate::SessionDelegate;
use crate::traits::sink::Sink;

/// Live stream slot shared by the coordinator and the callback. Survives
/// across sessions so a consumer can attach before `start`.
#[derive(Default)]
struct LiveSlot {
    stream: RwLock<Option<LiveStream>>,
    dropped_before: AtomicU64,
}

impl LiveSlot {
    fn replace(&self, stream: Option<LiveStream>) {
        let old = std::mem::replace(&mut *self.stream.write(), stream);
        if let Some(old) = old {
            self.dropped_before.fetch_add(old.frames_dropped(), Ordering::Relaxed);
        }
    }

    fn frames_dropped(&self) -> u64 {
        let current = self.stream.read().as_ref().map_or(0, LiveStream::frames_dropped);
        self.dropped_before.load(Ordering::Relaxed) + current
    }
}

/// Everything the capture callback touches for one session.
struct Pipeline {
    /// Locked once per callback; holds the resampler phase.
    converter: Mutex<FormatConverter>,
    format: PcmFormat,
    fanout: OutputFanout,
    meter: Arc<AmplitudeMeter>,
    live: Arc<LiveSlot>,
    persister: RwLock<Option<ChunkPersister>>,
    persist_stats: Mutex<Option<PersistStats>>,

    attached: AtomicBool,
    paused: AtomicBool,
    position: AtomicU64,

    callbacks: AtomicU64,
    frames_converted: AtomicU64,
    frames_ignored: AtomicU64,
}

impl Pipeline {
    /// Capture-thread entry point. Never blocks on I/O: every consumer
    /// either hands off to its own worker or drops.
    fn on_buffer(&self, buffer: SourceBuffer<'_>) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if !self.attached.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
            self.frames_ignored
                .fetch_add(buffer.frame_count() as u64, Ordering::Relaxed);
            return;
        }

        let samples = self.converter.lock().convert(&buffer);
        if samples.is_empty() {
            return;
        }
        let frames = (samples.len() / self.format.channels.max(1) as usize) as u64;
        let position = self.position.fetch_add(frames, Ordering::AcqRel);
        self.frames_converted.fetch_add(frames, Ordering::Relaxed);

        let frame = AudioFrame::new(&samples, self.format, position);
        self.fanout.write(&frame);
        self.meter.update(&samples);
        if let Some(live) = self.live.stream.read().as_ref() {
            live.broadcast(&frame);
        }
        if let Some(persister) = self.persister.read().as_ref() {
            persister.submit(&frame);
        }
    }

    fn close_persister(&self) -> Option<PersistStats> {
        let mut persister = self.persister.write().take()?;
        let stats = persister.close();
        *self.persist_stats.lock() = Some(stats);
        Some(stats)
    }

    /// `(saved, failed)` from the running persister, or the final totals.
    fn persist_counts(&self) -> (u64, u64) {
        if let Some(p) = self.persister.read().as_ref() {
            return (p.chunks_saved(), p.save_failures());
        }
        self.persist_stats
            .lock()
            .map_or((0, 0), |s| (s.chunks_saved, s.save_failures))
    }

    fn duration_secs(&self) -> f64 {
        self.position.load(Ordering::Acquire) as f64 / self.format.sample_rate as f64
    }
}

struct ActiveSession {
    config: SessionConfig,
    recording_id: String,
    pipeline: Arc<Pipeline>,
    persisting: bool,
    _lease: Option<AudioSessionLease>,
}

/// Drives one capture source into a set of sinks.
///
/// Data flow:
/// ```text
/// [CaptureSource] ─callback─▶ FormatConverter ─▶ AudioFrame ─┬─▶ Sink (WAV container)
///                                                            ├─▶ Sink (encoder) ...
///                                                            ├─▶ AmplitudeMeter
///                                                            ├─▶ LiveStream
///                                                            └─▶ ChunkPersister
/// ```
///
/// `stop` is a two-phase barrier: the callback is detached and the source
/// stopped first, then every sink is finalized concurrently. The report is
/// only built once all of them are terminal.
pub struct SessionCoordinator<C: CaptureSource> {
    source: C,
    delegate: Option<Arc<dyn SessionDelegate>>,
    chunk_store: Option<Arc<dyn ChunkStore>>,
    audio_session: Option<Arc<dyn AudioSessionControl>>,
    machine: SessionStateMachine,
    meter: Arc<AmplitudeMeter>,
    live: Arc<LiveSlot>,
    active: Option<ActiveSession>,
    last_pipeline: Option<Arc<Pipeline>>,
    report: Option<SessionReport>,
}

impl<C: CaptureSource> SessionCoordinator<C> {
    pub fn new(source: C) -> Self {
        Self {
            source,
            delegate: None,
            chunk_store: None,
            audio_session: None,
            machine: SessionStateMachine::new(),
            meter: Arc::new(AmplitudeMeter::new()),
            live: Arc::new(LiveSlot::default()),
            active: None,
            last_pipeline: None,
            report: None,
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn SessionDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Store used when `persist_chunks` is set.
    pub fn with_chunk_store(mut self, store: Arc<dyn ChunkStore>) -> Self {
        self.chunk_store = Some(store);
        self
    }

    pub fn with_audio_session(mut self, control: Arc<dyn AudioSessionControl>) -> Self {
        self.audio_session = Some(control);
        self
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn recording_id(&self) -> Option<&str> {
        match &self.active {
            Some(active) => Some(active.recording_id.as_str()),
            None => self.report.as_ref().map(|r| r.recording_id.as_str()),
        }
    }

    pub fn levels(&self) -> AmplitudeLevels {
        self.meter.read()
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    pub fn available_audio_sources(&self) -> Result<Vec<AudioSource>, CaptureError> {
        let mut sources = Vec::new();
        if self.source.is_available() {
            sources.push(self.source.device_info());
        }
        Ok(sources)
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        let pipeline = self
            .active
            .as_ref()
            .map(|a| &a.pipeline)
            .or(self.last_pipeline.as_ref());
        let Some(pipeline) = pipeline else {
            return SessionDiagnostics {
                live_frames_dropped: self.live.frames_dropped(),
                ..Default::default()
            };
        };
        let (chunks_persisted, chunk_save_failures) = pipeline.persist_counts();
        SessionDiagnostics {
            callback_count: pipeline.callbacks.load(Ordering::Relaxed),
            frames_converted: pipeline.frames_converted.load(Ordering::Relaxed),
            frames_ignored: pipeline.frames_ignored.load(Ordering::Relaxed),
            live_frames_dropped: self.live.frames_dropped(),
            chunks_persisted,
            chunk_save_failures,
            source_format: format!("{:?}", pipeline.converter.lock().source_format()),
        }
    }

    /// Route converted PCM to a new live consumer, replacing any previous one.
    pub fn attach_live_stream(&self) -> LiveStreamReceiver {
        let (stream, receiver) = LiveStream::channel();
        self.live.replace(Some(stream));
        receiver
    }

    pub fn detach_live_stream(&self) {
        self.live.replace(None);
    }

    /// Report of the last finished session.
    pub fn results(&self) -> Result<&SessionReport, CaptureError> {
        self.report
            .as_ref()
            .ok_or_else(|| CaptureError::InvalidState("no session has finished".into()))
    }

    /// Start a session. Transitions: stopped → recording.
    ///
    /// Format, device and configuration problems fail here before any sink
    /// is started. A sink that fails to start is reported and left out; the
    /// session runs with the rest.
    pub fn start(&mut self, config: SessionConfig, sinks: Vec<Box<dyn Sink>>) -> Result<(), CaptureError> {
        if !self.machine.state().is_stopped() {
            return Err(CaptureError::InvalidState(format!(
                "cannot start while {}",
                self.machine.state()
            )));
        }
        config.validate()?;
        let store = match (config.persist_chunks, &self.chunk_store) {
            (false, _) => None,
            (true, Some(store)) => Some(Arc::clone(store)),
            (true, None) => {
                return Err(CaptureError::ConfigurationFailed(
                    "chunk persistence requested without a chunk store".into(),
                ))
            }
        };
        if !self.source.is_available() {
            return Err(CaptureError::DeviceNotAvailable);
        }

        let native = self.source.native_format()?;
        let format = config.pcm_format();
        let converter = FormatConverter::new(native, format)?;

        let recording_id = config
            .recording_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut all_sinks: Vec<Box<dyn Sink>> = Vec::with_capacity(sinks.len() + 1);
        if config.write_container {
            all_sinks.push(Box::new(ContainerWriter::for_recording(
                &config.output_directory,
                &recording_id,
            )));
        }
        all_sinks.extend(sinks);
        let fanout = OutputFanout::new(all_sinks, self.delegate.clone())?;

        let lease = self
            .audio_session
            .as_ref()
            .map(|control| AudioSessionLease::acquire(Arc::clone(control)))
            .transpose()?;

        // Frames that arrive before the sinks are open are counted and ignored.
        let pipeline = Arc::new(Pipeline {
            converter: Mutex::new(converter),
            format,
            fanout,
            meter: Arc::clone(&self.meter),
            live: Arc::clone(&self.live),
            persister: RwLock::new(None),
            persist_stats: Mutex::new(None),
            attached: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            position: AtomicU64::new(0),
            callbacks: AtomicU64::new(0),
            frames_converted: AtomicU64::new(0),
            frames_ignored: AtomicU64::new(0),
        });
        let callback: CaptureCallback = {
            let pipeline = Arc::clone(&pipeline);
            Arc::new(move |buffer: SourceBuffer<'_>| pipeline.on_buffer(buffer))
        };
        self.source.start(config.buffer_frames, callback)?;

        let mut persisting = false;
        if let Some(store) = store {
            match ChunkPersister::spawn(store, &recording_id, format, config.codec, config.chunk_duration_ms) {
                Ok(persister) => {
                    *pipeline.persister.write() = Some(persister);
                    persisting = true;
                }
                Err(e) => {
                    log::error!("chunk persistence disabled for {}: {}", recording_id, e);
                    self.notify_error(&e);
                }
            }
        }

        self.meter.reset();
        let started = pipeline.fanout.start_all(format);
        if started == 0 && !pipeline.fanout.is_empty() {
            log::warn!("no sink started for {}; only live and persisted output remain", recording_id);
        }
        pipeline.attached.store(true, Ordering::Release);

        log::info!(
            "session {} recording {} Hz / {} ch from {:?}",
            recording_id,
            format.sample_rate,
            format.channels,
            native
        );

        self.report = None;
        self.last_pipeline = None;
        self.active = Some(ActiveSession {
            config,
            recording_id,
            pipeline,
            persisting,
            _lease: lease,
        });
        self.machine.start()?;
        self.notify_state();
        Ok(())
    }

    /// Suspend capture, keeping every sink open. No-op unless recording.
    pub fn pause(&mut self) -> Result<(), CaptureError> {
        self.pause_with(PauseCause::User)
    }

    fn pause_with(&mut self, cause: PauseCause) -> Result<(), CaptureError> {
        let Some(active) = &self.active else {
            return Ok(());
        };
        if !self.machine.pause(cause) {
            return Ok(());
        }
        active.pipeline.paused.store(true, Ordering::Release);
        if let Err(e) = self.source.pause() {
            // An interruption may already have taken the hardware.
            log::warn!("capture source pause failed: {}", e);
        }
        log::info!("session {} paused ({:?})", active.recording_id, cause);
        self.notify_state();
        Ok(())
    }

    /// Re-acquire the hardware with exponential backoff. No-op unless paused.
    ///
    /// When every attempt fails the session is stopped through the normal
    /// path, so the sinks are finalized, and the resume error is returned.
    pub fn resume(&mut self) -> Result<(), CaptureError> {
        let Some(active) = &self.active else {
            return Ok(());
        };
        if !self.machine.can_resume() {
            return Ok(());
        }
        let policy = active.config.resume_retry;
        let source = &mut self.source;
        let result = retry_with_backoff(&policy, |_| source.resume(), thread::sleep);

        match result {
            Ok(attempts) => {
                active.pipeline.paused.store(false, Ordering::Release);
                self.machine.resumed();
                log::info!("session {} resumed after {} attempt(s)", active.recording_id, attempts);
                self.notify_state();
                Ok(())
            }
            Err(e) => {
                log::error!("session {}: {}", active.recording_id, e);
                self.notify_error(&e);
                self.finish(false)?;
                Err(e)
            }
        }
    }

    /// Finalize every sink and report. Transitions: recording/paused → stopped.
    pub fn stop(&mut self) -> Result<SessionReport, CaptureError> {
        self.finish(false)
    }

    /// Stop, then delete every output and persisted chunk of the session.
    pub fn cancel(&mut self) -> Result<SessionReport, CaptureError> {
        self.finish(true)
    }

    /// Apply an audio-session interruption according to the session's policy.
    pub fn handle_interruption(&mut self, event: Interruption) -> Result<(), CaptureError> {
        let Some(active) = &self.active else {
            return Ok(());
        };
        let policy = active.config.interruption_policy;
        let auto_resume = active.config.auto_resume_after_interruption;
        match event {
            Interruption::Began => {
                if !self.machine.state().is_recording() {
                    return Ok(());
                }
                match policy {
                    InterruptionPolicy::Pause => self.pause_with(PauseCause::Interruption),
                    InterruptionPolicy::Stop => {
                        self.notify_error(&CaptureError::Interrupted("audio session interrupted".into()));
                        self.finish(false).map(|_| ())
                    }
                }
            }
            Interruption::Ended { should_resume } => {
                if should_resume && auto_resume && self.machine.pause_cause() == Some(PauseCause::Interruption) {
                    self.resume()
                } else {
                    Ok(())
                }
            }
            Interruption::Lost => {
                self.notify_error(&CaptureError::Interrupted("capture device lost".into()));
                self.finish(false).map(|_| ())
            }
        }
    }

    fn finish(&mut self, cancelled: bool) -> Result<SessionReport, CaptureError> {
        self.machine.stop()?;
        let Some(active) = self.active.take() else {
            return Err(CaptureError::InvalidState("session is not running".into()));
        };
        let pipeline = Arc::clone(&active.pipeline);

        // Phase 1: no frame reaches a sink after this.
        pipeline.attached.store(false, Ordering::Release);
        if let Err(e) = self.source.stop() {
            log::warn!("capture source stop failed: {}", e);
        }

        // Phase 2: drain and finalize everything in parallel.
        let persisted = thread::scope(|scope| {
            let persister = scope.spawn(|| pipeline.close_persister());
            pipeline.fanout.stop_all();
            persister.join().ok().flatten()
        });
        pipeline.fanout.release_all();

        if cancelled {
            pipeline.fanout.discard_all();
        }
        let outcomes = pipeline.fanout.outcomes();
        let report = SessionReport::new(&active.recording_id, pipeline.duration_secs(), outcomes, cancelled);

        if active.persisting {
            let keep = !cancelled && (active.config.retain_chunks_after_stop || !report.any_succeeded());
            if let Some(stats) = persisted {
                log::debug!(
                    "session {}: {} chunks persisted, {} failures",
                    active.recording_id,
                    stats.chunks_saved,
                    stats.save_failures
                );
            }
            if !keep {
                self.delete_chunks(&active.recording_id);
            }
        }

        log::info!(
            "session {} {} after {:.2}s ({} sink(s) ok)",
            active.recording_id,
            if cancelled { "cancelled" } else { "stopped" },
            report.duration_secs,
            report.sinks.values().filter(|o| o.is_ok()).count()
        );

        drop(active);
        self.last_pipeline = Some(pipeline);
        self.report = Some(report.clone());
        self.notify_state();
        if let Some(delegate) = &self.delegate {
            delegate.on_session_finished(&report);
        }
        Ok(report)
    }

    fn delete_chunks(&self, recording_id: &str) {
        let Some(store) = &self.chunk_store else {
            return;
        };
        if let Err(e) = store.delete_chunks(recording_id) {
            log::error!("failed to delete chunks for {}: {}", recording_id, e);
            self.notify_error(&e);
        }
    }

    fn notify_state(&self) {
        if let Some(delegate) = &self.delegate {
            delegate.on_state_changed(self.machine.state());
        }
    }

    fn notify_error(&self, error: &CaptureError) {
        if let Some(delegate) = &self.delegate {
            delegate.on_error(error);
        }
    }
}

impl<C: CaptureSource> Drop for SessionCoordinator<C> {
    fn drop(&mut self) {
        if self.active.is_some() {
            log::warn!("session dropped while {}; stopping", self.machine.state());
            let _ = self.finish(false);
        }
    }
}
