use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioFrame, PcmFormat};
use crate::models::error::{CaptureError, SinkError};
use crate::models::recording_result::SinkOutcome;
use crate::traits::session_delegate::SessionDelegate;
use crate::traits::sink::Sink;

/// One sink plus the fan-out's bookkeeping for it.
struct SinkSlot {
    id: String,
    sink: Mutex<Box<dyn Sink>>,
    started: AtomicBool,
    /// No more frames are delivered once set.
    excluded: AtomicBool,
    /// The delegate has been told about this sink's error.
    reported: AtomicBool,
    /// Errors the fan-out observed that the sink itself may not report.
    failure: Mutex<Option<SinkError>>,
}

impl SinkSlot {
    fn error(&self, sink: &dyn Sink) -> Option<SinkError> {
        sink.error().or_else(|| self.failure.lock().clone())
    }
}

/// Delivers every converted frame to a fixed set of sinks.
///
/// Each sink sits behind its own lock; nothing is shared between sinks, so
/// a sink that fails or stalls in `stop` never holds up the others. A sink
/// whose error latches is excluded from further writes and reported once to
/// the delegate.
pub struct OutputFanout {
    slots: Vec<SinkSlot>,
    delegate: Option<Arc<dyn SessionDelegate>>,
}

impl OutputFanout {
    /// Rejects duplicate sink ids: results are keyed by id.
    pub fn new(
        sinks: Vec<Box<dyn Sink>>,
        delegate: Option<Arc<dyn SessionDelegate>>,
    ) -> Result<Self, CaptureError> {
        let mut seen = HashSet::new();
        for sink in &sinks {
            if !seen.insert(sink.id().to_string()) {
                return Err(CaptureError::ConfigurationFailed(format!(
                    "duplicate sink id: {}",
                    sink.id()
                )));
            }
        }

        let slots = sinks
            .into_iter()
            .map(|sink| SinkSlot {
                id: sink.id().to_string(),
                sink: Mutex::new(sink),
                started: AtomicBool::new(false),
                excluded: AtomicBool::new(false),
                reported: AtomicBool::new(false),
                failure: Mutex::new(None),
            })
            .collect();
        Ok(Self { slots, delegate })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sinks still receiving frames.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.excluded.load(Ordering::Acquire))
            .count()
    }

    /// Start every sink. A sink that fails is excluded; the rest carry on.
    /// Returns how many started.
    pub fn start_all(&self, format: PcmFormat) -> usize {
        let mut started = 0;
        for slot in &self.slots {
            let result = slot.sink.lock().start(format);
            match result {
                Ok(()) => {
                    slot.started.store(true, Ordering::Release);
                    started += 1;
                }
                Err(e) => {
                    *slot.failure.lock() = Some(e.clone());
                    self.exclude(slot, &e);
                }
            }
        }
        log::info!("started {}/{} sinks", started, self.slots.len());
        started
    }

    /// Hand the frame to every healthy sink, in registration order.
    pub fn write(&self, frame: &AudioFrame<'_>) {
        for slot in &self.slots {
            if slot.excluded.load(Ordering::Acquire) {
                continue;
            }
            let error = {
                let mut sink = slot.sink.lock();
                sink.write(frame);
                sink.error()
            };
            if let Some(e) = error {
                self.exclude(slot, &e);
            }
        }
    }

    /// Drain and finalize every started sink concurrently; returns once all
    /// of them are terminal.
    pub fn stop_all(&self) {
        thread::scope(|scope| {
            for slot in self.slots.iter().filter(|s| s.started.load(Ordering::Acquire)) {
                let spawned = thread::Builder::new()
                    .name(format!("sink-stop-{}", slot.id))
                    .spawn_scoped(scope, move || self.stop_slot(slot));
                if let Err(e) = spawned {
                    log::warn!("{}: stopping inline, no thread: {}", slot.id, e);
                    self.stop_slot(slot);
                }
            }
        });
    }

    fn stop_slot(&self, slot: &SinkSlot) {
        let result = slot.sink.lock().stop();
        slot.started.store(false, Ordering::Release);
        if let Err(e) = result {
            self.exclude(slot, &e);
        }
    }

    pub fn release_all(&self) {
        for slot in &self.slots {
            slot.sink.lock().release();
        }
    }

    /// Delete every artifact. Discard failures are recorded on the sink's
    /// outcome.
    pub fn discard_all(&self) {
        for slot in &self.slots {
            let result = slot.sink.lock().discard();
            if let Err(e) = result {
                log::error!("{}: {}", slot.id, e);
                *slot.failure.lock() = Some(e);
            }
        }
    }

    pub fn outcomes(&self) -> BTreeMap<String, SinkOutcome> {
        self.slots
            .iter()
            .map(|slot| {
                let sink = slot.sink.lock();
                let outcome = SinkOutcome {
                    output_path: sink.output_path(),
                    error: slot.error(&**sink),
                    bytes_written: sink.bytes_written(),
                    frames_dropped: sink.frames_dropped(),
                    checksum: sink.checksum(),
                };
                (slot.id.clone(), outcome)
            })
            .collect()
    }

    fn exclude(&self, slot: &SinkSlot, error: &SinkError) {
        slot.excluded.store(true, Ordering::Release);
        if slot.reported.swap(true, Ordering::AcqRel) {
            return;
        }
        log::warn!("sink {} failed: {}", slot.id, error);
        if let Some(delegate) = &self.delegate {
            delegate.on_sink_error(&slot.id, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;
    use std::time::{Duration, Instant};

    /// Records frames; optionally fails at start, after `fail_after` writes,
    /// or blocks in stop.
    #[derive(Default)]
    struct Recorder {
        id: String,
        frames: Arc<AtomicU64>,
        fail_start: bool,
        fail_after: Option<u64>,
        stop_delay: Duration,
        error: Option<SinkError>,
    }

    impl Recorder {
        fn new(id: &str) -> Self {
            Self {
                id: id.into(),
                ..Default::default()
            }
        }
    }

    impl Sink for Recorder {
        fn id(&self) -> &str {
            &self.id
        }
        fn start(&mut self, _format: PcmFormat) -> Result<(), SinkError> {
            if self.fail_start {
                self.error = Some(SinkError::Start("refused".into()));
                return Err(SinkError::Start("refused".into()));
            }
            Ok(())
        }
        fn write(&mut self, _frame: &AudioFrame<'_>) {
            let n = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_after.is_some_and(|limit| n >= limit) {
                self.error = Some(SinkError::Write("disk full".into()));
            }
        }
        fn stop(&mut self) -> Result<(), SinkError> {
            std::thread::sleep(self.stop_delay);
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
        fn release(&mut self) {}
        fn output_path(&self) -> Option<PathBuf> {
            Some(PathBuf::from(format!("{}.out", self.id)))
        }
        fn error(&self) -> Option<SinkError> {
            self.error.clone()
        }
        fn discard(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Errors(Mutex<Vec<String>>);

    impl SessionDelegate for Errors {
        fn on_state_changed(&self, _state: crate::models::state::SessionState) {}
        fn on_sink_error(&self, sink_id: &str, _error: &SinkError) {
            self.0.lock().push(sink_id.to_string());
        }
        fn on_error(&self, _error: &CaptureError) {}
        fn on_session_finished(&self, _report: &crate::models::recording_result::SessionReport) {}
    }

    fn format() -> PcmFormat {
        PcmFormat::new(48000, 1)
    }

    #[test]
    fn duplicate_ids_rejected() {
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(Recorder::new("a")), Box::new(Recorder::new("a"))];
        assert!(matches!(
            OutputFanout::new(sinks, None),
            Err(CaptureError::ConfigurationFailed(_))
        ));
    }

    #[test]
    fn failing_sink_is_isolated() {
        let healthy = Recorder::new("healthy");
        let healthy_frames = Arc::clone(&healthy.frames);
        let flaky = Recorder {
            fail_after: Some(2),
            ..Recorder::new("flaky")
        };
        let flaky_frames = Arc::clone(&flaky.frames);
        let broken = Recorder {
            fail_start: true,
            ..Recorder::new("broken")
        };
        let delegate = Arc::new(Errors::default());

        let fanout = OutputFanout::new(
            vec![Box::new(healthy), Box::new(flaky), Box::new(broken)],
            Some(delegate.clone()),
        )
        .unwrap();
        assert_eq!(fanout.start_all(format()), 2);

        let samples = [0i16; 4];
        for i in 0..5 {
            fanout.write(&AudioFrame::new(&samples, format(), i * 4));
        }
        fanout.stop_all();

        assert_eq!(healthy_frames.load(Ordering::SeqCst), 5);
        assert_eq!(flaky_frames.load(Ordering::SeqCst), 2);
        assert_eq!(fanout.active_count(), 1);
        assert_eq!(*delegate.0.lock(), vec!["broken".to_string(), "flaky".to_string()]);

        let outcomes = fanout.outcomes();
        assert!(outcomes["healthy"].is_ok());
        assert_eq!(outcomes["flaky"].error, Some(SinkError::Write("disk full".into())));
        assert_eq!(outcomes["broken"].error, Some(SinkError::Start("refused".into())));
    }

    #[test]
    fn sinks_stop_concurrently() {
        let sinks: Vec<Box<dyn Sink>> = (0..4)
            .map(|i| {
                Box::new(Recorder {
                    stop_delay: Duration::from_millis(150),
                    ..Recorder::new(&format!("s{}", i))
                }) as Box<dyn Sink>
            })
            .collect();
        let fanout = OutputFanout::new(sinks, None).unwrap();
        fanout.start_all(format());

        let started = Instant::now();
        fanout.stop_all();
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
