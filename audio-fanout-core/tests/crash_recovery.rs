use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;

use audio_fanout_core::processing::wav_format::{self, WAV_HEADER_SIZE};
use audio_fanout_core::{
    pending_recordings, recover_to_wav, repair_wav_header, AudioSource, CaptureCallback, CaptureError,
    CaptureSource, ChunkStore, FileChunkStore, PcmFormat, RecordingManifest, SampleFormat, SessionConfig,
    SessionCoordinator, SourceBuffer, SourceFormat, SourceSamples,
};

#[derive(Clone, Default)]
struct PushSource {
    callback: Arc<Mutex<Option<CaptureCallback>>>,
}

impl PushSource {
    fn push(&self, samples: &[i16]) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(SourceBuffer {
                samples: SourceSamples::I16(samples),
                sample_rate: 16000.0,
                channels: 1,
            });
        }
    }
}

impl CaptureSource for PushSource {
    fn is_available(&self) -> bool {
        true
    }
    fn native_format(&self) -> Result<SourceFormat, CaptureError> {
        Ok(SourceFormat {
            sample_rate: 16000.0,
            channels: 1,
            sample_format: SampleFormat::I16,
        })
    }
    fn start(&mut self, _buffer_frames: u32, callback: CaptureCallback) -> Result<(), CaptureError> {
        *self.callback.lock() = Some(callback);
        Ok(())
    }
    fn pause(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
    fn resume(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
    fn stop(&mut self) -> Result<(), CaptureError> {
        *self.callback.lock() = None;
        Ok(())
    }
    fn device_info(&self) -> AudioSource {
        AudioSource {
            id: "push".into(),
            name: "Push Source".into(),
            is_default: true,
        }
    }
}

#[test]
fn persisted_chunks_rebuild_the_same_audio() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileChunkStore::open(dir.path().join("chunks")).unwrap());
    let source = PushSource::default();
    let mut session = SessionCoordinator::new(source.clone()).with_chunk_store(store.clone());

    let config = SessionConfig {
        sample_rate: 16000,
        output_directory: dir.path().join("out"),
        recording_id: Some("meeting-1".into()),
        persist_chunks: true,
        retain_chunks_after_stop: true,
        chunk_duration_ms: 10,
        ..Default::default()
    };
    session.start(config, Vec::new()).unwrap();
    for block in 0..12i16 {
        let samples: Vec<i16> = (0..100).map(|i| block * 100 + i).collect();
        source.push(&samples);
    }
    let report = session.stop().unwrap();
    let wav_path = report.sink("wav").unwrap().output_path.clone().unwrap();
    drop(session);
    drop(store);

    // A fresh process only has the chunk directory to go on.
    let reopened = FileChunkStore::open(dir.path().join("chunks")).unwrap();
    assert_eq!(pending_recordings(&reopened, &[]).unwrap(), vec!["meeting-1".to_string()]);
    let chunks = reopened.get_chunks("meeting-1").unwrap();
    assert_eq!(chunks.len(), 8);
    assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index == i as u64));

    let rebuilt_path = dir.path().join("recovered").join("meeting-1.wav");
    let recovered = recover_to_wav(&reopened, "meeting-1", &rebuilt_path).unwrap();
    assert_eq!(recovered.bytes, 2400);
    assert_eq!(fs::read(&rebuilt_path).unwrap(), fs::read(&wav_path).unwrap());
    assert!(pending_recordings(&reopened, &[]).unwrap().is_empty());
}

#[test]
fn crashed_session_leaves_recoverable_state() {
    let dir = tempfile::tempdir().unwrap();
    let format = PcmFormat::new(16000, 1);

    // What a killed process leaves behind: chunks with a gap-free prefix, a
    // manifest, and a WAV still carrying its placeholder header.
    {
        let store = FileChunkStore::open(dir.path().join("chunks")).unwrap();
        store
            .put_manifest(&RecordingManifest::new("crashed", format, None))
            .unwrap();
        store.save_chunk("crashed", 0, &[1, 0, 2, 0]).unwrap();
        store.save_chunk("crashed", 1, &[3, 0]).unwrap();
    }
    let wav_path = dir.path().join("recording_crashed.wav");
    let mut partial = wav_format::generate_placeholder_header(format).to_vec();
    partial.extend_from_slice(&[1, 0, 2, 0, 3, 0, 9]);
    fs::write(&wav_path, &partial).unwrap();

    let header = wav_format::parse_wav_header(&partial).unwrap();
    assert_eq!(header.data_size, wav_format::placeholder_data_size(format));

    assert_eq!(repair_wav_header(&wav_path).unwrap(), 6);
    let repaired = fs::read(&wav_path).unwrap();
    assert_eq!(repaired.len(), WAV_HEADER_SIZE + 6);
    assert_eq!(wav_format::parse_wav_header(&repaired).unwrap().data_size, 6);

    let store = FileChunkStore::open(dir.path().join("chunks")).unwrap();
    let rebuilt = dir.path().join("rebuilt.wav");
    recover_to_wav(&store, "crashed", &rebuilt).unwrap();
    assert_eq!(fs::read(&rebuilt).unwrap(), repaired);
    assert!(store.list_recording_ids().unwrap().is_empty());
}
