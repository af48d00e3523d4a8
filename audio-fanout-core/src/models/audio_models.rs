use serde::{Deserialize, Serialize};

/// Bits per sample of the canonical format. Fixed for every session.
pub const PCM_BITS_PER_SAMPLE: u16 = 16;

/// Bytes per sample of the canonical format.
pub const PCM_BYTES_PER_SAMPLE: u16 = PCM_BITS_PER_SAMPLE / 8;

/// The canonical interleaved PCM16 format all sinks consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * PCM_BYTES_PER_SAMPLE
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// Sample representation delivered by the capture hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    F32,
    I16,
    I32,
}

/// Native format a capture source reports once at start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceFormat {
    pub sample_rate: f64,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// Interleaved samples in the hardware's representation.
#[derive(Debug, Clone, Copy)]
pub enum SourceSamples<'a> {
    F32(&'a [f32]),
    I16(&'a [i16]),
    I32(&'a [i32]),
}

impl SourceSamples<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(s) => s.len(),
            Self::I16(s) => s.len(),
            Self::I32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_format(&self) -> SampleFormat {
        match self {
            Self::F32(_) => SampleFormat::F32,
            Self::I16(_) => SampleFormat::I16,
            Self::I32(_) => SampleFormat::I32,
        }
    }

    /// Sample at `index` normalized to `[-1.0, 1.0]`.
    #[inline]
    pub(crate) fn normalized(&self, index: usize) -> f32 {
        match self {
            Self::F32(s) => s[index],
            Self::I16(s) => s[index] as f32 / 32768.0,
            Self::I32(s) => s[index] as f32 / 2_147_483_648.0,
        }
    }
}

/// One buffer handed over by a capture callback.
///
/// `sample_rate` is the running hardware rate, which may drift from the
/// native format reported at start (e.g. after a route change).
#[derive(Debug, Clone, Copy)]
pub struct SourceBuffer<'a> {
    pub samples: SourceSamples<'a>,
    pub sample_rate: f64,
    pub channels: u16,
}

impl SourceBuffer<'_> {
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Immutable view over one converted buffer of canonical PCM16 samples.
///
/// Lives for a single callback invocation. Sinks that need the data beyond
/// `write` copy it.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    samples: &'a [i16],
    format: PcmFormat,
    position: u64,
}

impl<'a> AudioFrame<'a> {
    pub fn new(samples: &'a [i16], format: PcmFormat, position: u64) -> Self {
        Self {
            samples,
            format,
            position,
        }
    }

    pub fn samples(&self) -> &'a [i16] {
        self.samples
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    /// Session-wide index of this frame's first sample frame.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Presentation time of the first sample, in seconds since session start.
    pub fn presentation_time_secs(&self) -> f64 {
        self.position as f64 / self.format.sample_rate as f64
    }

    /// Little-endian PCM16 bytes, as written to WAV and the live stream.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.samples.len() * 2);
        for sample in self.samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        data
    }
}

/// Loudness snapshot in dBFS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeLevels {
    pub current_db: f32,
    pub peak_db: f32,
}

/// An audio input device available for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Counters for debugging a capture session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionDiagnostics {
    pub callback_count: u64,
    pub frames_converted: u64,
    pub frames_ignored: u64,
    pub live_frames_dropped: u64,
    pub chunks_persisted: u64,
    pub chunk_save_failures: u64,
    pub source_format: String,
}
