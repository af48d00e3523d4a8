use crate::models::audio_models::{PcmFormat, SourceBuffer, SourceFormat, SourceSamples};
use crate::models::error::CaptureError;

/// Interpolation state carried from one callback to the next.
///
/// Output frame `k` sits at source position `k × source_rate / target_rate`.
/// Anchoring on whole-frame counters keeps the phase exact over long
/// sessions; `tail` is the previous buffer's last remixed frame, the left
/// neighbour for positions that fall between two buffers.
#[derive(Debug, Clone, Default)]
struct ResamplerContext {
    rate: f64,
    consumed: u64,
    emitted: u64,
    tail: Option<Vec<f32>>,
}

impl ResamplerContext {
    fn reset(&mut self, rate: f64) {
        *self = Self {
            rate,
            ..Self::default()
        };
    }
}

/// Converts hardware buffers into the session's canonical interleaved PCM16.
///
/// Remixes channels, resamples with linear interpolation and quantizes to
/// 16 bits. The only state kept between calls is the resampler phase, so a
/// stream split across any number of buffers yields the same output count
/// as one long buffer.
///
/// Remix rules: N → 1 averages all channels, 1 → 2 duplicates, N > 2 → 2
/// keeps the first two channels.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    source: SourceFormat,
    target: PcmFormat,
    resampler: ResamplerContext,
}

impl FormatConverter {
    /// Widest hardware layout accepted.
    pub const MAX_SOURCE_CHANNELS: u16 = 8;

    /// Validate the native source format against the canonical target.
    ///
    /// Failure here aborts session start.
    pub fn new(source: SourceFormat, target: PcmFormat) -> Result<Self, CaptureError> {
        if !(source.sample_rate.is_finite() && source.sample_rate > 0.0) {
            return Err(CaptureError::UnsupportedFormat(format!(
                "source sample rate {}",
                source.sample_rate
            )));
        }
        if source.channels == 0 || source.channels > Self::MAX_SOURCE_CHANNELS {
            return Err(CaptureError::UnsupportedFormat(format!(
                "source channel count {}",
                source.channels
            )));
        }
        if target.sample_rate == 0 || ![1, 2].contains(&target.channels) {
            return Err(CaptureError::UnsupportedFormat(format!(
                "target format {} Hz / {} ch",
                target.sample_rate, target.channels
            )));
        }
        Ok(Self {
            source,
            target,
            resampler: ResamplerContext::default(),
        })
    }

    pub fn source_format(&self) -> SourceFormat {
        self.source
    }

    /// Upper bound on the output samples one call produces for
    /// `source_frames` at `source_rate`:
    /// `⌈frames × target_rate / source_rate⌉ × target_channels`.
    pub fn output_capacity(&self, source_frames: usize, source_rate: f64) -> usize {
        let frames = if self.is_passthrough_rate(source_rate) {
            source_frames
        } else {
            (source_frames as f64 * self.target.sample_rate as f64 / source_rate).ceil() as usize
        };
        frames * self.target.channels as usize
    }

    /// Convert one callback buffer. Returns an empty vector for empty or
    /// malformed buffers (zero channels).
    ///
    /// When resampling, only the output frames whose source position has
    /// arrived are emitted; the remainder of the phase carries into the next
    /// call.
    pub fn convert(&mut self, buffer: &SourceBuffer<'_>) -> Vec<i16> {
        let frames = buffer.frame_count();
        if frames == 0 {
            return Vec::new();
        }
        let source_rate = if buffer.sample_rate.is_finite() && buffer.sample_rate > 0.0 {
            buffer.sample_rate
        } else {
            self.source.sample_rate
        };

        if self.is_passthrough_rate(source_rate) {
            self.resampler.reset(source_rate);
            if let Some(exact) = self.integer_passthrough(buffer, frames) {
                return exact;
            }
            return self.remix(buffer, frames).iter().map(|&s| to_i16(s)).collect();
        }
        let remixed = self.remix(buffer, frames);
        if self.resampler.rate != source_rate {
            log::debug!("resampling {} Hz -> {} Hz", source_rate, self.target.sample_rate);
            self.resampler.reset(source_rate);
        }

        let channels = self.target.channels as usize;
        let target_rate = self.target.sample_rate as f64;
        let last = (frames - 1) as f64;
        let mut output = Vec::with_capacity(self.output_capacity(frames, source_rate));
        let ctx = &mut self.resampler;

        loop {
            // Position relative to this buffer; -1 < position < 0 lands
            // between the previous tail and frame 0.
            let position = ctx.emitted as f64 * source_rate / target_rate - ctx.consumed as f64;
            if position > last {
                break;
            }
            let floor = position.floor();
            let fraction = (position - floor) as f32;
            for ch in 0..channels {
                let (a, b) = if floor < 0.0 {
                    let left = ctx.tail.as_ref().map_or(remixed[ch], |tail| tail[ch]);
                    (left, remixed[ch])
                } else {
                    let index = floor as usize;
                    let next = (index + 1).min(frames - 1);
                    (remixed[index * channels + ch], remixed[next * channels + ch])
                };
                output.push(to_i16(a + (b - a) * fraction));
            }
            ctx.emitted += 1;
        }
        ctx.consumed += frames as u64;
        ctx.tail = Some(remixed[(frames - 1) * channels..].to_vec());
        output
    }

    /// Integer input already in the target layout skips the float path:
    /// I16 is copied, I32 keeps its top 16 bits.
    fn integer_passthrough(&self, buffer: &SourceBuffer<'_>, frames: usize) -> Option<Vec<i16>> {
        if buffer.channels != self.target.channels {
            return None;
        }
        let len = frames * buffer.channels as usize;
        match buffer.samples {
            SourceSamples::I16(samples) => Some(samples[..len].to_vec()),
            SourceSamples::I32(samples) => Some(samples[..len].iter().map(|&s| (s >> 16) as i16).collect()),
            SourceSamples::F32(_) => None,
        }
    }

    fn is_passthrough_rate(&self, source_rate: f64) -> bool {
        (source_rate - self.target.sample_rate as f64).abs() < 0.01
    }

    /// Remix to the target channel count, normalized to `[-1.0, 1.0]`.
    fn remix(&self, buffer: &SourceBuffer<'_>, frames: usize) -> Vec<f32> {
        let in_channels = buffer.channels as usize;
        let out_channels = self.target.channels as usize;
        let samples = &buffer.samples;

        let mut out = Vec::with_capacity(frames * out_channels);
        for frame in 0..frames {
            let base = frame * in_channels;
            match (in_channels, out_channels) {
                (_, 1) => {
                    let sum: f32 = (0..in_channels).map(|ch| samples.normalized(base + ch)).sum();
                    out.push(sum / in_channels as f32);
                }
                (1, _) => {
                    let s = samples.normalized(base);
                    out.push(s);
                    out.push(s);
                }
                _ => {
                    out.push(samples.normalized(base));
                    out.push(samples.normalized(base + 1));
                }
            }
        }
        out
    }
}

/// Quantize a normalized sample to 16 bits, clamping out-of-range values.
#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}
