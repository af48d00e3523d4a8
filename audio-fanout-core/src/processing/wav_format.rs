//! RIFF/WAVE header codec for canonical PCM16 files.
//!
//! Headers are written twice per file: once at start with a placeholder
//! data length, once at finalize with the real one.

use crate::models::audio_models::{PcmFormat, PCM_BITS_PER_SAMPLE};
use crate::models::error::CaptureError;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Bytes of the RIFF chunk that follow the size field, excluding data.
const RIFF_OVERHEAD: u32 = 36;

/// Generate a 44-byte WAV RIFF header for 16-bit PCM.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * 2
/// [32-33]  block_align = channels * 2
/// [34-35]  16
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: PcmFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let chunk_size = RIFF_OVERHEAD.saturating_add(data_size);

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&PCM_BITS_PER_SAMPLE.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Largest block-aligned data length whose RIFF size still fits in `u32`.
///
/// Written at start so a file cut short by a crash still parses; players
/// stop at end of file.
pub fn placeholder_data_size(format: PcmFormat) -> u32 {
    let align = format.block_align().max(1) as u32;
    (u32::MAX - RIFF_OVERHEAD) / align * align
}

/// Header with the crash-safe placeholder data length.
pub fn generate_placeholder_header(format: PcmFormat) -> [u8; WAV_HEADER_SIZE] {
    generate_wav_header(format, placeholder_data_size(format))
}

/// Clamp a byte count to what a WAV data chunk can declare, keeping whole frames.
pub fn declarable_data_size(format: PcmFormat, bytes: u64) -> u32 {
    let max = placeholder_data_size(format) as u64;
    let align = format.block_align().max(1) as u64;
    (bytes.min(max) / align * align) as u32
}

/// Fields read back from a 44-byte PCM header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeaderInfo {
    pub format: PcmFormat,
    pub riff_size: u32,
    pub data_size: u32,
    pub bits_per_sample: u16,
}

/// Parse a canonical 44-byte PCM header.
pub fn parse_wav_header(bytes: &[u8]) -> Result<WavHeaderInfo, CaptureError> {
    if bytes.len() < WAV_HEADER_SIZE {
        return Err(CaptureError::StorageError(format!(
            "wav header truncated: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(CaptureError::StorageError("not a RIFF/WAVE file".into()));
    }
    if &bytes[12..16] != b"fmt " || &bytes[36..40] != b"data" {
        return Err(CaptureError::StorageError("unexpected chunk layout".into()));
    }
    let format_code = u16_at(bytes, 20);
    if format_code != 1 {
        return Err(CaptureError::UnsupportedFormat(format!("wav format code {}", format_code)));
    }

    Ok(WavHeaderInfo {
        format: PcmFormat::new(u32_at(bytes, 24), u16_at(bytes, 22)),
        riff_size: u32_at(bytes, 4),
        data_size: u32_at(bytes, 40),
        bits_per_sample: u16_at(bytes, 34),
    })
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_magic_and_layout() {
        let header = generate_wav_header(PcmFormat::new(48000, 2), 0);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u16::from_le_bytes([header[20], header[21]]), 1);
        assert_eq!(u32::from_le_bytes([header[16], header[17], header[18], header[19]]), 16);
    }

    #[test]
    fn header_48khz_stereo() {
        let header = generate_wav_header(PcmFormat::new(48000, 2), 9600);
        let info = parse_wav_header(&header).unwrap();

        assert_eq!(info.format, PcmFormat::new(48000, 2));
        assert_eq!(info.data_size, 9600);
        assert_eq!(info.riff_size, 36 + 9600);
        assert_eq!(info.bits_per_sample, 16);

        let byte_rate = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);
        assert_eq!(byte_rate, 192000);
        let block_align = u16::from_le_bytes([header[32], header[33]]);
        assert_eq!(block_align, 4);
    }

    #[test]
    fn header_16khz_mono() {
        let header = generate_wav_header(PcmFormat::new(16000, 1), 320);
        let byte_rate = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);
        assert_eq!(byte_rate, 32000);
        assert_eq!(u16::from_le_bytes([header[32], header[33]]), 2);
    }

    #[test]
    fn placeholder_is_block_aligned_and_fits() {
        for channels in [1, 2] {
            let format = PcmFormat::new(44100, channels);
            let size = placeholder_data_size(format);
            assert_eq!(size % format.block_align() as u32, 0);
            let info = parse_wav_header(&generate_placeholder_header(format)).unwrap();
            assert_eq!(info.data_size, size);
            assert_eq!(info.riff_size as u64, 36 + size as u64);
        }
    }

    #[test]
    fn declarable_size_clamps_and_aligns() {
        let format = PcmFormat::new(48000, 2);
        assert_eq!(declarable_data_size(format, 10), 8);
        assert_eq!(declarable_data_size(format, u64::MAX), placeholder_data_size(format));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_wav_header(b"RIFF").is_err());
        let mut header = generate_wav_header(PcmFormat::new(8000, 1), 0);
        header[0..4].copy_from_slice(b"RIFX");
        assert!(parse_wav_header(&header).is_err());
    }
}
