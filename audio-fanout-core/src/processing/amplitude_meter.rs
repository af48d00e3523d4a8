use std::sync::atomic::{AtomicU32, Ordering};

use crate::models::audio_models::AmplitudeLevels;

/// Level reported for silence or before any frame arrived.
pub const SILENCE_FLOOR_DB: f32 = -160.0;

/// Running current/peak loudness in dBFS.
///
/// Levels are stored as `f32` bits in atomics: `update` runs on the capture
/// callback and `read` from any thread without taking a lock.
#[derive(Debug)]
pub struct AmplitudeMeter {
    current: AtomicU32,
    peak: AtomicU32,
}

impl AmplitudeMeter {
    pub fn new() -> Self {
        Self {
            current: AtomicU32::new(SILENCE_FLOOR_DB.to_bits()),
            peak: AtomicU32::new(SILENCE_FLOOR_DB.to_bits()),
        }
    }

    /// Measure one frame's samples.
    pub fn update(&self, samples: &[i16]) {
        let max = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let current = Self::to_dbfs(max);
        self.current.store(current.to_bits(), Ordering::Relaxed);

        let _ = self
            .peak
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                (current > f32::from_bits(bits)).then_some(current.to_bits())
            });
    }

    pub fn read(&self) -> AmplitudeLevels {
        AmplitudeLevels {
            current_db: f32::from_bits(self.current.load(Ordering::Relaxed)),
            peak_db: f32::from_bits(self.peak.load(Ordering::Relaxed)),
        }
    }

    /// Back to the floor, for a new session.
    pub fn reset(&self) {
        self.current.store(SILENCE_FLOOR_DB.to_bits(), Ordering::Relaxed);
        self.peak.store(SILENCE_FLOOR_DB.to_bits(), Ordering::Relaxed);
    }

    /// `20·log10(max / 32767)`, floored at [`SILENCE_FLOOR_DB`].
    fn to_dbfs(max_abs: u16) -> f32 {
        if max_abs == 0 {
            return SILENCE_FLOOR_DB;
        }
        let db = 20.0 * (max_abs as f32 / i16::MAX as f32).log10();
        db.max(SILENCE_FLOOR_DB)
    }
}

impl Default for AmplitudeMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn floor_before_any_frame() {
        let meter = AmplitudeMeter::new();
        let levels = meter.read();
        assert_eq!(levels.current_db, SILENCE_FLOOR_DB);
        assert_eq!(levels.peak_db, SILENCE_FLOOR_DB);
    }

    #[test]
    fn silence_reads_floor() {
        let meter = AmplitudeMeter::new();
        meter.update(&[0; 256]);
        assert_eq!(meter.read().current_db, SILENCE_FLOOR_DB);
    }

    #[test]
    fn full_scale_is_zero_dbfs() {
        let meter = AmplitudeMeter::new();
        meter.update(&[0, 100, i16::MAX, -5]);
        assert_relative_eq!(meter.read().current_db, 0.0, epsilon = 1e-4);

        // i16::MIN is one step louder than MAX; still ~0 dBFS
        meter.update(&[i16::MIN]);
        assert!(meter.read().current_db.abs() < 0.01);
    }

    #[test]
    fn half_scale_is_minus_six() {
        let meter = AmplitudeMeter::new();
        meter.update(&[16384, -3]);
        assert_relative_eq!(meter.read().current_db, -6.02, epsilon = 0.01);
    }

    #[test]
    fn peak_never_decreases() {
        let meter = AmplitudeMeter::new();
        meter.update(&[i16::MAX]);
        meter.update(&[1000]);
        meter.update(&[0]);

        let levels = meter.read();
        assert_eq!(levels.current_db, SILENCE_FLOOR_DB);
        assert_relative_eq!(levels.peak_db, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn reset_returns_to_floor() {
        let meter = AmplitudeMeter::new();
        meter.update(&[i16::MAX]);
        meter.reset();
        assert_eq!(meter.read().peak_db, SILENCE_FLOOR_DB);
    }
}
