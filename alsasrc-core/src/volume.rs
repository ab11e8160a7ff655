//! Normalized-to-hardware volume mapping. Round-trip law:
//! `from_alsa_volume(to_alsa_volume(v)) == v` modulo rounding to one step,
//! for `v` in the normalized range and a non-degenerate hardware range.

use thiserror::Error;

/// `PA_VOLUME_NORM` equivalent: the normalized volume representing 0dB /
/// unity gain.
pub const VOLUME_NORM: u32 = 0x10000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HwVolumeRange {
    min: i64,
    max: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("hardware volume range [{min}, {max}] is too narrow for hardware volume control")]
pub struct RangeTooNarrow {
    min: i64,
    max: i64,
}

impl HwVolumeRange {
    /// Hardware ranges with `max - min < 3` steps decline hardware volume
    /// control; the caller should fall back to a software volume path.
    pub fn new(min: i64, max: i64) -> Result<Self, RangeTooNarrow> {
        if max - min < 3 {
            return Err(RangeTooNarrow { min, max });
        }
        Ok(HwVolumeRange { min, max })
    }

    pub fn span(&self) -> i64 {
        self.max - self.min
    }

    pub fn to_alsa_volume(&self, normalized: u32) -> i64 {
        let scaled = (i64::from(normalized) * self.span() + i64::from(VOLUME_NORM) / 2)
            / i64::from(VOLUME_NORM);
        (self.min + scaled).clamp(self.min, self.max)
    }

    pub fn from_alsa_volume(&self, raw: i64) -> u32 {
        let raw = raw.clamp(self.min, self.max);
        let numerator = (raw - self.min) * i64::from(VOLUME_NORM) + self.span() / 2;
        u32::try_from(numerator / self.span()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_range_is_declined() {
        assert!(HwVolumeRange::new(0, 2).is_err());
        assert!(HwVolumeRange::new(0, 3).is_ok());
    }

    #[test]
    fn round_trip_within_one_step() {
        let range = HwVolumeRange::new(0, 31).unwrap();
        let step_error = (VOLUME_NORM as i64 / range.span()).max(1) as u32;

        for v in (0..=VOLUME_NORM).step_by(997) {
            let raw = range.to_alsa_volume(v);
            let back = range.from_alsa_volume(raw);
            let diff = (back as i64 - v as i64).unsigned_abs() as u32;
            assert!(diff <= step_error, "v={v} raw={raw} back={back} diff={diff}");
        }
    }

    #[test]
    fn endpoints_round_trip_exactly() {
        let range = HwVolumeRange::new(0, 100).unwrap();
        assert_eq!(range.from_alsa_volume(range.to_alsa_volume(0)), 0);
        assert_eq!(range.from_alsa_volume(range.to_alsa_volume(VOLUME_NORM)), VOLUME_NORM);
    }
}
