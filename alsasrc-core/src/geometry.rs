use thiserror::Error;

use crate::spec::{FrameSize, SampleSpec};

/// Hardware buffer geometry and the timer-scheduling watermarks derived
/// from it. All fields are in bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferGeometry {
    pub fragment_size: u64,
    pub n_fragments: u64,
    pub hwbuf_unused: u64,
    pub tsched_watermark: u64,
    pub min_sleep: u64,
    pub min_wakeup: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("fragment_size * n_fragments must be > 0")]
    EmptyBuffer,
    #[error("hwbuf_unused ({hwbuf_unused}) leaves no usable capacity in a buffer of {hwbuf_size} bytes")]
    NoUsableCapacity { hwbuf_unused: u64, hwbuf_size: u64 },
    #[error("frame_size ({frame_size}) does not fit the usable capacity ({usable})")]
    FrameTooLarge { frame_size: u64, usable: u64 },
    #[error("invariant violated: {0}")]
    InvariantViolated(&'static str),
}

impl BufferGeometry {
    pub fn hwbuf_size(&self) -> u64 {
        self.fragment_size * self.n_fragments
    }

    pub fn usable_capacity(&self) -> u64 {
        self.hwbuf_size().saturating_sub(self.hwbuf_unused)
    }

    /// Build a geometry, clamping `min_sleep`, `min_wakeup` and
    /// `tsched_watermark` to the invariants in:
    ///
    /// - `frame_size <= min_sleep <= (hwbuf_size - hwbuf_unused) / 2` (frame-aligned)
    /// - `frame_size <= min_wakeup <= (hwbuf_size - hwbuf_unused) / 2` (frame-aligned)
    /// - `min_wakeup <= tsched_watermark <= (hwbuf_size - hwbuf_unused) - min_sleep`
    #[allow(clippy::too_many_arguments)]
    pub fn negotiate(
        spec: &SampleSpec,
        fragment_size: u64,
        n_fragments: u64,
        hwbuf_unused: u64,
        min_sleep: u64,
        min_wakeup: u64,
        tsched_watermark: u64,
    ) -> Result<Self, GeometryError> {
        let hwbuf_size = fragment_size * n_fragments;
        if hwbuf_size == 0 {
            return Err(GeometryError::EmptyBuffer);
        }

        let usable = hwbuf_size.checked_sub(hwbuf_unused)
            .ok_or(GeometryError::NoUsableCapacity { hwbuf_unused, hwbuf_size })?;

        let FrameSize(frame_size) = spec.frame_size();
        let frame_size = u64::from(frame_size);

        if frame_size == 0 || frame_size > usable {
            return Err(GeometryError::FrameTooLarge { frame_size, usable });
        }

        let half_usable = spec.frame_align(usable / 2);
        let min_sleep = clamp_frame_aligned(spec, min_sleep, frame_size, half_usable);
        let min_wakeup = clamp_frame_aligned(spec, min_wakeup, frame_size, half_usable);

        let watermark_ceiling = usable.saturating_sub(min_sleep);
        let tsched_watermark = tsched_watermark.clamp(min_wakeup.min(watermark_ceiling), watermark_ceiling.max(min_wakeup));

        let geometry = BufferGeometry {
            fragment_size,
            n_fragments,
            hwbuf_unused,
            tsched_watermark,
            min_sleep,
            min_wakeup,
        };

        geometry.check_invariants(spec)?;
        Ok(geometry)
    }

    /// Re-validate the invariants that must hold after any update to
    /// geometry.
    pub fn check_invariants(&self, spec: &SampleSpec) -> Result<(), GeometryError> {
        let usable = self.usable_capacity();
        let FrameSize(frame_size) = spec.frame_size();
        let frame_size = u64::from(frame_size);

        if frame_size > usable {
            return Err(GeometryError::FrameTooLarge { frame_size, usable });
        }

        let ok = frame_size <= self.min_sleep && self.min_sleep <= usable / 2
            && frame_size <= self.min_wakeup && self.min_wakeup <= usable / 2
            && self.min_wakeup <= self.tsched_watermark
            && self.tsched_watermark <= usable.saturating_sub(self.min_sleep);

        if ok {
            Ok(())
        } else {
            Err(GeometryError::InvariantViolated(
                "min_wakeup <= tsched_watermark <= usable_capacity - min_sleep"
            ))
        }
    }

    /// Double `tsched_watermark`, capped by `+watermark_step`, then
    /// re-clamp under the invariants. Returns the new
    /// geometry if the watermark actually changed, `None` if it was
    /// already saturated at the ceiling.
    pub fn with_doubled_watermark(&self, spec: &SampleSpec, watermark_step: u64) -> Option<Self> {
        let usable = self.usable_capacity();
        let ceiling = usable.saturating_sub(self.min_sleep);

        let increase = self.tsched_watermark.min(watermark_step);
        let doubled = (self.tsched_watermark + increase).min(ceiling);

        if doubled <= self.tsched_watermark {
            return None;
        }

        let mut next = *self;
        next.tsched_watermark = doubled;

        if next.check_invariants(spec).is_err() {
            return None;
        }

        Some(next)
    }
}

fn clamp_frame_aligned(spec: &SampleSpec, value: u64, frame_size: u64, upper: u64) -> u64 {
    let aligned = spec.frame_align(value.clamp(frame_size, upper.max(frame_size)));
    aligned.max(frame_size).min(upper.max(frame_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SampleFormat;

    fn cd_spec() -> SampleSpec {
        SampleSpec { format: SampleFormat::S16LE, rate: 44_100, channels: 2 }
    }

    #[test]
    fn nominal_geometry_satisfies_invariants() {
        let spec = cd_spec();
        let geometry = BufferGeometry::negotiate(
            &spec,
            4096, 4,
            0,
            10 * 44, // ~10ms in frames*4 bytes-ish, just some value under half usable
            4 * 44,
            20 * 44,
        ).unwrap();

        geometry.check_invariants(&spec).unwrap();
    }

    #[test]
    fn requested_latency_below_frame_size_is_bumped_up() {
        // boundary behavior from: requested latency below frame_size
        // is bumped to frame_size, and hwbuf_unused = hwbuf_size - frame_size.
        let spec = cd_spec();
        let frame_size = u64::from(spec.frame_size().0);
        let hwbuf_size = 4096u64 * 4;
        let hwbuf_unused = hwbuf_size - frame_size;

        let geometry = BufferGeometry::negotiate(
            &spec, 4096, 4, hwbuf_unused, 1, 1, 1,
        ).unwrap();

        assert_eq!(geometry.min_sleep, frame_size);
        assert_eq!(geometry.min_wakeup, frame_size);
        geometry.check_invariants(&spec).unwrap();
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let spec = cd_spec();
        let err = BufferGeometry::negotiate(&spec, 0, 4, 0, 1, 1, 1).unwrap_err();
        assert_eq!(err, GeometryError::EmptyBuffer);
    }

    #[test]
    fn doubled_watermark_is_capped_by_step_and_ceiling() {
        let spec = cd_spec();
        let geometry = BufferGeometry::negotiate(
            &spec, 4096, 4, 0, 10 * 44, 4 * 44, 20 * 44,
        ).unwrap();

        let step = 5 * 44;
        let doubled = geometry.with_doubled_watermark(&spec, step).unwrap();
        assert_eq!(doubled.tsched_watermark, geometry.tsched_watermark + step);
        doubled.check_invariants(&spec).unwrap();

        // once saturated at the ceiling, further doubling is a no-op
        let ceiling = doubled.usable_capacity().saturating_sub(doubled.min_sleep);
        let mut saturated = doubled;
        saturated.tsched_watermark = ceiling;
        assert!(saturated.with_doubled_watermark(&spec, step).is_none());
    }
}
