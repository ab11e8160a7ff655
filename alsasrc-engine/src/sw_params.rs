//! Software-parameters update.

use alsasrc_core::geometry::{BufferGeometry, GeometryError};
use alsasrc_core::spec::SampleSpec;

/// Recomputed software parameters to push to the driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwParams {
    pub hwbuf_unused: u64,
    pub avail_min_frames: u64,
}

/// Recompute `hwbuf_unused` and `avail_min` from a requested latency
///. `sleep_usec` is the sleep half of the wakeup budget
/// computed from the *new* geometry; callers typically call
/// this, rebuild the geometry, then call `WakeupBudget::compute` again
/// with the result before deriving `avail_min_frames`' final value — see
/// `alsasrc-engine::capture` for the two-step sequence.
pub fn recompute(
    spec: &SampleSpec,
    geometry: &BufferGeometry,
    requested_latency_usec: Option<u64>,
    sleep_usec: u64,
) -> Result<(BufferGeometry, SwParams), GeometryError> {
    let frame_size = u64::from(spec.frame_size().0);
    let hwbuf_size = geometry.hwbuf_size();

    let hwbuf_unused = match requested_latency_usec {
        None => 0,
        Some(latency_usec) => {
            let requested_bytes = spec.usec_to_bytes(latency_usec).max(frame_size);
            hwbuf_size.saturating_sub(requested_bytes)
        }
    };

    let next_geometry = BufferGeometry::negotiate(
        spec,
        geometry.fragment_size,
        geometry.n_fragments,
        hwbuf_unused,
        geometry.min_sleep,
        geometry.min_wakeup,
        geometry.tsched_watermark,
    )?;

    let avail_min_frames = match requested_latency_usec {
        None => 1,
        Some(_) => 1 + (spec.usec_to_bytes(sleep_usec) / frame_size.max(1)),
    };

    Ok((next_geometry, SwParams { hwbuf_unused, avail_min_frames }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alsasrc_core::spec::SampleFormat;

    fn cd_spec() -> SampleSpec {
        SampleSpec { format: SampleFormat::S16LE, rate: 44_100, channels: 2 }
    }

    #[test]
    fn no_requested_latency_disables_watermarking() {
        let spec = cd_spec();
        let geometry = BufferGeometry::negotiate(&spec, 4096, 4, 0, 440, 176, 880).unwrap();
        let (next, params) = recompute(&spec, &geometry, None, 0).unwrap();
        assert_eq!(params.hwbuf_unused, 0);
        assert_eq!(params.avail_min_frames, 1);
        assert_eq!(next.hwbuf_unused, 0);
    }

    #[test]
    fn requested_latency_shrinks_usable_capacity() {
        let spec = cd_spec();
        let geometry = BufferGeometry::negotiate(&spec, 4096, 4, 0, 440, 176, 880).unwrap();
        let hwbuf_size = geometry.hwbuf_size();

        let (next, params) = recompute(&spec, &geometry, Some(50_000), 30_000).unwrap();
        assert!(params.hwbuf_unused > 0);
        assert!(params.hwbuf_unused < hwbuf_size);
        assert!(params.avail_min_frames >= 1);
        next.check_invariants(&spec).unwrap();
    }
}
