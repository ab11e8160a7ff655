//! Overrun adjuster. Only consulted when timer scheduling is
//! enabled; the caller is responsible for that gating.

use crate::geometry::BufferGeometry;
use crate::spec::SampleSpec;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OverrunOutcome {
    /// Step 1: watermark doubled (capped by `+watermark_step`).
    WatermarkIncreased { geometry: BufferGeometry },
    /// Step 2: the source's minimum latency was raised instead.
    LatencyIncreased { min_latency_usec: u64 },
    /// Step 3: both are already saturated; operate at worst achievable
    /// quality and say so.
    Saturated,
}

/// Apply the three-step escalation policy from
pub fn adjust(
    spec: &SampleSpec,
    geometry: &BufferGeometry,
    watermark_step_bytes: u64,
    min_latency_usec: u64,
    max_latency_usec: u64,
    watermark_step_us: u64,
) -> OverrunOutcome {
    if let Some(doubled) = geometry.with_doubled_watermark(spec, watermark_step_bytes) {
        return OverrunOutcome::WatermarkIncreased { geometry: doubled };
    }

    let increase = min_latency_usec.min(watermark_step_us);
    let doubled_latency = (min_latency_usec + increase).min(max_latency_usec);

    if doubled_latency > min_latency_usec {
        return OverrunOutcome::LatencyIncreased { min_latency_usec: doubled_latency };
    }

    OverrunOutcome::Saturated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SampleFormat;

    fn cd_spec() -> SampleSpec {
        SampleSpec { format: SampleFormat::S16LE, rate: 44_100, channels: 2 }
    }

    fn geometry() -> BufferGeometry {
        BufferGeometry::negotiate(&cd_spec(), 4096, 4, 0, 10 * 44, 4 * 44, 20 * 44).unwrap()
    }

    #[test]
    fn single_overrun_doubles_watermark() {
        // scenario from #2: one overrun -> watermark doubled,
        // capped by step.
        let outcome = adjust(&cd_spec(), &geometry(), 5 * 44, 20_000, 2_000_000, 10_000);
        match outcome {
            OverrunOutcome::WatermarkIncreased { geometry: g } => {
                assert!(g.tsched_watermark > geometry().tsched_watermark);
            }
            other => panic!("expected WatermarkIncreased, got {other:?}"),
        }
    }

    #[test]
    fn watermark_saturated_raises_latency_instead() {
        let spec = cd_spec();
        let mut g = geometry();
        // saturate the watermark at its ceiling first
        let ceiling = g.usable_capacity().saturating_sub(g.min_sleep);
        g.tsched_watermark = ceiling;

        let outcome = adjust(&spec, &g, 5 * 44, 20_000, 2_000_000, 10_000);
        assert_eq!(outcome, OverrunOutcome::LatencyIncreased { min_latency_usec: 30_000 });
    }

    #[test]
    fn fully_saturated_is_reported_as_such() {
        let spec = cd_spec();
        let mut g = geometry();
        let ceiling = g.usable_capacity().saturating_sub(g.min_sleep);
        g.tsched_watermark = ceiling;

        let outcome = adjust(&spec, &g, 5 * 44, 2_000_000, 2_000_000, 10_000);
        assert_eq!(outcome, OverrunOutcome::Saturated);
    }
}
