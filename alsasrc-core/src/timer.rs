//! Timer-scheduled wakeup budget.

use crate::smoother::Smoother;

/// The sleep/process split computed from a requested latency and the
/// current watermark.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WakeupBudget {
    /// How long the engine may sleep before it must drain again.
    pub sleep_usec: u64,
    /// How much of the latency budget is reserved for processing once
    /// woken (the watermark band).
    pub process_usec: u64,
}

impl WakeupBudget {
    /// `L` is the downstream-requested latency (or the full hardware
    /// buffer expressed as time, if unset). `watermark` is the current
    /// `tsched_watermark` expressed as time.
    pub fn compute(requested_latency_usec: u64, watermark_usec: u64) -> Self {
        let wm = if watermark_usec > requested_latency_usec {
            requested_latency_usec / 2
        } else {
            watermark_usec
        };

        WakeupBudget {
            sleep_usec: requested_latency_usec.saturating_sub(wm),
            process_usec: wm,
        }
    }

    /// After a non-blocking drain attempt, should the engine stop without
    /// reading because it woke up too early?
    pub fn is_too_early(&self, left_to_record_usec: u64) -> bool {
        left_to_record_usec > self.process_usec + self.sleep_usec / 2
    }

    /// The relative timer to arm: the earlier of soundcard time and
    /// system time, never trusting one domain alone.
    pub fn arm_wakeup(&self, smoother: &Smoother, now_wall_usec: u64) -> u64 {
        let translated = smoother.translate(now_wall_usec, self.sleep_usec);
        self.sleep_usec.min(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_under_latency_is_used_directly() {
        let budget = WakeupBudget::compute(50_000, 20_000);
        assert_eq!(budget.process_usec, 20_000);
        assert_eq!(budget.sleep_usec, 30_000);
    }

    #[test]
    fn watermark_over_latency_is_halved() {
        // scenario from #4: L is implicitly small, watermark
        // larger than L, so wm = L/2.
        let budget = WakeupBudget::compute(40_000, 100_000);
        assert_eq!(budget.process_usec, 20_000);
        assert_eq!(budget.sleep_usec, 20_000);
    }

    #[test]
    fn early_wakeup_scenario_from_spec() {
        // scenario 4: process=20ms, sleep=60ms while left_to_record=80ms
        let budget = WakeupBudget { process_usec: 20_000, sleep_usec: 60_000 };
        assert!(budget.is_too_early(80_000));
        assert!(!budget.is_too_early(10_000));
    }

    #[test]
    fn wakeup_timer_is_earlier_of_two_clock_domains() {
        let budget = WakeupBudget { process_usec: 20_000, sleep_usec: 60_000 };
        let smoother = Smoother::new(2_000_000, 4);
        // untrained smoother: translate is identity, so min(sleep, sleep) = sleep
        let timer = budget.arm_wakeup(&smoother, 0);
        assert_eq!(timer, 60_000);
    }
}
