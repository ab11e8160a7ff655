use std::collections::VecDeque;

/// Produces a monotonic, low-jitter mapping from captured-frame time to
/// wall-clock time: a weighted linear regression of `frame_usec` against
/// `wall_usec` over a bounded recent history.
///
/// All times are in microseconds, denominated in an unspecified epoch
/// consistent across calls.
pub struct Smoother {
    history_window_usec: u64,
    min_samples: usize,
    samples: VecDeque<(u64, u64)>,
    paused: bool,
    /// `frame_usec - wall_usec` at the moment of the last observation,
    /// used as a continuity anchor when there aren't enough samples yet
    /// (including right after a resume) to fit a line.
    last_offset: i64,
}

impl Smoother {
    pub fn new(history_window_usec: u64, min_samples: usize) -> Self {
        Smoother {
            history_window_usec,
            min_samples: min_samples.max(2),
            samples: VecDeque::new(),
            paused: false,
            last_offset: 0,
        }
    }

    /// Feed one `(wall_time, frame_time)` observation.
    pub fn put(&mut self, wall_usec: u64, frame_usec: u64) {
        if self.paused {
            return;
        }

        self.last_offset = i64::try_from(frame_usec).unwrap_or(i64::MAX)
            .saturating_sub(i64::try_from(wall_usec).unwrap_or(i64::MAX));

        self.samples.push_back((wall_usec, frame_usec));

        while let Some(&(oldest_wall, _)) = self.samples.front() {
            if wall_usec.saturating_sub(oldest_wall) > self.history_window_usec {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Forward query: estimate `frame_time` for a given `wall_time`.
    pub fn at(&self, wall_usec: u64) -> u64 {
        match self.fit() {
            Some((slope, intercept)) => {
                let estimate = slope * (wall_usec as f64) + intercept;
                estimate.max(0.0).round() as u64
            }
            None => {
                (i64::try_from(wall_usec).unwrap_or(i64::MAX) + self.last_offset).max(0) as u64
            }
        }
    }

    /// Inverse query: how much wall-clock time elapses while `delta_frame`
    /// of frame-time elapses, starting "now".
    pub fn translate(&self, now_wall: u64, delta_frame_usec: u64) -> u64 {
        match self.fit() {
            Some((slope, intercept)) if slope.abs() > f64::EPSILON => {
                let frame_now = slope * now_wall as f64 + intercept;
                let frame_then = frame_now + delta_frame_usec as f64;
                let wall_then = (frame_then - intercept) / slope;
                (wall_then - now_wall as f64).max(0.0).round() as u64
            }
            _ => delta_frame_usec,
        }
    }

    /// Freeze the fit: subsequent `at`/`translate` calls use the last
    /// known offset until `resume` and enough fresh samples arrive.
    pub fn pause(&mut self) {
        if !self.paused {
            if let Some((slope, intercept)) = self.fit() {
                if let Some(&(wall, _)) = self.samples.back() {
                    let frame = slope * wall as f64 + intercept;
                    self.last_offset = (frame - wall as f64).round() as i64;
                }
            }
        }

        self.paused = true;
        self.samples.clear();
    }

    /// Reinitialize the fit without a discontinuity: new samples are
    /// accepted again, and until enough accumulate, `at`/`translate` keep
    /// using the offset frozen at `pause` time.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    fn fit(&self) -> Option<(f64, f64)> {
        if self.paused || self.samples.len() < self.min_samples {
            return None;
        }

        // Weighted least squares, most recent sample weighted heaviest.
        let n = self.samples.len();
        let decay = 0.98f64;

        let mut sum_w = 0.0;
        let mut sum_wx = 0.0;
        let mut sum_wy = 0.0;
        let mut sum_wxx = 0.0;
        let mut sum_wxy = 0.0;

        for (i, &(wall, frame)) in self.samples.iter().enumerate() {
            let age = (n - 1 - i) as f64;
            let w = decay.powf(age);
            let x = wall as f64;
            let y = frame as f64;

            sum_w += w;
            sum_wx += w * x;
            sum_wy += w * y;
            sum_wxx += w * x * x;
            sum_wxy += w * x * y;
        }

        let denom = sum_w * sum_wxx - sum_wx * sum_wx;
        if denom.abs() < f64::EPSILON {
            return None;
        }

        let slope = (sum_w * sum_wxy - sum_wx * sum_wy) / denom;
        let intercept = (sum_wy - slope * sum_wx) / sum_w;

        Some((slope, intercept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_a_fixed_offset() {
        let mut smoother = Smoother::new(2_000_000, 4);

        for i in 0..20u64 {
            let wall = i * 20_000;
            let frame = wall + 5_000; // capture runs 5ms ahead of wall clock
            smoother.put(wall, frame);
        }

        let estimate = smoother.at(19 * 20_000);
        let actual = 19 * 20_000 + 5_000;
        let error = (estimate as i64 - actual as i64).abs();
        assert!(error < 500, "error {error} too large");
    }

    #[test]
    fn translate_recovers_linear_drift() {
        let mut smoother = Smoother::new(2_000_000, 4);

        // frame clock runs at 1.001x wall clock (a plausible crystal drift)
        for i in 0..30u64 {
            let wall = i * 20_000;
            let frame = (wall as f64 * 1.001) as u64;
            smoother.put(wall, frame);
        }

        let now = 29 * 20_000;
        let delta_wall = smoother.translate(now, 100_000);
        // should be close to, but not exactly, 100ms given the drift
        assert!(delta_wall > 90_000 && delta_wall < 110_000);
    }

    #[test]
    fn pause_then_resume_has_no_discontinuity() {
        let mut smoother = Smoother::new(2_000_000, 4);

        for i in 0..20u64 {
            let wall = i * 20_000;
            smoother.put(wall, wall + 7_000);
        }

        let before_pause = smoother.at(19 * 20_000);
        smoother.pause();
        let during_pause = smoother.at(20 * 20_000);

        // offset is still ~7ms even with no new samples
        assert!((during_pause as i64 - (20 * 20_000 + 7_000) as i64).abs() < 500);

        smoother.resume();
        let after_resume = smoother.at(20 * 20_000);

        assert_eq!(during_pause, after_resume);
        assert!(before_pause <= after_resume + 1000);
    }

    #[test]
    fn untrained_smoother_behaves_as_identity() {
        let smoother = Smoother::new(2_000_000, 4);
        assert_eq!(smoother.at(12345), 12345);
        assert_eq!(smoother.translate(0, 5000), 5000);
    }
}
