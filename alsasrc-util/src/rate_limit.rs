use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A diagnostic that fires at most once per window, generalizing the
/// one-shot `AtomicBool` latch pattern (see `thread::set_realtime_priority`)
/// from "never again" to "not more than once every N".
pub struct RateLimiter {
    window: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        RateLimiter { window, last_fired: Mutex::new(None) }
    }

    /// A latch that only ever fires once, for its whole lifetime.
    pub fn one_shot() -> Self {
        RateLimiter::new(Duration::MAX)
    }

    /// Returns true if the caller should emit its diagnostic now.
    pub fn check(&self) -> bool {
        let mut last_fired = self.last_fired.lock().unwrap();
        let now = Instant::now();

        let should_fire = match *last_fired {
            None => true,
            Some(prev) => now.duration_since(prev) >= self.window,
        };

        if should_fire {
            *last_fired = Some(now);
        }

        should_fire
    }

    /// Reset the latch, e.g. after a suspend/resume cycle.
    pub fn reset(&self) {
        *self.last_fired.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once() {
        let limiter = RateLimiter::one_shot();
        assert!(limiter.check());
        assert!(!limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn reset_allows_refire() {
        let limiter = RateLimiter::one_shot();
        assert!(limiter.check());
        limiter.reset();
        assert!(limiter.check());
    }

    #[test]
    fn windowed_limiter_blocks_within_window() {
        let limiter = RateLimiter::new(Duration::from_secs(3600));
        assert!(limiter.check());
        assert!(!limiter.check());
    }
}
