//! Rate-limited user-visible diagnostics.

use alsasrc_util::rate_limit::RateLimiter;
use std::time::Duration;

/// "driver woke us with nothing" — info-level, rate-limited rather than
/// one-shot, since it's expected to recur under sustained misbehavior.
pub fn woke_with_nothing_limiter() -> RateLimiter {
    RateLimiter::new(Duration::from_secs(5))
}

/// Spurious POLLIN with `avail() == 0` — one-shot per suspend/resume
/// cycle.
pub fn spurious_pollin_limiter() -> RateLimiter {
    RateLimiter::one_shot()
}
