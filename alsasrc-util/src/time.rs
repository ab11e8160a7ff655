use nix::sys::time::TimeValLike;
use nix::time::ClockId;

/// Microseconds since an unspecified epoch, monotonic and immune to NTP
/// step adjustments (CLOCK_MONOTONIC_RAW).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UsecTimestamp(pub u64);

pub fn now() -> UsecTimestamp {
    let timespec = nix::time::clock_gettime(ClockId::CLOCK_MONOTONIC_RAW)
        .expect("clock_gettime(CLOCK_MONOTONIC_RAW) failed, are we on Linux?");

    let micros = u64::try_from(timespec.num_microseconds())
        .expect("cannot convert i64 time value to u64");

    UsecTimestamp(micros)
}
