//! Pure, I/O-free core of the capture engine: sample geometry, the clock
//! smoother, the timer-scheduled wakeup budget, and the overrun adjuster.
//!
//! Nothing in this crate touches a driver handle, a thread, or a clock
//! source directly — it is given timestamps and byte counts and hands back
//! decisions. That split is what makes the hardest 55% of the system
//! (see the capture engine in `alsasrc-engine`) testable without hardware.

pub mod diag;
pub mod error;
pub mod geometry;
pub mod overrun;
pub mod smoother;
pub mod spec;
pub mod stats;
pub mod timer;
pub mod volume;

pub use error::Error;
pub use geometry::BufferGeometry;
pub use smoother::Smoother;
pub use spec::{FrameSize, SampleFormat, SampleSpec};
pub use stats::CaptureStats;
