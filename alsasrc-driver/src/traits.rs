use crate::error::DriverError;
use crate::mmap::MmapRegion;
use crate::poll::{PollDescriptor, PollEvents};

/// Narrow contract the capture engine consumes. All calls are
/// synchronous and are not assumed thread-safe across components — in
/// practice exactly one thread (the capture thread) ever calls these.
pub trait Driver {
    /// Frames currently available to read, clamped internally to the
    /// configured hardware buffer. An EAGAIN-equivalent condition is
    /// disguised as a non-error zero, not an `Err`.
    fn avail(&mut self) -> Result<u64, DriverError>;

    /// Acquire a direct view into the hardware ring buffer covering up to
    /// `max_frames`. See `MmapRegion` for the lifetime contract.
    fn mmap_begin(&mut self, max_frames: u64) -> Result<MmapRegion<'_>, DriverError>;

    /// Tell the driver `frames` starting at `offset_frames` (as returned
    /// by the `MmapRegion` that preceded this call) have been consumed.
    /// Returns the number of frames actually committed.
    fn mmap_commit(&mut self, offset_frames: u64, frames: u64) -> Result<u64, DriverError>;

    /// Blocking read of `frames` frames into `buf` (the copy path, as
    /// opposed to the mmap path above). `buf` must be at least
    /// `frames * frame_size` bytes.
    fn read(&mut self, buf: &mut [u8], frames: u64) -> Result<u64, DriverError>;

    /// Frames currently buffered and not yet delivered.
    fn delay(&mut self) -> Result<u64, DriverError>;

    /// Hardware-latched capture timestamp (microseconds, unspecified
    /// epoch) for the most recent period boundary. `None` if unset.
    fn status_timestamp(&mut self) -> Option<u64>;

    /// Pollable fds for the underlying device.
    fn poll_descriptors(&self) -> Result<Vec<PollDescriptor>, DriverError>;

    /// Translate raw poll results for this driver's fds into the closed
    /// event set.
    fn poll_revents(&self, ready: &[(std::os::unix::io::RawFd, i16)]) -> Result<PollEvents, DriverError>;

    /// Attempt to resume streaming after a recoverable error. The caller
    /// must call `start` again afterwards.
    fn recover(&mut self, err: &DriverError, silent: bool) -> Result<(), DriverError>;

    /// (Re-)start the stream after open or after a successful `recover`.
    fn start(&mut self) -> Result<(), DriverError>;

    /// Close the device. Idempotent.
    fn close(&mut self) -> Result<(), DriverError>;

    /// Push new software parameters to the driver.
    fn apply_sw_params(&mut self, hwbuf_unused_frames: u64, avail_min_frames: u64) -> Result<(), DriverError>;
}
