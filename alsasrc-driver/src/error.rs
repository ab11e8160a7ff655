use thiserror::Error;

/// Closed error variant set translated from driver error codes at the
/// adapter boundary. The engine matches on this; it never inspects a
/// raw errno.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Non-fatal: the hardware buffer overran.
    /// Handled by `recover` + `start`.
    #[error("overrun")]
    Overrun,

    /// Non-fatal: the stream was suspended by the kernel (e.g. laptop
    /// suspend/resume) and needs to be resumed via `recover`.
    #[error("stream suspended")]
    Suspended,

    /// Non-fatal: a syscall was interrupted, retry.
    #[error("interrupted")]
    Interrupted,

    /// The driver exposed mmap data that violates an alignment
    /// invariant: a programming error in the driver adapter, not
    /// something the engine can recover from.
    #[error("mmap region alignment violation: {0}")]
    AlignmentViolation(&'static str),

    /// Anything else: fatal to the session if `recover` doesn't clear it
    /// in one attempt.
    #[error("driver error: {0}")]
    Fatal(#[from] nix::Error),
}

impl DriverError {
    /// Transient-driver errors: handled by `recover` + `start`,
    /// logged at debug, loop continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DriverError::Overrun | DriverError::Suspended | DriverError::Interrupted)
    }

    #[cfg(target_os = "linux")]
    pub fn from_alsa(err: alsa::Error) -> DriverError {
        match err.errno() {
            nix::errno::Errno::EPIPE => DriverError::Overrun,
            nix::errno::Errno::ESTRPIPE => DriverError::Suspended,
            nix::errno::Errno::EINTR => DriverError::Interrupted,
            other => DriverError::Fatal(other),
        }
    }
}
