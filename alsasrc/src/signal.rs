//! SIGINT handling for the main thread, via the same self-pipe trick
//! `alsasrc_engine::message` uses for its own wakeups: the signal handler
//! may only call async-signal-safe functions, so it writes one byte to a
//! pipe rather than touching the engine directly.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{pipe, write};

static SIGNAL_WRITE_FD: OnceLock<RawFd> = OnceLock::new();
static RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: i32) {
    RECEIVED.store(true, Ordering::Relaxed);
    if let Some(&fd) = SIGNAL_WRITE_FD.get() {
        let _ = write(fd, &[0u8]);
    }
}

/// Whether SIGINT has been observed since `install`.
pub fn received() -> bool {
    RECEIVED.load(Ordering::Relaxed)
}

/// Install the SIGINT handler and return the read end of the self-pipe,
/// ready to be registered with the event loop as a watch.
pub fn install() -> nix::Result<OwnedFd> {
    let (read_fd, write_fd) = pipe()?;
    fcntl(read_fd.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
    fcntl(write_fd.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;

    SIGNAL_WRITE_FD.set(write_fd.as_raw_fd())
        .expect("signal::install called more than once");
    // leaked deliberately: the signal handler only has the raw fd, kept
    // open for the life of the process.
    std::mem::forget(write_fd);

    let action = SigAction::new(SigHandler::Handler(handle_sigint), SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(Signal::SIGINT, &action)? };

    Ok(read_fd)
}
