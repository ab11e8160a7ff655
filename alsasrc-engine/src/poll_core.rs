//! Real-time poll core: the single
//! suspension point of the capture thread. Blends a relative timer with
//! an externally supplied set of driver fds and the inbound message
//! queue, blending them through `nix::poll::poll` into one wait: an
//! arbitrary, per-iteration driver fd set plus one fixed message-queue
//! fd and one fixed timer fd.

use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};

use alsasrc_driver::{PollDescriptor, PollEvents};

use crate::message::MessageReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The relative timer expired before anything else happened.
    TimerExpired,
    /// At least one driver fd has events pending; revents must be
    /// fetched from the driver adapter by the caller.
    DriverEvent,
    /// A message arrived; the caller drains the queue and, if it finds
    /// `Shutdown` among the drained messages, exits the loop.
    Message,
}

pub struct PollCore {
    timer: TimerFd,
}

impl PollCore {
    pub fn new() -> nix::Result<Self> {
        let timer = TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::empty())?;
        Ok(PollCore { timer })
    }

    /// Arm the relative timer for `usec` from now, or disarm it if
    /// `usec` is `None`.
    pub fn arm(&self, usec: Option<u64>) -> nix::Result<()> {
        self.timer.unset()?;

        if let Some(usec) = usec {
            let expiration = Expiration::OneShot(Duration::from_micros(usec).into());
            self.timer.set(expiration, TimerSetTimeFlags::empty())?;
        }

        Ok(())
    }

    /// Block until the timer expires, a driver fd is ready, or a message
    /// arrives. `driver_fds` is rebuilt by the caller each iteration,
    /// since the opened/closed state of the driver decides whether
    /// there is anything to poll for.
    pub fn wait(
        &self,
        driver_fds: &[PollDescriptor],
        messages: &MessageReceiver,
    ) -> nix::Result<PollOutcome> {
        let timer_fd = self.timer.as_fd();
        let msg_fd = messages.fd();

        let mut fds: Vec<PollFd> = Vec::with_capacity(driver_fds.len() + 2);
        fds.push(PollFd::new(timer_fd, PollFlags::POLLIN));
        fds.push(PollFd::new(msg_fd, PollFlags::POLLIN));

        // SAFETY: `driver_fds` entries are only valid for the duration of
        // this call, matching the lifetime of `borrowed`.
        let borrowed: Vec<BorrowedFd<'_>> = driver_fds
            .iter()
            .map(|d| unsafe { BorrowedFd::borrow_raw(d.fd) })
            .collect();

        for (descriptor, fd) in driver_fds.iter().zip(borrowed.iter()) {
            fds.push(PollFd::new(*fd, to_poll_flags(descriptor.events)));
        }

        loop {
            match nix::poll::poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }

        if fds[1].any() == Some(true) {
            return Ok(PollOutcome::Message);
        }

        if fds[0].any() == Some(true) {
            let _ = self.timer.wait();
            return Ok(PollOutcome::TimerExpired);
        }

        if fds[2..].iter().any(|pfd| pfd.any() == Some(true)) {
            return Ok(PollOutcome::DriverEvent);
        }

        Ok(PollOutcome::TimerExpired)
    }
}

fn to_poll_flags(events: PollEvents) -> PollFlags {
    let mut flags = PollFlags::empty();
    if events.contains(PollEvents::INPUT) {
        flags |= PollFlags::POLLIN;
    }
    if events.contains(PollEvents::OUTPUT) {
        flags |= PollFlags::POLLOUT;
    }
    flags
}
