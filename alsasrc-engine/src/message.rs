//! The inbound message queue. A second fd (a self-pipe) wakes the
//! real-time poll core when the `Sender` half — owned by the main
//! thread — pushes a message, without requiring the poll core itself to
//! know anything about message semantics.

use std::collections::VecDeque;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{pipe, read, write};

/// What the main thread may request of the capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedState {
    Running,
    Idle,
    Suspended,
}

/// A reservation-protocol event, delivered through the hook described in
///. The protocol details
/// themselves are out of scope; only this shape is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationEvent {
    Released,
    Reacquired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    SetState(RequestedState),
    SetLatencyRange { min_usec: u64, max_usec: u64 },
    SetVolume(u32),
    Reservation(ReservationEvent),
    /// Causes the poll core to return with a shutdown outcome; the
    /// capture thread exits the loop after draining the queue up to and
    /// including this message.
    Shutdown,
}

struct Shared {
    queue: Mutex<VecDeque<ControlMessage>>,
    wake_write: OwnedFd,
}

/// Owned by the main thread. `Clone`-able; every clone shares the same
/// queue and wakes the same capture thread.
#[derive(Clone)]
pub struct MessageSender {
    shared: Arc<Shared>,
}

/// Owned exclusively by the capture thread.
pub struct MessageReceiver {
    shared: Arc<Shared>,
    wake_read: OwnedFd,
}

/// Build a connected sender/receiver pair backed by a non-blocking
/// self-pipe.
pub fn channel() -> nix::Result<(MessageSender, MessageReceiver)> {
    let (wake_read, wake_write) = pipe()?;
    fcntl(wake_read.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
    fcntl(wake_write.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;

    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        wake_write,
    });

    Ok((
        MessageSender { shared: shared.clone() },
        MessageReceiver { shared, wake_read },
    ))
}

impl MessageSender {
    pub fn send(&self, message: ControlMessage) {
        self.shared.queue.lock().unwrap().push_back(message);
        // One byte is enough to wake the poll core; if the pipe is
        // momentarily full (queue already has an unconsumed wake byte)
        // EAGAIN is expected and ignored.
        let _ = write(self.shared.wake_write.as_raw_fd(), &[0u8]);
    }
}

impl MessageReceiver {
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.wake_read.as_fd()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.wake_read.as_raw_fd()
    }

    /// Drain every pending message (and every pending wake byte). Called
    /// once per iteration after the poll core reports the message fd
    /// readable, and also during the post-fatal shutdown drain.
    pub fn drain(&self) -> Vec<ControlMessage> {
        let mut buf = [0u8; 64];
        loop {
            match read(self.wake_read.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }

        self.shared.queue.lock().unwrap().drain(..).collect()
    }

    /// Block-drain until a `Shutdown` message is observed.
    pub fn drain_until_shutdown(&self, poll_fd: impl Fn() -> nix::Result<()>) -> nix::Result<()> {
        loop {
            for message in self.drain() {
                if message == ControlMessage::Shutdown {
                    return Ok(());
                }
            }
            poll_fd()?;
        }
    }
}
