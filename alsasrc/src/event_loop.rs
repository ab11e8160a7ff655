//! The event-loop bridge: a shim exposing
//! fd/timer wakeups to main-thread collaborators, with no logic beyond
//! bit-flag translation. Backed by `nix::poll`, the same primitive the
//! capture thread's own poll core (`alsasrc_engine::poll_core`) uses
//! internally — kept as a separate instance here since the two run on
//! different threads.

use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};

use alsasrc_driver::PollEvents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u64);

struct Watch {
    fd: RawFd,
    events: PollEvents,
    callback: Box<dyn FnMut(PollEvents)>,
}

struct Timeout {
    timer: TimerFd,
    callback: Box<dyn FnMut()>,
}

/// `{watch_new, watch_update, watch_get_events, watch_free, timeout_new,
/// timeout_update, timeout_free}`. Each watch and timeout owns
/// its main-loop primitive; `*_free` releases it.
pub trait EventLoop {
    fn watch_new(&mut self, fd: RawFd, events: PollEvents, callback: Box<dyn FnMut(PollEvents)>) -> WatchId;
    fn watch_update(&mut self, id: WatchId, events: PollEvents);
    fn watch_get_events(&self, id: WatchId) -> PollEvents;
    fn watch_free(&mut self, id: WatchId);

    fn timeout_new(&mut self, when: Duration, callback: Box<dyn FnMut()>) -> TimeoutId;
    fn timeout_update(&mut self, id: TimeoutId, when: Duration);
    fn timeout_free(&mut self, id: TimeoutId);

    /// Block until at least one registered watch or timeout is ready,
    /// then dispatch every callback that fired. Not part of the bridge's
    /// own contract, but every caller needs a drive loop.
    fn run_once(&mut self) -> nix::Result<()>;
}

#[derive(Default)]
pub struct PollEventLoop {
    watches: HashMap<WatchId, Watch>,
    timeouts: HashMap<TimeoutId, Timeout>,
    next_id: u64,
}

impl PollEventLoop {
    pub fn new() -> Self {
        PollEventLoop::default()
    }

    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl EventLoop for PollEventLoop {
    fn watch_new(&mut self, fd: RawFd, events: PollEvents, callback: Box<dyn FnMut(PollEvents)>) -> WatchId {
        let id = WatchId(self.fresh_id());
        self.watches.insert(id, Watch { fd, events, callback });
        id
    }

    fn watch_update(&mut self, id: WatchId, events: PollEvents) {
        if let Some(watch) = self.watches.get_mut(&id) {
            watch.events = events;
        }
    }

    fn watch_get_events(&self, id: WatchId) -> PollEvents {
        self.watches.get(&id).map(|w| w.events).unwrap_or_else(PollEvents::empty)
    }

    fn watch_free(&mut self, id: WatchId) {
        self.watches.remove(&id);
    }

    fn timeout_new(&mut self, when: Duration, callback: Box<dyn FnMut()>) -> TimeoutId {
        let id = TimeoutId(self.fresh_id());
        let timer = TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::empty())
            .expect("creating a timerfd should not fail under normal resource limits");
        let _ = timer.set(Expiration::OneShot(when.into()), TimerSetTimeFlags::empty());
        self.timeouts.insert(id, Timeout { timer, callback });
        id
    }

    fn timeout_update(&mut self, id: TimeoutId, when: Duration) {
        if let Some(timeout) = self.timeouts.get(&id) {
            let _ = timeout.timer.set(Expiration::OneShot(when.into()), TimerSetTimeFlags::empty());
        }
    }

    fn timeout_free(&mut self, id: TimeoutId) {
        self.timeouts.remove(&id);
    }

    fn run_once(&mut self) -> nix::Result<()> {
        let watch_entries: Vec<(WatchId, RawFd, PollEvents)> = self.watches.iter()
            .map(|(&id, w)| (id, w.fd, w.events))
            .collect();
        let timeout_entries: Vec<(TimeoutId, RawFd)> = self.timeouts.iter()
            .map(|(&id, t)| (id, t.timer.as_fd().as_raw_fd()))
            .collect();
        let timeout_ids: Vec<TimeoutId> = timeout_entries.iter().map(|&(id, _)| id).collect();

        if watch_entries.is_empty() && timeout_entries.is_empty() {
            return Ok(());
        }

        // SAFETY: watch and timer fds are owned by the caller (or by
        // `self.timeouts`) and outlive this call; borrowing the raw fd
        // here instead of keeping `self`'s own borrow alive lets the
        // dispatch loops below mutate `self.timeouts` afterwards.
        let watch_fds: Vec<BorrowedFd<'_>> = watch_entries.iter()
            .map(|&(_, fd, _)| unsafe { BorrowedFd::borrow_raw(fd) })
            .collect();
        let timer_fds: Vec<BorrowedFd<'_>> = timeout_entries.iter()
            .map(|&(_, fd)| unsafe { BorrowedFd::borrow_raw(fd) })
            .collect();

        let mut fds: Vec<PollFd> = Vec::with_capacity(watch_entries.len() + timer_fds.len());
        for (&(_, _, events), fd) in watch_entries.iter().zip(watch_fds.iter()) {
            fds.push(PollFd::new(*fd, to_poll_flags(events)));
        }
        for fd in &timer_fds {
            fds.push(PollFd::new(*fd, PollFlags::POLLIN));
        }

        loop {
            match nix::poll::poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }

        let n_watches = watch_entries.len();

        for (i, &(id, _, events)) in watch_entries.iter().enumerate() {
            if fds[i].any() == Some(true) {
                if let Some(watch) = self.watches.get_mut(&id) {
                    (watch.callback)(events);
                }
            }
        }

        for (i, id) in timeout_ids.iter().enumerate() {
            if fds[n_watches + i].any() == Some(true) {
                if let Some(timeout) = self.timeouts.get_mut(id) {
                    let _ = timeout.timer.wait();
                    (timeout.callback)();
                }
            }
        }

        Ok(())
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
