use std::os::unix::io::RawFd;

bitflags::bitflags! {
    /// Events a driver's pollable fds may report, translated from raw
    /// `poll(2)` revents at the adapter boundary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: u32 {
        const INPUT  = 0b0001;
        const OUTPUT = 0b0010;
        const ERROR  = 0b0100;
        const HANGUP = 0b1000;
    }
}

impl PollEvents {
    pub fn from_raw_revents(revents: libc::c_short) -> PollEvents {
        let mut flags = PollEvents::empty();
        if revents & libc::POLLIN != 0 { flags |= PollEvents::INPUT; }
        if revents & libc::POLLOUT != 0 { flags |= PollEvents::OUTPUT; }
        if revents & libc::POLLERR != 0 { flags |= PollEvents::ERROR; }
        if revents & libc::POLLHUP != 0 { flags |= PollEvents::HANGUP; }
        flags
    }
}

/// One fd the engine's real-time poll core should watch, and the events
/// it is interested in.
#[derive(Debug, Clone, Copy)]
pub struct PollDescriptor {
    pub fd: RawFd,
    pub events: PollEvents,
}
