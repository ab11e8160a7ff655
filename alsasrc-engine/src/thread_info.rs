//! Cross-thread state: a single aggregate owned exclusively by the
//! capture thread, mutated only in response to messages it has already
//! processed, rather than mirror fields scattered on the downstream
//! source.

use alsasrc_core::CaptureStats;

use crate::state::EngineState;

pub struct ThreadInfo {
    pub state: EngineState,
    pub stats: CaptureStats,
    /// `polled` from: whether the last wake saw POLLIN on the
    /// driver's fds, fed back in as the next iteration's argument.
    pub polled: bool,
    /// Last virtual volume the downstream source told us about, replayed
    /// on resume.
    pub last_virtual_volume: Option<u32>,
}

impl ThreadInfo {
    pub fn new() -> Self {
        ThreadInfo {
            state: EngineState::Init,
            stats: CaptureStats::new(),
            polled: false,
            last_virtual_volume: None,
        }
    }
}

impl Default for ThreadInfo {
    fn default() -> Self {
        ThreadInfo::new()
    }
}
