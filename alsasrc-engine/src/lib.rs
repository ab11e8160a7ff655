//! The capture thread: the real-time poll core, the two I/O paths, the
//! timer budget calculator, the overrun adjuster, and the suspend/resume
//! state transitions.
//!
//! Everything here runs on exactly one thread: the capture
//! thread, which owns the driver handle, the smoother, the poll core and
//! the message queue endpoints exclusively.

pub mod capture;
pub mod downstream;
pub mod error;
pub mod message;
pub mod poll_core;
pub mod state;
pub mod sw_params;
pub mod thread_info;

pub use capture::{CaptureConfig, CaptureEngine, UnloadSink};
pub use error::EngineError;
pub use state::EngineState;
