use thiserror::Error;

use alsasrc_core::geometry::GeometryError;
use alsasrc_driver::DriverError;

/// Fatal-to-the-session errors. Transient-driver errors never reach
/// this type — they're handled by `recover` + `start` inside the path
/// functions and logged at debug.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("resume negotiated a different buffer geometry than before suspend: {0}")]
    GeometryMismatchOnResume(GeometryError),

    #[error("invalid buffer geometry: {0}")]
    Geometry(#[from] GeometryError),

    #[error("poll core error: {0}")]
    Poll(#[from] nix::Error),

    #[error("state controller received {message} while in state {state:?}")]
    IllegalStateTransition {
        state: crate::state::EngineState,
        message: &'static str,
    },
}
