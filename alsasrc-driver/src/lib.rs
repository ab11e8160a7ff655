pub mod error;
pub mod mmap;
pub mod poll;
pub mod traits;

#[cfg(target_os = "linux")]
pub mod alsa;

pub use error::DriverError;
pub use mmap::MmapRegion;
pub use poll::{PollDescriptor, PollEvents};
pub use traits::Driver;
