//! Per-device connection lifecycle management
//!
//! One [`DeviceLink`] per badge sequences connect -> discover -> subscribe,
//! guards the process-wide single-connection-attempt [`ConnectionLock`], and
//! recovers stuck sessions through an inactivity watchdog.

pub mod device;
pub mod lock;

pub use device::{DeviceLink, LinkError, LinkEvent, LinkState};
pub use lock::ConnectionLock;
