//! Badgelink - wearable badge telemetry link and speaking-time analytics
//!
//! This library talks to battery-powered wearable badges over a short-range
//! wireless link, pulls timestamped loudness samples through the badge's
//! binary request/response protocol, and turns them into per-member speaking
//! intervals and cross-member turn arbitration.
//!
//! The wireless driver itself is external: everything here runs against the
//! [`transport::Transport`] seam, so the same pipeline drives real hardware
//! or the in-memory [`sim::SimTransport`] badge simulator.

pub mod analytics;
pub mod config;
pub mod dialogue;
pub mod link;
pub mod sim;
pub mod transport;

pub use analytics::{GroupAnalyzer, Sample, SpeakPolicy, TalkInterval, VolumeAnalyzer};
pub use config::Config;
pub use dialogue::{BadgeDialogue, Chunk};
pub use link::{ConnectionLock, DeviceLink, LinkEvent};
pub use transport::{Transport, TransportError};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
