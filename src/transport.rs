//! Abstract wireless transport seam
//!
//! The badge link never drives radio hardware directly. It consumes this
//! trait, implemented by the platform's wireless driver (or by
//! [`crate::sim::SimTransport`] for tests and demos). Each operation is
//! asynchronous and addressed by the device's opaque address string;
//! `subscribe` hands back the per-device notification stream.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Driver message fragment that marks a session the driver already considers
/// dead. A failure carrying it must not be answered with a second close.
const DEAD_SESSION_MARKER: &str = "needs reconnect or close";

/// Errors surfaced by a transport driver
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("discovery failed: {0}")]
    Discover(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("close failed: {0}")]
    Close(String),
}

impl TransportError {
    /// Driver message carried by this error
    pub fn message(&self) -> &str {
        match self {
            TransportError::Connect(m)
            | TransportError::Discover(m)
            | TransportError::Subscribe(m)
            | TransportError::Write(m)
            | TransportError::Close(m) => m,
        }
    }

    /// True when the driver reports the session is already gone and a close
    /// attempt would only fail again.
    pub fn is_dead_session(&self) -> bool {
        self.message().contains(DEAD_SESSION_MARKER)
    }
}

/// Asynchronous wireless driver operations, addressed per device.
///
/// Payloads delivered on the `subscribe` receiver are assumed to arrive in
/// the order the driver observed them (FIFO per subscription). No ordering
/// is assumed across devices.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a connection to the device.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Run service discovery on a connected device.
    async fn discover(&self, address: &str) -> Result<(), TransportError>;

    /// Subscribe to the device's notification channel.
    ///
    /// Returns a stream of opaque byte payloads. The stream ends when the
    /// connection is closed or the driver drops the subscription.
    async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    /// Write a payload to the device.
    async fn write(&self, address: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Tear down the connection. Safe to call in any driver state.
    async fn close(&self, address: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_session_detection() {
        let err = TransportError::Write("device needs reconnect or close".to_string());
        assert!(err.is_dead_session());

        let err = TransportError::Write("timed out".to_string());
        assert!(!err.is_dead_session());
    }

    #[test]
    fn test_message_accessor() {
        let err = TransportError::Discover("no services".to_string());
        assert_eq!(err.message(), "no services");
        assert_eq!(err.to_string(), "discovery failed: no services");
    }
}
