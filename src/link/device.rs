//! Per-device connection lifecycle
//!
//! Sequences connect -> discover -> subscribe against the transport driver,
//! serialized across devices by the [`ConnectionLock`]. Radios on a dying
//! battery routinely stop answering without ever reporting an error, so every
//! successful operation rearms a per-device inactivity watchdog; watchdog
//! expiry is the only path that reclaims a silently stuck connection or a
//! lock held by a handshake that will never finish.
//!
//! There is no explicit cancellation of an in-flight connect: a stuck attempt
//! is abandoned where it hangs and the watchdog closes around it. Known
//! limitation, traded for a much simpler lifecycle.

use crate::config::LinkConfig;
use crate::link::lock::ConnectionLock;
use crate::transport::{Transport, TransportError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No session; open attempts are admitted (after the cool-down)
    Disconnected,
    /// Handshake in flight; this device holds the connection slot
    Connecting,
    /// Notification stream live; dialogue traffic flows
    Subscribed,
    /// Transport close in flight
    Disconnecting,
}

/// Events surfaced by a device link.
///
/// Delivered in order on the receiver returned by [`DeviceLink::new`].
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Subscription established; the dialogue may start talking
    Ready,
    /// One notification payload from the device, in arrival order
    Payload(Vec<u8>),
    /// A transport operation failed (handshake step or write)
    Failure(String),
    /// The session is fully torn down
    Disconnected,
}

/// Errors returned by link operations
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("dialogue is not open")]
    NotOpen,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Mutable per-device state, guarded for short await-free sections
struct Shared {
    state: LinkState,
    sending: bool,
    last_activity: Instant,
    last_disconnect: Option<Instant>,
    /// Outstanding watchdog timer; replaced (old one aborted) on every rearm
    watchdog: Option<JoinHandle<()>>,
}

struct LinkInner {
    address: String,
    transport: Arc<dyn Transport>,
    lock: ConnectionLock,
    config: LinkConfig,
    shared: Mutex<Shared>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

/// Admission verdict for an open attempt
enum Admission {
    Go,
    RetryLater,
    Reject(&'static str),
}

/// Handle to one device's connection lifecycle.
///
/// Cheap to clone; all clones drive the same underlying session.
#[derive(Clone)]
pub struct DeviceLink {
    inner: Arc<LinkInner>,
}

impl DeviceLink {
    /// Create a link for `address` and return it with its event stream.
    ///
    /// The same `lock` instance must be shared by every link in the process.
    pub fn new(
        address: impl Into<String>,
        transport: Arc<dyn Transport>,
        lock: ConnectionLock,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(LinkInner {
            address: address.into(),
            transport,
            lock,
            config,
            shared: Mutex::new(Shared {
                state: LinkState::Disconnected,
                sending: false,
                last_activity: Instant::now(),
                last_disconnect: None,
                watchdog: None,
            }),
            events,
        });
        (Self { inner }, events_rx)
    }

    /// Device address this link manages
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Current connection state
    pub fn state(&self) -> LinkState {
        self.inner.shared.lock().unwrap().state
    }

    /// Whether the dialogue is open for traffic
    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Subscribed
    }

    /// Begin opening the dialogue: acquire the connection slot, run the
    /// handshake, and emit [`LinkEvent::Ready`] once subscribed.
    ///
    /// Returns immediately. The attempt is silently dropped (logged) if the
    /// device disconnected less than the cool-down ago or is already busy;
    /// if another device holds the connection slot the attempt re-queues
    /// itself after a fixed delay instead of failing.
    pub fn open_dialogue(&self) {
        LinkInner::begin_open(Arc::clone(&self.inner));
    }

    /// Write a payload to the device, keeping the session open.
    pub async fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        self.inner.send(payload).await
    }

    /// Write a payload, then close regardless of how the write settled.
    pub async fn send_and_close(&self, payload: &[u8]) {
        let _ = self.inner.send(payload).await;
        self.inner.close().await;
    }

    /// Close the session. Idempotent.
    ///
    /// Defers (rearming the watchdog) while a handshake or write is in
    /// flight rather than interrupting it; no-ops when already closed or
    /// closing.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

impl LinkInner {
    fn begin_open(inner: Arc<LinkInner>) {
        let admission = {
            let mut shared = inner.shared.lock().unwrap();
            let cooldown = Duration::from_millis(inner.config.cooldown_ms);
            if shared
                .last_disconnect
                .is_some_and(|at| at.elapsed() < cooldown)
            {
                Admission::Reject("cooling down after disconnect")
            } else if shared.state != LinkState::Disconnected {
                Admission::Reject("already open or opening")
            } else if !inner.lock.try_acquire(&inner.address) {
                Admission::RetryLater
            } else {
                shared.state = LinkState::Connecting;
                shared.last_activity = Instant::now();
                Admission::Go
            }
        };

        match admission {
            Admission::Reject(reason) => {
                debug!(address = %inner.address, reason, "open attempt dropped");
            }
            Admission::RetryLater => {
                let holder = inner.lock.holder();
                let retry = Duration::from_millis(inner.config.lock_retry_ms);
                debug!(
                    address = %inner.address,
                    held_by = holder.as_deref().unwrap_or("?"),
                    retry_ms = inner.config.lock_retry_ms,
                    "connection slot busy, requeueing open attempt"
                );
                tokio::spawn(async move {
                    tokio::time::sleep(retry).await;
                    LinkInner::begin_open(inner);
                });
            }
            Admission::Go => {
                inner.arm_watchdog();
                info!(address = %inner.address, "opening dialogue");
                tokio::spawn(async move {
                    match inner.handshake().await {
                        Ok(stream) => inner.on_subscribed(stream),
                        Err(err) => {
                            warn!(address = %inner.address, %err, "handshake failed");
                            let _ = inner.events.send(LinkEvent::Failure(err.to_string()));
                            inner.force_close(err.is_dead_session()).await;
                        }
                    }
                });
            }
        }
    }

    async fn handshake(self: &Arc<Self>) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        self.transport.connect(&self.address).await?;
        self.touch_activity();
        self.transport.discover(&self.address).await?;
        self.touch_activity();
        let stream = self.transport.subscribe(&self.address).await?;
        Ok(stream)
    }

    fn on_subscribed(self: &Arc<Self>, mut stream: mpsc::Receiver<Vec<u8>>) {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.state != LinkState::Connecting {
                // The watchdog reclaimed this attempt while the driver was
                // still finishing the subscribe.
                debug!(address = %self.address, "stale subscribe result discarded");
                return;
            }
            shared.state = LinkState::Subscribed;
            shared.last_activity = Instant::now();
        }
        self.lock.release(&self.address);
        self.arm_watchdog();
        info!(address = %self.address, "subscribed, dialogue open");
        let _ = self.events.send(LinkEvent::Ready);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(payload) = stream.recv().await {
                if inner.shared.lock().unwrap().state != LinkState::Subscribed {
                    break;
                }
                inner.touch_activity();
                let _ = inner.events.send(LinkEvent::Payload(payload));
            }
            debug!(address = %inner.address, "notification stream ended");
            inner.close().await;
        });
    }

    async fn send(self: &Arc<Self>, payload: &[u8]) -> Result<(), LinkError> {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.state != LinkState::Subscribed {
                debug!(
                    address = %self.address,
                    state = ?shared.state,
                    "send rejected: dialogue not open"
                );
                return Err(LinkError::NotOpen);
            }
            shared.sending = true;
            shared.last_activity = Instant::now();
        }
        self.arm_watchdog();

        let result = self.transport.write(&self.address, payload).await;

        {
            let mut shared = self.shared.lock().unwrap();
            shared.sending = false;
            shared.last_activity = Instant::now();
        }
        self.arm_watchdog();

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(address = %self.address, %err, "write failed");
                let _ = self.events.send(LinkEvent::Failure(err.to_string()));
                if err.is_dead_session() {
                    self.force_close(true).await;
                }
                Err(err.into())
            }
        }
    }

    async fn close(self: &Arc<Self>) {
        {
            let mut shared = self.shared.lock().unwrap();
            match shared.state {
                LinkState::Disconnected | LinkState::Disconnecting => {
                    debug!(address = %self.address, "close ignored: already closed or closing");
                    return;
                }
                LinkState::Connecting => {
                    debug!(address = %self.address, "close deferred: handshake in flight");
                    drop(shared);
                    self.arm_watchdog();
                    return;
                }
                LinkState::Subscribed if shared.sending => {
                    debug!(address = %self.address, "close deferred: write in flight");
                    drop(shared);
                    self.arm_watchdog();
                    return;
                }
                LinkState::Subscribed => {
                    shared.state = LinkState::Disconnecting;
                    if let Some(watchdog) = shared.watchdog.take() {
                        watchdog.abort();
                    }
                }
            }
        }
        info!(address = %self.address, "closing");
        if let Err(err) = self.transport.close(&self.address).await {
            // failure is as terminal as success here
            warn!(address = %self.address, %err, "transport close reported an error");
        }
        self.finish_disconnect();
    }

    /// Tear the session down from any live state, clearing in-flight flags.
    ///
    /// Used by the watchdog and by failure paths. `skip_transport_close`
    /// short-circuits the driver call when the driver already declared the
    /// session dead.
    async fn force_close(self: &Arc<Self>, skip_transport_close: bool) {
        {
            let mut shared = self.shared.lock().unwrap();
            if matches!(
                shared.state,
                LinkState::Disconnected | LinkState::Disconnecting
            ) {
                return;
            }
            shared.sending = false;
            shared.state = LinkState::Disconnecting;
            if let Some(watchdog) = shared.watchdog.take() {
                watchdog.abort();
            }
        }
        if skip_transport_close {
            debug!(address = %self.address, "session already dead, skipping transport close");
        } else if let Err(err) = self.transport.close(&self.address).await {
            warn!(address = %self.address, %err, "transport close reported an error");
        }
        self.finish_disconnect();
    }

    fn finish_disconnect(self: &Arc<Self>) {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.state = LinkState::Disconnected;
            shared.sending = false;
            shared.last_activity = Instant::now();
            shared.last_disconnect = Some(Instant::now());
            if let Some(watchdog) = shared.watchdog.take() {
                watchdog.abort();
            }
        }
        if self.lock.release(&self.address) {
            debug!(address = %self.address, "released connection slot");
        }
        info!(address = %self.address, "disconnected");
        let _ = self.events.send(LinkEvent::Disconnected);
    }

    /// Record activity and rearm the watchdog while a session is live
    fn touch_activity(self: &Arc<Self>) {
        let rearm = {
            let mut shared = self.shared.lock().unwrap();
            shared.last_activity = Instant::now();
            matches!(
                shared.state,
                LinkState::Connecting | LinkState::Subscribed
            )
        };
        if rearm {
            self.arm_watchdog();
        }
    }

    fn arm_watchdog(self: &Arc<Self>) {
        let timeout = Duration::from_millis(self.config.watchdog_ms);
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(address = %inner.address, "inactivity watchdog fired, reclaiming session");
            inner.force_close(false).await;
        });
        let mut shared = self.shared.lock().unwrap();
        if matches!(
            shared.state,
            LinkState::Disconnected | LinkState::Disconnecting
        ) {
            // a completion racing the teardown must not arm a timer on a
            // session that no longer exists
            handle.abort();
            return;
        }
        if let Some(old) = shared.watchdog.replace(handle) {
            old.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Transport whose operations all succeed and deliver nothing
    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn connect(&self, _address: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn discover(&self, _address: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn subscribe(
            &self,
            _address: &str,
        ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
            let (tx, rx) = mpsc::channel(8);
            // keep the stream open for the lifetime of the test
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(tx);
            });
            Ok(rx)
        }
        async fn write(&self, _address: &str, _payload: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        async fn close(&self, _address: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn test_config() -> LinkConfig {
        LinkConfig {
            cooldown_ms: 100,
            lock_retry_ms: 50,
            watchdog_ms: 5000,
        }
    }

    #[tokio::test]
    async fn test_open_reaches_subscribed() {
        let (link, mut events) = DeviceLink::new(
            "aa:bb",
            Arc::new(NullTransport),
            ConnectionLock::new(),
            test_config(),
        );
        link.open_dialogue();
        assert_eq!(events.recv().await, Some(LinkEvent::Ready));
        assert!(link.is_open());
    }

    #[tokio::test]
    async fn test_send_rejected_when_closed() {
        let (link, _events) = DeviceLink::new(
            "aa:bb",
            Arc::new(NullTransport),
            ConnectionLock::new(),
            test_config(),
        );
        let err = link.send(b"s").await.unwrap_err();
        assert!(matches!(err, LinkError::NotOpen));
    }

    #[tokio::test]
    async fn test_close_releases_lock_and_respects_cooldown() {
        let lock = ConnectionLock::new();
        let (link, mut events) = DeviceLink::new(
            "aa:bb",
            Arc::new(NullTransport),
            lock.clone(),
            test_config(),
        );
        link.open_dialogue();
        assert_eq!(events.recv().await, Some(LinkEvent::Ready));
        // lock released on reaching subscribed
        assert_eq!(lock.holder(), None);

        link.close().await;
        assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));
        assert_eq!(link.state(), LinkState::Disconnected);

        // immediate reopen lands inside the cool-down and is dropped
        link.open_dialogue();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(lock.holder(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (link, mut events) = DeviceLink::new(
            "aa:bb",
            Arc::new(NullTransport),
            ConnectionLock::new(),
            test_config(),
        );
        link.open_dialogue();
        assert_eq!(events.recv().await, Some(LinkEvent::Ready));

        link.close().await;
        link.close().await;
        assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));
        // exactly one disconnect notification
        assert!(events.try_recv().is_err());
    }
}
