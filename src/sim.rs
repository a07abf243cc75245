//! In-memory badge simulator
//!
//! A [`Transport`] implementation that behaves like badge firmware on the
//! other side of the radio: it answers status requests, acks start-recording,
//! replays pre-loaded chunks from the requested cursor onward, and finishes
//! with the end-of-data sentinel. Used by the demo binary and the e2e tests;
//! per-address fault knobs make lifecycle edge cases drivable.

use crate::dialogue::codec::{
    self, ChunkHeader, StatusReply, TAG_DATA_REQUEST, TAG_END_RECORDING, TAG_START_RECORDING,
    TAG_STATUS,
};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Largest notification payload the simulated radio delivers at once
const NOTIFY_MTU: usize = 20;

/// Fault-injection knobs for one simulated badge
#[derive(Debug, Clone, Copy, Default)]
pub struct SimBehavior {
    /// Never complete the connect call (a radio that went out of range)
    pub hang_on_connect: bool,
    /// Fail service discovery
    pub fail_discover: bool,
    /// Fail every write
    pub fail_write: bool,
    /// Accept everything but never deliver a notification
    pub silent: bool,
}

/// One pre-loaded chunk of recorded samples
#[derive(Debug, Clone)]
struct SimChunk {
    seconds: u32,
    millis: u16,
    sample_interval_ms: u16,
    samples: Vec<u8>,
}

struct SimBadge {
    behavior: SimBehavior,
    voltage: f32,
    recording: bool,
    clock_set: bool,
    chunks: Vec<SimChunk>,
    notify: Option<mpsc::Sender<Vec<u8>>>,
}

/// Simulated multi-badge transport
#[derive(Default)]
pub struct SimTransport {
    badges: Mutex<HashMap<String, SimBadge>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a well-behaved badge reporting `voltage`.
    pub fn add_badge(&self, address: impl Into<String>, voltage: f32) {
        self.add_badge_with(address, voltage, SimBehavior::default());
    }

    /// Register a badge with fault-injection behavior.
    pub fn add_badge_with(&self, address: impl Into<String>, voltage: f32, behavior: SimBehavior) {
        self.badges.lock().unwrap().insert(
            address.into(),
            SimBadge {
                behavior,
                voltage,
                recording: false,
                clock_set: false,
                chunks: Vec::new(),
                notify: None,
            },
        );
    }

    /// Change a badge's fault behavior without touching its session state.
    pub fn set_behavior(&self, address: &str, behavior: SimBehavior) {
        if let Some(badge) = self.badges.lock().unwrap().get_mut(address) {
            badge.behavior = behavior;
        }
    }

    /// Pre-load one recorded chunk for a badge.
    pub fn load_chunk(
        &self,
        address: &str,
        seconds: u32,
        millis: u16,
        sample_interval_ms: u16,
        samples: Vec<u8>,
    ) {
        let mut badges = self.badges.lock().unwrap();
        if let Some(badge) = badges.get_mut(address) {
            badge.chunks.push(SimChunk {
                seconds,
                millis,
                sample_interval_ms,
                samples,
            });
        }
    }

    /// Whether the badge believes it is recording
    pub fn is_recording(&self, address: &str) -> bool {
        self.badges
            .lock()
            .unwrap()
            .get(address)
            .map(|b| b.recording)
            .unwrap_or(false)
    }

    fn behavior(&self, address: &str) -> Result<SimBehavior, TransportError> {
        self.badges
            .lock()
            .unwrap()
            .get(address)
            .map(|b| b.behavior)
            .ok_or_else(|| TransportError::Connect(format!("unknown badge {address}")))
    }

    /// Build the reply frames for one written command. Returns frames to
    /// deliver as notifications, in order.
    fn respond(&self, address: &str, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut badges = self.badges.lock().unwrap();
        let Some(badge) = badges.get_mut(address) else {
            return Vec::new();
        };
        if badge.behavior.silent {
            return Vec::new();
        }
        let Some(&tag) = payload.first() else {
            return Vec::new();
        };

        match tag {
            TAG_STATUS => {
                badge.clock_set = true;
                let (seconds, millis) = request_time(payload).unwrap_or((0, 0));
                vec![codec::encode_status_reply(&StatusReply {
                    clock_set: badge.clock_set,
                    data_ready: !badge.chunks.is_empty(),
                    recording: badge.recording,
                    seconds,
                    millis,
                    voltage: badge.voltage,
                })]
            }
            TAG_START_RECORDING => {
                badge.recording = true;
                vec![vec![1]]
            }
            TAG_DATA_REQUEST => {
                let cursor = request_time(payload).unwrap_or((0, 0));
                let mut frames = Vec::new();
                for chunk in &badge.chunks {
                    if (chunk.seconds, chunk.millis) < cursor {
                        continue;
                    }
                    frames.push(codec::encode_chunk_header(&ChunkHeader {
                        seconds: chunk.seconds,
                        millis: chunk.millis,
                        voltage: badge.voltage,
                        sample_interval_ms: chunk.sample_interval_ms,
                        sample_count: chunk.samples.len() as u8,
                    }));
                    for frame in chunk.samples.chunks(NOTIFY_MTU) {
                        frames.push(frame.to_vec());
                    }
                }
                // end-of-data sentinel: zero fraction, implausible voltage
                frames.push(codec::encode_chunk_header(&ChunkHeader {
                    seconds: 0,
                    millis: 0,
                    voltage: 0.0,
                    sample_interval_ms: 0,
                    sample_count: 0,
                }));
                frames
            }
            TAG_END_RECORDING => {
                badge.recording = false;
                Vec::new()
            }
            _ => {
                debug!(address, tag, "simulator ignoring unknown command");
                Vec::new()
            }
        }
    }
}

/// Parse the (seconds, millis) pair that follows a command tag
fn request_time(payload: &[u8]) -> Option<(u32, u16)> {
    if payload.len() < 7 {
        return None;
    }
    let mut cursor = Cursor::new(&payload[1..]);
    let seconds = cursor.read_u32::<LittleEndian>().ok()?;
    let millis = cursor.read_u16::<LittleEndian>().ok()?;
    Some((seconds, millis))
}

#[async_trait]
impl Transport for SimTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let behavior = self.behavior(address)?;
        if behavior.hang_on_connect {
            // a badge that will never answer; only the caller's watchdog
            // gets things moving again
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn discover(&self, address: &str) -> Result<(), TransportError> {
        let behavior = self.behavior(address)?;
        if behavior.fail_discover {
            return Err(TransportError::Discover(format!(
                "{address}: no services found"
            )));
        }
        Ok(())
    }

    async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        self.behavior(address)?;
        let (tx, rx) = mpsc::channel(256);
        let mut badges = self.badges.lock().unwrap();
        let badge = badges
            .get_mut(address)
            .ok_or_else(|| TransportError::Subscribe(format!("unknown badge {address}")))?;
        badge.notify = Some(tx);
        Ok(rx)
    }

    async fn write(&self, address: &str, payload: &[u8]) -> Result<(), TransportError> {
        let behavior = self.behavior(address)?;
        if behavior.fail_write {
            return Err(TransportError::Write(format!(
                "{address}: device needs reconnect or close"
            )));
        }
        let frames = self.respond(address, payload);
        let sender = self
            .badges
            .lock()
            .unwrap()
            .get(address)
            .and_then(|b| b.notify.clone());
        if let Some(sender) = sender {
            for frame in frames {
                if sender.send(frame).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn close(&self, address: &str) -> Result<(), TransportError> {
        if let Some(badge) = self.badges.lock().unwrap().get_mut(address) {
            // dropping the sender ends the notification stream
            badge.notify = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_exchange() {
        let sim = SimTransport::new();
        sim.add_badge("aa", 2.8);

        let mut stream = sim.subscribe("aa").await.unwrap();
        sim.write("aa", &codec::encode_status_request(123, 456))
            .await
            .unwrap();

        let reply = codec::decode_status_reply(&stream.recv().await.unwrap()).unwrap();
        assert!(reply.clock_set);
        assert!(!reply.data_ready);
        assert!(!reply.recording);
        assert_eq!((reply.seconds, reply.millis), (123, 456));
        assert_eq!(reply.voltage, 2.8);
    }

    #[tokio::test]
    async fn test_data_replay_respects_cursor() {
        let sim = SimTransport::new();
        sim.add_badge("aa", 2.8);
        sim.load_chunk("aa", 100, 0, 50, vec![1; 5]);
        sim.load_chunk("aa", 200, 0, 50, vec![2; 5]);

        let mut stream = sim.subscribe("aa").await.unwrap();
        sim.write("aa", &codec::encode_data_request(150, 0))
            .await
            .unwrap();

        // only the second chunk replays: header, one data frame, sentinel
        let header = codec::decode_chunk_header(&stream.recv().await.unwrap()).unwrap();
        assert_eq!(header.seconds, 200);
        assert_eq!(stream.recv().await.unwrap(), vec![2; 5]);
        let sentinel = codec::decode_chunk_header(&stream.recv().await.unwrap()).unwrap();
        assert_eq!(sentinel.millis, 0);
        assert_eq!(sentinel.voltage, 0.0);
    }

    #[tokio::test]
    async fn test_large_chunk_is_framed_at_mtu() {
        let sim = SimTransport::new();
        sim.add_badge("aa", 2.8);
        sim.load_chunk("aa", 100, 0, 50, vec![7; 50]);

        let mut stream = sim.subscribe("aa").await.unwrap();
        sim.write("aa", &codec::encode_data_request(0, 0))
            .await
            .unwrap();

        let _header = stream.recv().await.unwrap();
        assert_eq!(stream.recv().await.unwrap().len(), 20);
        assert_eq!(stream.recv().await.unwrap().len(), 20);
        assert_eq!(stream.recv().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_recording_flag_follows_requests() {
        let sim = SimTransport::new();
        sim.add_badge("aa", 2.8);
        let mut stream = sim.subscribe("aa").await.unwrap();

        sim.write("aa", &codec::encode_start_recording(1, 0, 5))
            .await
            .unwrap();
        assert_eq!(stream.recv().await.unwrap(), vec![1]);
        assert!(sim.is_recording("aa"));

        sim.write("aa", &codec::encode_end_recording()).await.unwrap();
        assert!(!sim.is_recording("aa"));
    }

    #[tokio::test]
    async fn test_dead_session_write() {
        let sim = SimTransport::new();
        sim.add_badge_with(
            "aa",
            2.8,
            SimBehavior {
                fail_write: true,
                ..SimBehavior::default()
            },
        );
        let err = sim.write("aa", &[0]).await.unwrap_err();
        assert!(err.is_dead_session());
    }
}
