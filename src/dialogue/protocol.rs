//! Badge dialogue state machine
//!
//! Drives one badge through its recording session: status exchange, start
//! recording, then the header/data loop that reconstructs chunks. The badge
//! sends an unstructured byte stream with no length prefix, so framing rests
//! on a single heuristic: a 13-byte payload whose voltage field sits in the
//! plausible battery range is a header ([`BadgeDialogue::looks_like_header`]).
//! Inherited from the firmware; do not "fix" it here.

use crate::config::DialogueConfig;
use crate::dialogue::chunk::Chunk;
use crate::dialogue::codec::{self, ChunkHeader};
use crate::link::{DeviceLink, LinkEvent};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What the dialogue expects to receive next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    /// Waiting for the reply to a status request
    AwaitingStatus,
    /// Waiting for the badge to acknowledge the start-recording request
    AwaitingRecordingAck,
    /// Waiting for the next chunk header (or the end-of-data sentinel)
    AwaitingHeader,
    /// Waiting for sample bytes of the working chunk
    AwaitingData,
}

/// Protocol state machine for one badge.
///
/// Fed with [`LinkEvent`]s from the device link; emits completed chunks on
/// the receiver returned by [`BadgeDialogue::new`]. A malformed payload never
/// corrupts progress: the working chunk is only ever replaced by a valid
/// header, so decode failures just log and hold position.
pub struct BadgeDialogue {
    link: DeviceLink,
    config: DialogueConfig,
    state: DialogueState,
    working: Option<Chunk>,
    /// Start of the last fully received chunk; the resume cursor
    completed_at: Option<(u32, u16)>,
    chunks: mpsc::UnboundedSender<Chunk>,
    /// Optional mirror of every emitted chunk, for raw-log persistence
    raw_tap: Option<mpsc::UnboundedSender<Chunk>>,
}

impl BadgeDialogue {
    /// Create a dialogue over `link` and return it with its chunk stream.
    pub fn new(
        link: DeviceLink,
        config: DialogueConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Chunk>) {
        let (chunks, chunks_rx) = mpsc::unbounded_channel();
        (
            Self {
                link,
                config,
                state: DialogueState::AwaitingStatus,
                working: None,
                completed_at: None,
                chunks,
                raw_tap: None,
            },
            chunks_rx,
        )
    }

    /// Mirror every emitted chunk to a second consumer.
    pub fn with_raw_tap(mut self, tap: mpsc::UnboundedSender<Chunk>) -> Self {
        self.raw_tap = Some(tap);
        self
    }

    /// Current protocol state
    pub fn state(&self) -> DialogueState {
        self.state
    }

    /// Start of the last fully received chunk, if any
    pub fn resume_cursor(&self) -> Option<(u32, u16)> {
        self.completed_at
    }

    /// Drive the dialogue from a link event stream until it ends.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    /// Process one link event.
    pub async fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Ready => self.send_status_request().await,
            LinkEvent::Payload(payload) => self.on_payload(&payload).await,
            LinkEvent::Failure(reason) => {
                warn!(address = %self.link.address(), reason = %reason, "link failure");
            }
            LinkEvent::Disconnected => self.reset_state(),
        }
    }

    /// Reset to the start of the exchange. Called between sessions; the
    /// resume cursor survives so the next session only re-requests data
    /// we do not already hold.
    pub fn reset_state(&mut self) {
        debug!(address = %self.link.address(), "dialogue reset");
        self.state = DialogueState::AwaitingStatus;
        self.working = None;
    }

    /// Send a status request stamped with the current time (which also sets
    /// the badge clock).
    pub async fn send_status_request(&mut self) {
        let (seconds, millis) = now_sec_ms();
        debug!(address = %self.link.address(), seconds, millis, "sending status request");
        self.state = DialogueState::AwaitingStatus;
        self.send(&codec::encode_status_request(seconds, millis)).await;
    }

    /// Ask the badge to start (or keep) recording.
    pub async fn send_start_recording_request(&mut self) {
        let (seconds, millis) = now_sec_ms();
        let timeout = self.config.recording_timeout_minutes;
        debug!(
            address = %self.link.address(),
            timeout_minutes = timeout,
            "sending start-recording request"
        );
        self.state = DialogueState::AwaitingRecordingAck;
        self.send(&codec::encode_start_recording(seconds, millis, timeout))
            .await;
    }

    /// Request data from the resume cursor onward.
    pub async fn send_data_request(&mut self) {
        let (seconds, millis) = self.resume_point();
        debug!(
            address = %self.link.address(),
            seconds, millis,
            "requesting data since cursor"
        );
        self.state = DialogueState::AwaitingHeader;
        self.send(&codec::encode_data_request(seconds, millis)).await;
    }

    /// Tell the badge to stop recording, then close the session.
    pub async fn send_end_recording_and_close(&mut self) {
        info!(address = %self.link.address(), "ending recording and closing");
        self.link
            .send_and_close(&codec::encode_end_recording())
            .await;
    }

    /// State machine core: interpret one notification payload.
    pub async fn on_payload(&mut self, payload: &[u8]) {
        match self.state {
            DialogueState::AwaitingStatus => match codec::decode_status_reply(payload) {
                Ok(status) => {
                    info!(
                        address = %self.link.address(),
                        seconds = status.seconds,
                        millis = status.millis,
                        voltage = status.voltage,
                        recording = status.recording,
                        "status reply"
                    );
                    self.send_start_recording_request().await;
                }
                Err(err) => {
                    warn!(address = %self.link.address(), %err, "bad status reply");
                }
            },
            DialogueState::AwaitingRecordingAck => {
                // any payload in this state is the ack; its body is ignored
                debug!(address = %self.link.address(), "recording ack");
                self.send_data_request().await;
            }
            DialogueState::AwaitingHeader => match codec::decode_chunk_header(payload) {
                Ok(header) => self.on_header(header).await,
                Err(err) => {
                    warn!(address = %self.link.address(), %err, "bad chunk header");
                }
            },
            DialogueState::AwaitingData => self.on_data(payload),
        }
    }

    /// The framing heuristic: a header is plausible only if its voltage
    /// field lands in the configured battery range.
    fn looks_like_header(&self, header: &ChunkHeader) -> bool {
        header.voltage > self.config.voltage_min && header.voltage < self.config.voltage_max
    }

    async fn on_header(&mut self, header: ChunkHeader) {
        if self.looks_like_header(&header) {
            debug!(
                address = %self.link.address(),
                seconds = header.seconds,
                millis = header.millis,
                voltage = header.voltage,
                count = header.sample_count,
                "chunk header"
            );
            if let Some(working) = self.working.take() {
                if working.timestamp() != (header.seconds, header.millis) {
                    // the badge moved on; whatever we have of the old chunk
                    // is all we will ever get
                    self.emit(working);
                } else {
                    debug!(
                        address = %self.link.address(),
                        "header re-announced, restarting chunk"
                    );
                }
            }
            let chunk = Chunk::new(&header);
            if chunk.is_complete() {
                // zero declared samples; nothing to wait for
                self.emit(chunk);
                self.state = DialogueState::AwaitingHeader;
            } else {
                self.working = Some(chunk);
                self.state = DialogueState::AwaitingData;
            }
        } else if header.millis == 0 {
            info!(address = %self.link.address(), "end of data, closing");
            if let Some(working) = self.working.take() {
                if working.is_complete() {
                    self.emit(working);
                }
            }
            self.link.close().await;
        } else {
            warn!(
                address = %self.link.address(),
                voltage = header.voltage,
                "implausible header discarded"
            );
        }
    }

    fn on_data(&mut self, payload: &[u8]) {
        let Some(working) = self.working.as_mut() else {
            // cannot happen from the state machine, but never panic on wire data
            warn!(address = %self.link.address(), "data frame with no working chunk");
            self.state = DialogueState::AwaitingHeader;
            return;
        };
        let overflow = working.push_samples(payload);
        if overflow > 0 {
            warn!(
                address = %self.link.address(),
                overflow,
                declared = working.declared_count,
                "chunk overflow, excess discarded"
            );
        }
        if working.is_complete() {
            if let Some(chunk) = self.working.take() {
                self.emit(chunk);
            }
            self.state = DialogueState::AwaitingHeader;
        }
    }

    /// Hand a chunk to the consumers. Only complete chunks advance the
    /// resume cursor; a partial chunk will be re-requested next session.
    fn emit(&mut self, chunk: Chunk) {
        if chunk.is_complete() {
            self.completed_at = Some(chunk.timestamp());
        }
        debug!(
            address = %self.link.address(),
            seconds = chunk.seconds,
            samples = chunk.samples().len(),
            complete = chunk.is_complete(),
            "chunk emitted"
        );
        if let Some(tap) = &self.raw_tap {
            let _ = tap.send(chunk.clone());
        }
        let _ = self.chunks.send(chunk);
    }

    /// Resume point for data requests: the last fully received chunk, or a
    /// fixed lookback from now for a fresh session.
    fn resume_point(&self) -> (u32, u16) {
        match self.completed_at {
            Some(at) => at,
            None => {
                let (seconds, millis) = now_sec_ms();
                (seconds.saturating_sub(self.config.resync_lookback_secs), millis)
            }
        }
    }

    async fn send(&mut self, payload: &[u8]) {
        if let Err(err) = self.link.send(payload).await {
            warn!(address = %self.link.address(), %err, "command send failed");
        }
    }
}

/// Current wall-clock time as the protocol's (epoch seconds, millis) pair
fn now_sec_ms() -> (u32, u16) {
    let now = Utc::now();
    (now.timestamp() as u32, now.timestamp_subsec_millis() as u16)
}
