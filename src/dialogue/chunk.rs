//! Chunk reconstruction
//!
//! A chunk is one header-delimited batch of consecutive loudness samples.
//! Data frames append sample bytes until the header's declared count is
//! reached; the accumulated length never exceeds the declared count.

use crate::dialogue::codec::ChunkHeader;

/// A batch of loudness samples reconstructed from one header plus the data
/// frames that follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Battery voltage when the chunk was recorded
    pub voltage: f32,
    /// Chunk start, epoch seconds
    pub seconds: u32,
    /// Sub-second fraction of the start, milliseconds
    pub millis: u16,
    /// Spacing between consecutive samples, milliseconds
    pub sample_interval_ms: u16,
    /// Sample count announced by the header
    pub declared_count: u8,
    samples: Vec<u8>,
}

impl Chunk {
    /// Start an empty chunk from a decoded header.
    pub fn new(header: &ChunkHeader) -> Self {
        Self {
            voltage: header.voltage,
            seconds: header.seconds,
            millis: header.millis,
            sample_interval_ms: header.sample_interval_ms,
            declared_count: header.sample_count,
            samples: Vec::with_capacity(header.sample_count as usize),
        }
    }

    /// Append sample bytes, clamping at the declared count.
    ///
    /// Returns the number of bytes that did not fit. The caller logs any
    /// overflow as a protocol error; the chunk itself stays at capacity.
    pub fn push_samples(&mut self, data: &[u8]) -> usize {
        let room = (self.declared_count as usize).saturating_sub(self.samples.len());
        let take = room.min(data.len());
        self.samples.extend_from_slice(&data[..take]);
        data.len() - take
    }

    /// Whether the declared count has been reached
    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.declared_count as usize
    }

    /// Accumulated sample bytes, one unsigned volume unit per sample
    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// Chunk start timestamp as epoch milliseconds
    pub fn start_timestamp_ms(&self) -> i64 {
        self.seconds as i64 * 1000 + self.millis as i64
    }

    /// Chunk start as the (seconds, millis) pair used by resume cursors
    pub fn timestamp(&self) -> (u32, u16) {
        (self.seconds, self.millis)
    }
}
