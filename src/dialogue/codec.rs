//! Badge wire formats
//!
//! Everything on the wire is little-endian with fixed field widths, matching
//! the badge firmware. Commands lead with a one-byte ASCII tag; replies carry
//! no tag at all; the dialogue state machine knows what it is waiting for.
//! Status replies and chunk headers are both 13 bytes, so framing is purely
//! positional.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Command tag: status request ('s')
pub const TAG_STATUS: u8 = b's';
/// Command tag: start recording ('1')
pub const TAG_START_RECORDING: u8 = b'1';
/// Command tag: request data since a cursor ('r')
pub const TAG_DATA_REQUEST: u8 = b'r';
/// Command tag: end recording ('0')
pub const TAG_END_RECORDING: u8 = b'0';

/// Decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload too short for {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Decoded status reply
///
/// `clock_set`/`data_ready`/`recording` are the badge's own flags; the
/// timestamp is the badge's current clock and `voltage` its battery reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReply {
    pub clock_set: bool,
    pub data_ready: bool,
    pub recording: bool,
    pub seconds: u32,
    pub millis: u16,
    pub voltage: f32,
}

/// Decoded chunk header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkHeader {
    /// Chunk start, epoch seconds
    pub seconds: u32,
    /// Sub-second fraction of the start, milliseconds
    pub millis: u16,
    /// Battery voltage when the chunk was recorded
    pub voltage: f32,
    /// Spacing between consecutive samples, milliseconds
    pub sample_interval_ms: u16,
    /// Number of sample bytes the badge will send for this chunk
    pub sample_count: u8,
}

/// Encode a status request: tag + current epoch seconds and milliseconds.
/// Sending the time doubles as the badge's clock sync.
pub fn encode_status_request(seconds: u32, millis: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7);
    buf.push(TAG_STATUS);
    buf.write_u32::<LittleEndian>(seconds).unwrap();
    buf.write_u16::<LittleEndian>(millis).unwrap();
    buf
}

/// Encode a start-recording request with a recording timeout in minutes.
pub fn encode_start_recording(seconds: u32, millis: u16, timeout_minutes: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.push(TAG_START_RECORDING);
    buf.write_u32::<LittleEndian>(seconds).unwrap();
    buf.write_u16::<LittleEndian>(millis).unwrap();
    buf.write_u16::<LittleEndian>(timeout_minutes).unwrap();
    buf
}

/// Encode a data request with the resume cursor: the badge replays chunks
/// recorded at or after this time.
pub fn encode_data_request(seconds: u32, millis: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7);
    buf.push(TAG_DATA_REQUEST);
    buf.write_u32::<LittleEndian>(seconds).unwrap();
    buf.write_u16::<LittleEndian>(millis).unwrap();
    buf
}

/// Encode an end-recording request (bare tag).
pub fn encode_end_recording() -> Vec<u8> {
    vec![TAG_END_RECORDING]
}

/// Decode a status reply: three flag bytes, seconds, millis, voltage.
pub fn decode_status_reply(payload: &[u8]) -> Result<StatusReply, CodecError> {
    const LEN: usize = 13;
    if payload.len() < LEN {
        return Err(CodecError::Truncated {
            what: "status reply",
            expected: LEN,
            actual: payload.len(),
        });
    }
    let mut cursor = Cursor::new(payload);
    let clock_set = cursor.read_u8().unwrap() != 0;
    let data_ready = cursor.read_u8().unwrap() != 0;
    let recording = cursor.read_u8().unwrap() != 0;
    let seconds = cursor.read_u32::<LittleEndian>().unwrap();
    let millis = cursor.read_u16::<LittleEndian>().unwrap();
    let voltage = cursor.read_f32::<LittleEndian>().unwrap();
    Ok(StatusReply {
        clock_set,
        data_ready,
        recording,
        seconds,
        millis,
        voltage,
    })
}

/// Decode a chunk header: seconds, millis, voltage, sample interval, count.
pub fn decode_chunk_header(payload: &[u8]) -> Result<ChunkHeader, CodecError> {
    const LEN: usize = 13;
    if payload.len() < LEN {
        return Err(CodecError::Truncated {
            what: "chunk header",
            expected: LEN,
            actual: payload.len(),
        });
    }
    let mut cursor = Cursor::new(payload);
    let seconds = cursor.read_u32::<LittleEndian>().unwrap();
    let millis = cursor.read_u16::<LittleEndian>().unwrap();
    let voltage = cursor.read_f32::<LittleEndian>().unwrap();
    let sample_interval_ms = cursor.read_u16::<LittleEndian>().unwrap();
    let sample_count = cursor.read_u8().unwrap();
    Ok(ChunkHeader {
        seconds,
        millis,
        voltage,
        sample_interval_ms,
        sample_count,
    })
}

/// Encode a status reply (simulator / test side of the wire).
pub fn encode_status_reply(reply: &StatusReply) -> Vec<u8> {
    let mut buf = Vec::with_capacity(13);
    buf.push(reply.clock_set as u8);
    buf.push(reply.data_ready as u8);
    buf.push(reply.recording as u8);
    buf.write_u32::<LittleEndian>(reply.seconds).unwrap();
    buf.write_u16::<LittleEndian>(reply.millis).unwrap();
    buf.write_f32::<LittleEndian>(reply.voltage).unwrap();
    buf
}

/// Encode a chunk header (simulator / test side of the wire).
pub fn encode_chunk_header(header: &ChunkHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(13);
    buf.write_u32::<LittleEndian>(header.seconds).unwrap();
    buf.write_u16::<LittleEndian>(header.millis).unwrap();
    buf.write_f32::<LittleEndian>(header.voltage).unwrap();
    buf.write_u16::<LittleEndian>(header.sample_interval_ms).unwrap();
    buf.push(header.sample_count);
    buf
}
