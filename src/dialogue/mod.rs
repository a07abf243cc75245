//! Badge dialogue protocol
//!
//! The request/response exchange spoken with a badge over its subscribed
//! notification channel: command encoding, status/header/data decoding,
//! chunk reconstruction, and the incremental resume cursor.

pub mod chunk;
pub mod codec;
pub mod protocol;

pub use chunk::Chunk;
pub use codec::{ChunkHeader, CodecError, StatusReply};
pub use protocol::{BadgeDialogue, DialogueState};
