//! Strand Wire Protocol
//!
//! This crate defines the produce-path protocol types shared by strand
//! clients: per-partition error codes, produce request/response payloads,
//! message-set framing, and the compression and acknowledgement identifiers
//! carried on the wire.
//!
//! # Message framing
//!
//! Every message in a message set is framed as:
//!
//! ```text
//! ┌──────────┬──────────┬───────┬───────┬────────────┬─────────────┬─────────────┐
//! │ Offset   │ Size     │ CRC32 │ Magic │ Attributes │ Key         │ Value       │
//! │ 8 bytes  │ 4 bytes  │ 4 b   │ 1 b   │ 1 b        │ 4 b len + N │ 4 b len + N │
//! └──────────┴──────────┴───────┴───────┴────────────┴─────────────┴─────────────┘
//! ```
//!
//! Key and value lengths are big-endian `i32`; a missing key or value is
//! encoded as length `-1`. The CRC covers everything after the CRC field.
//! The framing overhead per message is therefore [`MESSAGE_OVERHEAD`] bytes,
//! and that constant is authoritative for all client-side size accounting.
//!
//! # Compression
//!
//! A compressed message set is wrapped as a *single* message whose value is
//! the encoded inner set and whose attributes carry the codec id. The wrapped
//! message is subject to the same per-message size limits as any other, which
//! is why producers split sets while batching under compression.

mod error;
mod produce;

pub use error::ErrorCode;
pub use produce::{
    CompressionType, MessageSet, ProduceRequest, ProduceResponse, ProduceResponseBlock,
    RequiredAcks, WireMessage,
};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Per-message framing overhead in bytes: 8 (offset) + 4 (size) + 4 (CRC)
/// + 1 (magic) + 1 (attributes) + 4 (key length) + 4 (value length).
///
/// The size of a message is defined as this overhead plus its key and value
/// lengths; every size-limit check a producer performs uses that definition.
pub const MESSAGE_OVERHEAD: usize = 26;
