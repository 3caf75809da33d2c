//! Produce request/response payloads and message-set framing

use crate::MESSAGE_OVERHEAD;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Magic byte identifying the message format version.
const MESSAGE_MAGIC: u8 = 0;

/// Bits of the attributes byte that carry the compression codec id.
const CODEC_MASK: u8 = 0x07;

/// Acknowledgement level the broker must reach before answering a produce
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(i16)]
pub enum RequiredAcks {
    /// Do not wait for any acknowledgement; the broker sends no response.
    NoResponse = 0,
    /// Wait until the leader has written the messages to its local log.
    #[default]
    WaitForLocal = 1,
    /// Wait until all in-sync replicas have committed the messages.
    WaitForAll = -1,
}

/// Compression codec identifier carried in the message attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionType {
    /// Codec id as encoded into the attributes byte.
    pub fn id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gzip => 1,
            Self::Snappy => 2,
            Self::Lz4 => 3,
            Self::Zstd => 4,
        }
    }
}

/// A single message as framed on the wire: codec, optional key, optional
/// value. For a compressed wrapper message the value holds an encoded inner
/// [`MessageSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub codec: CompressionType,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl WireMessage {
    pub fn new(codec: CompressionType, key: Option<Bytes>, value: Option<Bytes>) -> Self {
        Self { codec, key, value }
    }

    /// Encoded size of this message including its framing overhead.
    pub fn encoded_len(&self) -> usize {
        MESSAGE_OVERHEAD
            + self.key.as_ref().map_or(0, |k| k.len())
            + self.value.as_ref().map_or(0, |v| v.len())
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        // Offset is assigned by the broker; producers write a placeholder.
        buf.put_i64(0);
        buf.put_i32((self.encoded_len() - 12) as i32);

        // CRC covers everything after the CRC field itself.
        let mut body = BytesMut::with_capacity(self.encoded_len() - 16);
        body.put_u8(MESSAGE_MAGIC);
        body.put_u8(self.codec.id() & CODEC_MASK);
        match &self.key {
            Some(key) => {
                body.put_i32(key.len() as i32);
                body.put_slice(key);
            }
            None => body.put_i32(-1),
        }
        match &self.value {
            Some(value) => {
                body.put_i32(value.len() as i32);
                body.put_slice(value);
            }
            None => body.put_i32(-1),
        }

        buf.put_u32(crc32fast::hash(&body));
        buf.put_slice(&body);
    }
}

/// An ordered set of messages bound for one topic-partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSet {
    pub messages: Vec<WireMessage>,
}

impl MessageSet {
    pub fn add_message(&mut self, message: WireMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Encoded size of the whole set.
    pub fn encoded_len(&self) -> usize {
        self.messages.iter().map(WireMessage::encoded_len).sum()
    }

    /// Encode the set into its wire framing. Used when wrapping the set as
    /// the value of a single compressed message.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        for message in &self.messages {
            message.encode_into(&mut buf);
        }
        buf.freeze()
    }
}

/// A produce request: message sets grouped by topic and partition, plus the
/// acknowledgement level and server-side timeout that apply to the whole
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceRequest {
    pub required_acks: RequiredAcks,
    pub timeout_ms: i32,
    pub sets: HashMap<String, HashMap<i32, MessageSet>>,
}

impl ProduceRequest {
    pub fn new(required_acks: RequiredAcks, timeout_ms: i32) -> Self {
        Self {
            required_acks,
            timeout_ms,
            sets: HashMap::new(),
        }
    }

    /// Install a complete message set for a topic-partition, replacing any
    /// set already present.
    pub fn add_set(&mut self, topic: &str, partition: i32, set: MessageSet) {
        self.sets
            .entry(topic.to_string())
            .or_default()
            .insert(partition, set);
    }

    /// Append a single message to the set of a topic-partition, creating the
    /// set on first use.
    pub fn add_message(&mut self, topic: &str, partition: i32, message: WireMessage) {
        self.sets
            .entry(topic.to_string())
            .or_default()
            .entry(partition)
            .or_default()
            .add_message(message);
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|p| p.values().all(MessageSet::is_empty))
    }

    /// Total number of wire messages across all topic-partitions.
    pub fn message_count(&self) -> usize {
        self.sets
            .values()
            .flat_map(|p| p.values())
            .map(MessageSet::len)
            .sum()
    }
}

/// Per-partition outcome within a produce response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceResponseBlock {
    /// Outcome code for the partition.
    pub error: crate::ErrorCode,
    /// Offset assigned to the first message of the set when the write
    /// succeeded.
    pub base_offset: i64,
}

/// A produce response: one block per topic-partition the broker answered
/// for. Partitions present in the request but absent here indicate a
/// truncated response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub blocks: HashMap<String, HashMap<i32, ProduceResponseBlock>>,
}

impl ProduceResponse {
    pub fn add_block(&mut self, topic: &str, partition: i32, block: ProduceResponseBlock) {
        self.blocks
            .entry(topic.to_string())
            .or_default()
            .insert(partition, block);
    }

    pub fn get_block(&self, topic: &str, partition: i32) -> Option<&ProduceResponseBlock> {
        self.blocks.get(topic).and_then(|p| p.get(&partition))
    }
}
