//! Message envelope and content encoders

use crate::error::Result;
use bytes::Bytes;
use std::any::Any;
use strand_protocol::MESSAGE_OVERHEAD;

/// Lazily-encoded message content.
///
/// Encoding is deferred until the message reaches the wire path, and the
/// result is cached on the message so repeated trips through the retry loop
/// never re-encode. `len` must be cheap: it is consulted for every
/// size-limit and batching decision.
pub trait Encoder: Send + Sync {
    /// Produce the encoded bytes.
    fn encode(&self) -> Result<Bytes>;

    /// The encoded length, without encoding.
    fn len(&self) -> usize;

    /// Whether the encoded form is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encoder for UTF-8 string content.
#[derive(Debug, Clone)]
pub struct StringEncoder(pub String);

impl Encoder for StringEncoder {
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.0.as_bytes()))
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Encoder for raw byte content.
#[derive(Debug, Clone)]
pub struct BytesEncoder(pub Bytes);

impl Encoder for BytesEncoder {
    fn encode(&self) -> Result<Bytes> {
        Ok(self.0.clone())
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Internal marker flags. Chasers are synthetic retry-protocol messages;
/// the shutdown flag marks the sentinel that starts producer shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MessageFlags {
    pub chaser: bool,
    pub shutdown: bool,
}

/// A message submitted to the producer.
///
/// `topic`, `key`, `value`, `metadata`, and (for the manual partitioner)
/// `partition` are filled in by the caller; `partition` and `offset` are
/// assigned by the producer as the message moves through the pipeline.
/// `offset` is only meaningful on messages delivered through the successes
/// channel with an acknowledgement level other than
/// [`RequiredAcks::NoResponse`](strand_protocol::RequiredAcks::NoResponse).
pub struct ProducerMessage {
    /// Destination topic. Must be non-empty.
    pub topic: String,
    /// Optional partitioning key.
    pub key: Option<Box<dyn Encoder>>,
    /// Optional message payload.
    pub value: Option<Box<dyn Encoder>>,
    /// Opaque pass-through data; the producer never inspects it.
    pub metadata: Option<Box<dyn Any + Send>>,
    /// Partition the message was (or, with the manual partitioner, should
    /// be) routed to.
    pub partition: i32,
    /// Offset assigned by the broker on successful delivery.
    pub offset: i64,

    pub(crate) retries: usize,
    pub(crate) flags: MessageFlags,
    pub(crate) key_cache: Option<Bytes>,
    pub(crate) value_cache: Option<Bytes>,
}

impl ProducerMessage {
    /// Create an empty message for the given topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: None,
            metadata: None,
            partition: 0,
            offset: 0,
            retries: 0,
            flags: MessageFlags::default(),
            key_cache: None,
            value_cache: None,
        }
    }

    /// Set the partitioning key.
    pub fn with_key(mut self, key: impl Encoder + 'static) -> Self {
        self.key = Some(Box::new(key));
        self
    }

    /// Set the payload.
    pub fn with_value(mut self, value: impl Encoder + 'static) -> Self {
        self.value = Some(Box::new(value));
        self
    }

    /// Attach opaque pass-through data, available again when the message
    /// comes back on the successes or errors channel.
    pub fn with_metadata(mut self, metadata: impl Any + Send) -> Self {
        self.metadata = Some(Box::new(metadata));
        self
    }

    /// Pre-select a partition; only honored by the manual partitioner.
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    /// The synthetic zero-payload message that confirms all earlier
    /// messages of a retry round have drained downstream.
    pub(crate) fn chaser(topic: String, partition: i32, retries: usize) -> Self {
        let mut msg = Self::new(topic);
        msg.partition = partition;
        msg.retries = retries;
        msg.flags.chaser = true;
        msg
    }

    /// The sentinel injected into the input stream to begin shutdown.
    pub(crate) fn shutdown_sentinel() -> Self {
        let mut msg = Self::new("");
        msg.flags.shutdown = true;
        msg
    }

    pub(crate) fn is_chaser(&self) -> bool {
        self.flags.chaser
    }

    /// Size of the message as framed on the wire; authoritative for all
    /// size-limit checks.
    pub(crate) fn byte_size(&self) -> usize {
        MESSAGE_OVERHEAD
            + self.key.as_ref().map_or(0, |k| k.len())
            + self.value.as_ref().map_or(0, |v| v.len())
    }

    /// Reset internal state before handing the message back to the caller.
    pub(crate) fn clear(&mut self) {
        self.retries = 0;
        self.flags = MessageFlags::default();
        self.key_cache = None;
        self.value_cache = None;
    }
}

impl std::fmt::Debug for ProducerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerMessage")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key_len", &self.key.as_ref().map(|k| k.len()))
            .field("value_len", &self.value.as_ref().map(|v| v.len()))
            .field("retries", &self.retries)
            .field("flags", &self.flags)
            .finish()
    }
}
