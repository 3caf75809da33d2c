//! Producer configuration

use crate::error::{Error, Result};
use crate::partitioner::{HashPartitioner, Partitioner, PartitionerFactory};
use std::sync::Arc;
use std::time::Duration;
use strand_protocol::{CompressionType, RequiredAcks};

/// Default per-message size cap (also the compressed-set cap).
const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_000_000;
/// Default upper bound for an entire produce request.
const DEFAULT_MAX_REQUEST_SIZE: usize = 100 * 1024 * 1024;
/// Default retry ceiling.
const DEFAULT_RETRY_MAX: usize = 3;
/// Default sleep between retry rounds.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Default server-side produce timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default capacity of the per-topic and per-partition input channels.
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 256;

/// Safety margin subtracted from `max_request_size` when batching, covering
/// request-level protocol overhead.
pub(crate) const REQUEST_OVERHEAD_MARGIN: usize = 10 * 1024;

/// Configuration for [`AsyncProducer`](crate::AsyncProducer).
#[derive(Clone)]
pub struct ProducerConfig {
    /// Largest size a single message (or compressed message set) may have.
    pub max_message_bytes: usize,
    /// Compression codec applied to outgoing message sets.
    pub compression: CompressionType,
    /// Flush the batch for a broker after this long, even if it is small.
    /// Zero disables the timer.
    pub flush_frequency: Duration,
    /// Flush once a broker's batch holds at least this many payload bytes.
    /// Zero disables the trigger.
    pub flush_bytes: usize,
    /// Flush once a broker's batch holds at least this many messages.
    /// Zero disables the trigger.
    pub flush_messages: usize,
    /// Hard cap on messages per batch; the batch is force-flushed before it
    /// would be exceeded. Zero disables the cap.
    pub flush_max_messages: usize,
    /// How many times to retry a retriable failure before surfacing it.
    pub retry_max: usize,
    /// Sleep between retry rounds of a partition.
    pub retry_backoff: Duration,
    /// Acknowledgement level for produce requests.
    pub required_acks: RequiredAcks,
    /// Server-side timeout carried on each produce request.
    pub timeout: Duration,
    /// Deliver acknowledged messages on the successes channel. The channel
    /// must be drained when enabled or the pipeline stalls.
    pub return_successes: bool,
    /// Deliver failed messages on the errors channel. The channel must be
    /// drained when enabled or the pipeline stalls.
    pub return_errors: bool,
    /// Constructor for per-topic partitioners.
    pub partitioner: PartitionerFactory,
    /// Capacity of the per-topic and per-partition input channels.
    pub channel_buffer_size: usize,
    /// Upper bound for an entire produce request, applied with a
    /// 10 KiB protocol-overhead margin while batching.
    pub max_request_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            compression: CompressionType::None,
            flush_frequency: Duration::ZERO,
            flush_bytes: 0,
            flush_messages: 0,
            flush_max_messages: 0,
            retry_max: DEFAULT_RETRY_MAX,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            required_acks: RequiredAcks::WaitForLocal,
            timeout: DEFAULT_TIMEOUT,
            return_successes: false,
            return_errors: true,
            partitioner: Arc::new(|_topic: &str| -> Box<dyn Partitioner> {
                Box::new(HashPartitioner)
            }),
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl ProducerConfig {
    /// Create a new builder.
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::default()
    }

    /// Check the configuration for settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_message_bytes must be greater than zero".into(),
            ));
        }
        if self.max_request_size <= REQUEST_OVERHEAD_MARGIN {
            return Err(Error::InvalidConfig(format!(
                "max_request_size must exceed the {REQUEST_OVERHEAD_MARGIN}-byte protocol margin"
            )));
        }
        if self.max_message_bytes > self.max_request_size - REQUEST_OVERHEAD_MARGIN {
            return Err(Error::InvalidConfig(
                "max_message_bytes must fit within max_request_size".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.flush_max_messages > 0 && self.flush_messages > self.flush_max_messages {
            return Err(Error::InvalidConfig(
                "flush_messages cannot exceed flush_max_messages".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("max_message_bytes", &self.max_message_bytes)
            .field("compression", &self.compression)
            .field("flush_frequency", &self.flush_frequency)
            .field("flush_bytes", &self.flush_bytes)
            .field("flush_messages", &self.flush_messages)
            .field("flush_max_messages", &self.flush_max_messages)
            .field("retry_max", &self.retry_max)
            .field("retry_backoff", &self.retry_backoff)
            .field("required_acks", &self.required_acks)
            .field("timeout", &self.timeout)
            .field("return_successes", &self.return_successes)
            .field("return_errors", &self.return_errors)
            .field("channel_buffer_size", &self.channel_buffer_size)
            .field("max_request_size", &self.max_request_size)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProducerConfig`].
#[derive(Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    /// Set the per-message (and compressed-set) size cap.
    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.config.max_message_bytes = bytes;
        self
    }

    /// Set the compression codec.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set the time-based flush trigger. Zero disables it.
    pub fn flush_frequency(mut self, frequency: Duration) -> Self {
        self.config.flush_frequency = frequency;
        self
    }

    /// Set the byte-count flush trigger. Zero disables it.
    pub fn flush_bytes(mut self, bytes: usize) -> Self {
        self.config.flush_bytes = bytes;
        self
    }

    /// Set the message-count flush trigger. Zero disables it.
    pub fn flush_messages(mut self, messages: usize) -> Self {
        self.config.flush_messages = messages;
        self
    }

    /// Set the hard cap on messages per batch. Zero disables it.
    pub fn flush_max_messages(mut self, messages: usize) -> Self {
        self.config.flush_max_messages = messages;
        self
    }

    /// Set the retry ceiling.
    pub fn retry_max(mut self, retries: usize) -> Self {
        self.config.retry_max = retries;
        self
    }

    /// Set the sleep between retry rounds.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Set the acknowledgement level.
    pub fn required_acks(mut self, acks: RequiredAcks) -> Self {
        self.config.required_acks = acks;
        self
    }

    /// Set the server-side produce timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Deliver acknowledged messages on the successes channel.
    pub fn return_successes(mut self, enabled: bool) -> Self {
        self.config.return_successes = enabled;
        self
    }

    /// Deliver failed messages on the errors channel.
    pub fn return_errors(mut self, enabled: bool) -> Self {
        self.config.return_errors = enabled;
        self
    }

    /// Set the per-topic partitioner constructor.
    pub fn partitioner(mut self, factory: PartitionerFactory) -> Self {
        self.config.partitioner = factory;
        self
    }

    /// Set the capacity of per-topic and per-partition input channels.
    pub fn channel_buffer_size(mut self, capacity: usize) -> Self {
        self.config.channel_buffer_size = capacity;
        self
    }

    /// Set the upper bound for an entire produce request.
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.config.max_request_size = bytes;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProducerConfig {
        self.config
    }
}
