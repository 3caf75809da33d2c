//! Client error types

use crate::message::ProducerMessage;
use strand_protocol::ErrorCode;
use thiserror::Error;

/// Errors surfaced by the producer pipeline.
///
/// The enum is `Clone` so that a single failure (a transport error, a
/// per-partition response code) can be attached to every message of the
/// batch it terminated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The message exceeds the configured `max_message_bytes`.
    #[error("message content exceeds the configured maximum size")]
    MessageSizeTooLarge,

    /// The producer received the message after shutdown began.
    #[error("producer is shutting down and no longer accepts messages")]
    ShuttingDown,

    /// The partitioner returned an index outside the partition range.
    #[error("partitioner chose a partition outside the valid range")]
    InvalidPartition,

    /// No leader is currently available for the topic-partition.
    #[error("no partition leader is available")]
    LeaderNotAvailable,

    /// The produce response was missing a block for a requested partition.
    #[error("produce response did not cover a requested partition")]
    IncompleteResponse,

    /// The circuit breaker guarding a metadata operation is open.
    #[error("circuit breaker is open")]
    CircuitBreakerOpen,

    /// The metadata client was closed.
    #[error("metadata client is closed")]
    ClientClosed,

    /// The producer configuration failed validation.
    #[error("invalid producer configuration: {0}")]
    InvalidConfig(String),

    /// The broker answered with a per-partition error code.
    #[error("broker responded with an error: {0}")]
    Server(ErrorCode),

    /// A key or value encoder failed.
    #[error("failed to encode message content: {0}")]
    Encoding(String),

    /// The produce request could not be encoded for the wire.
    #[error("failed to encode produce request: {0}")]
    RequestEncoding(String),

    /// The connection to the broker failed.
    #[error("broker transport failure: {0}")]
    Transport(String),

    /// A metadata operation against the cluster failed.
    #[error("metadata operation failed: {0}")]
    Metadata(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A message the producer failed to deliver, paired with the cause.
#[derive(Debug)]
pub struct ProducerError {
    /// The original message, with its internal state reset.
    pub message: ProducerMessage,
    /// Why delivery failed.
    pub error: Error,
}

impl std::fmt::Display for ProducerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to produce message to topic {}: {}",
            self.message.topic, self.error
        )
    }
}

impl std::error::Error for ProducerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The batch of delivery failures collected while closing a producer.
#[derive(Debug, Default)]
pub struct ProducerErrors(pub Vec<ProducerError>);

impl std::fmt::Display for ProducerErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to deliver {} messages", self.0.len())
    }
}

impl std::error::Error for ProducerErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_error_display() {
        let err = ProducerError {
            message: ProducerMessage::new("events"),
            error: Error::MessageSizeTooLarge,
        };
        assert_eq!(
            err.to_string(),
            "failed to produce message to topic events: \
             message content exceeds the configured maximum size"
        );
    }

    #[test]
    fn test_producer_errors_display() {
        let errs = ProducerErrors(vec![
            ProducerError {
                message: ProducerMessage::new("a"),
                error: Error::ShuttingDown,
            },
            ProducerError {
                message: ProducerMessage::new("b"),
                error: Error::ShuttingDown,
            },
        ]);
        assert_eq!(errs.to_string(), "failed to deliver 2 messages");
    }

    #[test]
    fn test_server_error_carries_code() {
        let err = Error::Server(ErrorCode::RequestTimedOut);
        assert_eq!(
            err.to_string(),
            "broker responded with an error: request timed out"
        );
    }
}
