//! Per-partition error codes returned by brokers

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric error code attached to each partition of a produce response.
///
/// The codes mirror the broker's wire protocol. [`ErrorCode::is_retriable`]
/// classifies the subset a producer may recover from by refreshing metadata
/// and re-sending; everything else is terminal for the affected messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[repr(i16)]
pub enum ErrorCode {
    /// The server experienced an unexpected error
    #[error("unexpected server error")]
    Unknown = -1,

    /// No error
    #[error("no error")]
    None = 0,

    /// The requested offset is outside the range of the partition log
    #[error("offset out of range")]
    OffsetOutOfRange = 1,

    /// Message contents do not match their CRC
    #[error("corrupt message")]
    CorruptMessage = 2,

    /// The topic or partition does not exist on this broker
    #[error("unknown topic or partition")]
    UnknownTopicOrPartition = 3,

    /// The message has an invalid size
    #[error("invalid message size")]
    InvalidMessageSize = 4,

    /// The partition is undergoing leader election and has no leader
    #[error("leader not available")]
    LeaderNotAvailable = 5,

    /// The request was sent to a broker that is not the partition leader
    #[error("not leader for partition")]
    NotLeaderForPartition = 6,

    /// The request exceeded the server-side time limit
    #[error("request timed out")]
    RequestTimedOut = 7,

    /// The broker is not available
    #[error("broker not available")]
    BrokerNotAvailable = 8,

    /// The requested replica is not available
    #[error("replica not available")]
    ReplicaNotAvailable = 9,

    /// The message exceeds the server's maximum message size
    #[error("message size too large")]
    MessageSizeTooLarge = 10,

    /// The controller epoch in the request is stale
    #[error("stale controller epoch")]
    StaleControllerEpoch = 11,

    /// The committed offset metadata is too large
    #[error("offset metadata too large")]
    OffsetMetadataTooLarge = 12,

    /// The server disconnected before a response was received
    #[error("network exception")]
    NetworkException = 13,

    /// The coordinator is still loading offsets
    #[error("offsets load in progress")]
    OffsetsLoadInProgress = 14,

    /// The group coordinator is not available
    #[error("coordinator not available")]
    CoordinatorNotAvailable = 15,

    /// This broker is not the coordinator for the given group
    #[error("not coordinator")]
    NotCoordinator = 16,

    /// The topic name is illegal
    #[error("invalid topic")]
    InvalidTopic = 17,

    /// The message set exceeds the server's maximum request size
    #[error("message set size too large")]
    MessageSetSizeTooLarge = 18,

    /// Fewer in-sync replicas than `min.insync.replicas` exist
    #[error("not enough replicas")]
    NotEnoughReplicas = 19,

    /// The write was appended locally but fewer in-sync replicas than
    /// required acknowledged it
    #[error("not enough replicas after append")]
    NotEnoughReplicasAfterAppend = 20,
}

impl ErrorCode {
    /// Decode a wire code, mapping anything unrecognized to [`Self::Unknown`].
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => Self::None,
            1 => Self::OffsetOutOfRange,
            2 => Self::CorruptMessage,
            3 => Self::UnknownTopicOrPartition,
            4 => Self::InvalidMessageSize,
            5 => Self::LeaderNotAvailable,
            6 => Self::NotLeaderForPartition,
            7 => Self::RequestTimedOut,
            8 => Self::BrokerNotAvailable,
            9 => Self::ReplicaNotAvailable,
            10 => Self::MessageSizeTooLarge,
            11 => Self::StaleControllerEpoch,
            12 => Self::OffsetMetadataTooLarge,
            13 => Self::NetworkException,
            14 => Self::OffsetsLoadInProgress,
            15 => Self::CoordinatorNotAvailable,
            16 => Self::NotCoordinator,
            17 => Self::InvalidTopic,
            18 => Self::MessageSetSizeTooLarge,
            19 => Self::NotEnoughReplicas,
            20 => Self::NotEnoughReplicasAfterAppend,
            _ => Self::Unknown,
        }
    }

    /// The wire representation of this code.
    pub fn code(self) -> i16 {
        self as i16
    }

    /// Whether a producer may recover from this error by refreshing metadata
    /// and re-sending the affected messages.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::UnknownTopicOrPartition
                | Self::NotLeaderForPartition
                | Self::LeaderNotAvailable
                | Self::RequestTimedOut
                | Self::NotEnoughReplicas
                | Self::NotEnoughReplicasAfterAppend
        )
    }
}
