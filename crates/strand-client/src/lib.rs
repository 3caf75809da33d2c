//! # strand-client
//!
//! Asynchronous producer client for the strand commit-log messaging
//! system.
//!
//! The producer accepts a stream of messages on an input channel, routes
//! each to the leader of its topic-partition, batches messages per broker,
//! issues produce requests, and retries retriable failures while
//! preserving per-partition ordering.
//!
//! ## Features
//!
//! - **Channel-based API**: submit on the input channel, read results from
//!   the successes and errors channels
//! - **Per-partition ordering**: submission order is preserved at the
//!   broker across any number of retry rounds
//! - **Per-broker batching**: size, byte-count, and time flush triggers
//! - **Automatic retries**: bounded retries with backoff for retriable
//!   broker errors, with leader re-discovery
//! - **Circuit breakers**: metadata and leader lookups are fault-gated
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strand_client::{AsyncProducer, ProducerConfig, ProducerMessage, StringEncoder};
//!
//! # async fn example(client: Arc<dyn strand_client::MetadataClient>) {
//! let config = ProducerConfig::builder()
//!     .flush_messages(100)
//!     .return_successes(true)
//!     .build();
//!
//! let mut producer = AsyncProducer::from_client(client, config).unwrap();
//! let mut successes = producer.successes().unwrap();
//!
//! producer
//!     .send(ProducerMessage::new("events").with_value(StringEncoder("hello".into())))
//!     .await
//!     .unwrap();
//!
//! let delivered = successes.recv().await.unwrap();
//! println!("stored at {}/{}", delivered.partition, delivered.offset);
//!
//! producer.close().await.unwrap();
//! # }
//! ```
//!
//! ## Shutdown
//!
//! A producer must be shut down explicitly: [`AsyncProducer::close`] waits
//! for every in-flight message to reach a terminal state and returns
//! collected delivery failures as a batch; [`AsyncProducer::async_close`]
//! triggers the same shutdown without waiting, after which the caller must
//! keep draining the successes and errors channels until both close.

pub mod breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod partitioner;
mod pipeline;
mod producer;

pub use breaker::CircuitBreaker;
pub use client::{Broker, MetadataClient};
pub use config::{ProducerConfig, ProducerConfigBuilder};
pub use error::{Error, ProducerError, ProducerErrors, Result};
pub use message::{BytesEncoder, Encoder, ProducerMessage, StringEncoder};
pub use partitioner::{
    HashPartitioner, ManualPartitioner, Partitioner, PartitionerFactory, RandomPartitioner,
    RoundRobinPartitioner,
};
pub use producer::AsyncProducer;

// Re-export the wire-level types callers see through the configuration and
// collaborator contracts.
pub use strand_protocol::{
    CompressionType, ErrorCode, ProduceRequest, ProduceResponse, ProduceResponseBlock,
    RequiredAcks, MESSAGE_OVERHEAD,
};
