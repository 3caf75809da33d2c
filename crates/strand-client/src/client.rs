//! Collaborator contracts: cluster metadata directory and broker endpoint
//!
//! The producer core never talks to the network itself. It consumes two
//! trait objects: a [`MetadataClient`] that answers topic/partition/leader
//! questions and can refresh itself, and per-broker [`Broker`] endpoints
//! that execute produce requests. Tests inject scripted implementations.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use strand_protocol::{ProduceRequest, ProduceResponse};

/// A fallible, refreshable directory of cluster metadata.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// All partition ids of the topic, including currently unwritable ones.
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>>;

    /// Partition ids of the topic that currently accept writes.
    async fn writable_partitions(&self, topic: &str) -> Result<Vec<i32>>;

    /// The broker currently leading the topic-partition.
    async fn leader(&self, topic: &str, partition: i32) -> Result<Arc<dyn Broker>>;

    /// Re-fetch metadata for the topic from the cluster.
    async fn refresh_metadata(&self, topic: &str) -> Result<()>;

    /// Whether the client has been closed.
    fn closed(&self) -> bool;

    /// Close the client and release its resources.
    async fn close(&self) -> Result<()>;
}

/// A synchronous request/response endpoint for one broker.
///
/// `produce` distinguishes request-encoding failures
/// ([`Error::RequestEncoding`](crate::Error::RequestEncoding)) from
/// transport failures ([`Error::Transport`](crate::Error::Transport)); the
/// flusher classifies the two differently. A `None` response is the normal
/// outcome when the request carried
/// [`RequiredAcks::NoResponse`](strand_protocol::RequiredAcks::NoResponse).
#[async_trait]
pub trait Broker: Send + Sync {
    /// The broker's node id.
    fn id(&self) -> i32;

    /// Execute a produce request.
    async fn produce(&self, request: ProduceRequest) -> Result<Option<ProduceResponse>>;

    /// Close the underlying connection.
    async fn close(&self) -> Result<()>;
}
