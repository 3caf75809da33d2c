//! Partition selection strategies

use crate::error::Result;
use crate::message::ProducerMessage;
use std::sync::Arc;

/// Chooses the partition index for each fresh message of a topic.
///
/// The producer calls `partition` with the number of candidate partitions
/// and maps the returned index into the actual partition id list. Retried
/// messages keep their original assignment and are never re-partitioned.
pub trait Partitioner: Send {
    /// Pick an index in `0..num_partitions` for the message.
    fn partition(&mut self, message: &ProducerMessage, num_partitions: i32) -> Result<i32>;

    /// Whether the mapping from key to partition must stay stable across
    /// metadata refreshes. Consistent partitioners are fed the full
    /// partition list; the rest see only currently-writable partitions.
    fn requires_consistency(&self) -> bool {
        false
    }
}

/// Constructor for per-topic partitioner instances, stored in the producer
/// configuration.
pub type PartitionerFactory = Arc<dyn Fn(&str) -> Box<dyn Partitioner> + Send + Sync>;

/// Kafka-compatible murmur2 hash, matching the Java client's `Utils.murmur2`
/// (seed `0x9747b28c`) so that keyed messages land on the same partitions as
/// any other compliant client.
pub fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = SEED ^ (data.len() as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Partition assignment from a key: mask the sign bit, then modulo.
fn hash_partition(key: &[u8], num_partitions: i32) -> i32 {
    ((murmur2(key) & 0x7fff_ffff) % num_partitions as u32) as i32
}

/// Routes keyed messages by murmur2 hash of the key and keyless messages to
/// a random partition.
#[derive(Debug, Default)]
pub struct HashPartitioner;

impl Partitioner for HashPartitioner {
    fn partition(&mut self, message: &ProducerMessage, num_partitions: i32) -> Result<i32> {
        match &message.key {
            Some(key) => Ok(hash_partition(&key.encode()?, num_partitions)),
            None => Ok((rand::random::<u32>() % num_partitions as u32) as i32),
        }
    }

    fn requires_consistency(&self) -> bool {
        true
    }
}

/// Cycles through partitions in order, ignoring keys.
#[derive(Debug, Default)]
pub struct RoundRobinPartitioner {
    next: i32,
}

impl Partitioner for RoundRobinPartitioner {
    fn partition(&mut self, _message: &ProducerMessage, num_partitions: i32) -> Result<i32> {
        if self.next >= num_partitions {
            self.next = 0;
        }
        let choice = self.next;
        self.next += 1;
        Ok(choice)
    }
}

/// Picks a random partition for every message.
#[derive(Debug, Default)]
pub struct RandomPartitioner;

impl Partitioner for RandomPartitioner {
    fn partition(&mut self, _message: &ProducerMessage, num_partitions: i32) -> Result<i32> {
        Ok((rand::random::<u32>() % num_partitions as u32) as i32)
    }
}

/// Uses the partition the caller pre-assigned on the message.
#[derive(Debug, Default)]
pub struct ManualPartitioner;

impl Partitioner for ManualPartitioner {
    fn partition(&mut self, message: &ProducerMessage, _num_partitions: i32) -> Result<i32> {
        Ok(message.partition)
    }

    fn requires_consistency(&self) -> bool {
        true
    }
}
