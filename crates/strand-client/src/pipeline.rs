//! Per-broker pipelines: registry, aggregator, flusher, request builder
//!
//! Every broker that currently leads at least one partition gets its own
//! two-task pipeline: an aggregator that accumulates messages from all
//! partition producers targeting the broker into size/time/count-bounded
//! batches, and a flusher that turns each batch into a produce request,
//! executes it, and classifies the per-partition outcomes.
//!
//! Pipelines are shared through a refcounted registry. A partition
//! producer's route to a broker is a [`BrokerHandle`] holding a sender
//! clone; releasing the last handle closes the aggregator input, which
//! drains and tears the pipeline down.

use crate::client::Broker;
use crate::config::{ProducerConfig, REQUEST_OVERHEAD_MARGIN};
use crate::error::Error;
use crate::message::ProducerMessage;
use crate::producer::PipelineCore;
use std::collections::HashMap;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use strand_protocol::{
    CompressionType, ErrorCode, MessageSet, ProduceRequest, ProduceResponse, WireMessage,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, Sleep};
use tracing::{debug, warn};

/// Messages grouped by topic and partition, as assembled by the flusher.
pub(crate) type MessageSets = HashMap<String, HashMap<i32, Vec<ProducerMessage>>>;

// ============================================================================
// Broker-producer registry
// ============================================================================

/// A partition producer's route into one broker's aggregator.
#[derive(Clone)]
pub(crate) struct BrokerHandle {
    /// Identity of the pipeline behind the sender, distinguishing a live
    /// mapping from one that was abandoned and replaced.
    pub(crate) id: u64,
    pub(crate) input: mpsc::Sender<ProducerMessage>,
}

/// Refcounted map of broker id → current pipeline route.
pub(crate) struct BrokerRegistry {
    producers: HashMap<i32, BrokerHandle>,
    refs: HashMap<u64, usize>,
    next_id: u64,
}

impl BrokerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            producers: HashMap::new(),
            refs: HashMap::new(),
            next_id: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn route_count(&self) -> usize {
        self.producers.len()
    }

    #[cfg(test)]
    pub(crate) fn refcount(&self, handle_id: u64) -> Option<usize> {
        self.refs.get(&handle_id).copied()
    }
}

impl PipelineCore {
    /// Acquire a route to the broker's pipeline, building the pipeline on
    /// first use, and take a reference on it.
    pub(crate) fn get_broker_producer(self: &Arc<Self>, broker: &Arc<dyn Broker>) -> BrokerHandle {
        let mut registry = self.registry.lock();
        let handle = match registry.producers.get(&broker.id()) {
            Some(handle) => handle.clone(),
            None => {
                let id = registry.next_id;
                registry.next_id += 1;
                let input = spawn_broker_producer(self.clone(), broker.clone());
                let handle = BrokerHandle { id, input };
                registry.producers.insert(broker.id(), handle.clone());
                registry.refs.insert(id, 0);
                handle
            }
        };
        if let Some(count) = registry.refs.get_mut(&handle.id) {
            *count += 1;
        }
        handle
    }

    /// Release a route. When the last reference goes, the registry forgets
    /// the pipeline and the handle drop closes the aggregator input; the
    /// broker mapping is only removed if it still points at this pipeline,
    /// since an abandoned broker may already have a replacement.
    pub(crate) fn unref_broker_producer(&self, broker_id: i32, handle: BrokerHandle) {
        let mut registry = self.registry.lock();
        let last = match registry.refs.get_mut(&handle.id) {
            Some(count) => {
                *count -= 1;
                *count == 0
            }
            None => false,
        };
        if last {
            registry.refs.remove(&handle.id);
            if registry.producers.get(&broker_id).map(|h| h.id) == Some(handle.id) {
                registry.producers.remove(&broker_id);
            }
        }
    }

    /// Forget the broker's current pipeline without touching refcounts.
    /// Existing holders keep draining their batches; the next lookup builds
    /// a fresh pipeline.
    pub(crate) fn abandon_broker_connection(&self, broker_id: i32) {
        let mut registry = self.registry.lock();
        if registry.producers.remove(&broker_id).is_some() {
            warn!("abandoned broker {broker_id}; existing routes will drain");
        }
    }
}

/// Build the aggregator + flusher pair for one broker, chained by a batch
/// channel, and return the aggregator's input.
fn spawn_broker_producer(
    core: Arc<PipelineCore>,
    broker: Arc<dyn Broker>,
) -> mpsc::Sender<ProducerMessage> {
    debug!("starting broker producer for broker {}", broker.id());
    let (input_tx, input_rx) = mpsc::channel(1);
    let (batch_tx, batch_rx) = mpsc::channel(1);
    tokio::spawn(run_aggregator(core.clone(), broker.id(), input_rx, batch_tx));
    tokio::spawn(run_flusher(core, broker, batch_rx));
    input_tx
}

// ============================================================================
// Aggregator
// ============================================================================

/// Whether the batch should be offered downstream after the latest append.
fn ready_to_flush(
    config: &ProducerConfig,
    buffered: usize,
    buffered_bytes: usize,
    incoming_chaser: bool,
) -> bool {
    // With no triggers configured at all, flush as fast as possible.
    if config.flush_frequency.is_zero() && config.flush_bytes == 0 && config.flush_messages == 0 {
        return true;
    }
    // A chaser must go out promptly to keep the retry protocol moving.
    if incoming_chaser {
        return true;
    }
    if config.flush_messages > 0 && buffered >= config.flush_messages {
        return true;
    }
    if config.flush_bytes > 0 && buffered_bytes >= config.flush_bytes {
        return true;
    }
    false
}

/// Whether appending a message of `incoming_size` would blow a hard cap,
/// forcing the current batch out first.
fn would_overflow(
    config: &ProducerConfig,
    buffered: usize,
    buffered_bytes: usize,
    incoming_size: usize,
) -> bool {
    // Stay clear of the request cap, leaving margin for protocol overhead.
    if buffered_bytes + incoming_size >= config.max_request_size - REQUEST_OVERHEAD_MARGIN {
        return true;
    }
    // A compressed batch is re-wrapped as one message with its own cap.
    if config.compression != CompressionType::None
        && buffered_bytes + incoming_size >= config.max_message_bytes
    {
        return true;
    }
    if config.flush_max_messages > 0 && buffered >= config.flush_max_messages {
        return true;
    }
    false
}

/// Accumulates messages bound for one broker into batches, preserving
/// append order, and offers them to the flusher when a trigger fires.
async fn run_aggregator(
    core: Arc<PipelineCore>,
    broker_id: i32,
    mut input: mpsc::Receiver<ProducerMessage>,
    output: mpsc::Sender<Vec<ProducerMessage>>,
) {
    let config = core.config.clone();
    let mut buffer: Vec<ProducerMessage> = Vec::new();
    let mut buffer_bytes = 0usize;
    let mut deadline: Option<Pin<Box<Sleep>>> = None;
    let mut flush_pending = false;

    loop {
        let timer_armed = deadline.is_some() && !flush_pending;
        let batch_offered = flush_pending && !buffer.is_empty();

        tokio::select! {
            maybe = input.recv() => {
                let Some(msg) = maybe else { break };

                let size = msg.byte_size();
                if would_overflow(&config, buffer.len(), buffer_bytes, size) {
                    debug!("aggregator/{broker_id} batch at capacity, forcing blocking flush");
                    let batch = std::mem::take(&mut buffer);
                    buffer_bytes = 0;
                    deadline = None;
                    flush_pending = false;
                    if let Err(rejected) = output.send(batch).await {
                        let mut stranded = rejected.0;
                        stranded.push(msg);
                        core.return_errors(
                            stranded,
                            Error::Transport("broker pipeline terminated".into()),
                        )
                        .await;
                        break;
                    }
                }

                buffer_bytes += size;
                let incoming_chaser = msg.is_chaser();
                buffer.push(msg);

                if ready_to_flush(&config, buffer.len(), buffer_bytes, incoming_chaser) {
                    flush_pending = true;
                } else if !config.flush_frequency.is_zero() && deadline.is_none() {
                    deadline = Some(Box::pin(sleep(config.flush_frequency)));
                }
            }
            _ = async {
                match deadline.as_mut() {
                    Some(timer) => timer.as_mut().await,
                    None => pending().await,
                }
            }, if timer_armed => {
                flush_pending = true;
            }
            permit = output.reserve(), if batch_offered => {
                match permit {
                    Ok(permit) => {
                        let batch = std::mem::take(&mut buffer);
                        buffer_bytes = 0;
                        deadline = None;
                        flush_pending = false;
                        permit.send(batch);
                    }
                    Err(_) => break,
                }
            }
        }
    }

    // Input closed: flush whatever remains, then let the output drop close
    // the flusher.
    if !buffer.is_empty() {
        if let Err(rejected) = output.send(std::mem::take(&mut buffer)).await {
            core.return_errors(
                rejected.0,
                Error::Transport("broker pipeline terminated".into()),
            )
            .await;
        }
    }
}

// ============================================================================
// Flusher
// ============================================================================

/// Consumes batches for one broker: groups and filters them, issues the
/// produce request, and routes every message to success, retry, or error.
async fn run_flusher(
    core: Arc<PipelineCore>,
    broker: Arc<dyn Broker>,
    mut input: mpsc::Receiver<Vec<ProducerMessage>>,
) {
    let broker_id = broker.id();
    debug!("flusher/{broker_id} starting up");

    // Partitions whose retriable failure is still being rehabilitated:
    // their messages are rerouted to retry until the chaser arrives.
    let mut current_retries: HashMap<String, HashMap<i32, Error>> = HashMap::new();
    let mut closing: Option<Error> = None;

    while let Some(batch) = input.recv().await {
        if let Some(err) = &closing {
            core.retry_messages(batch, err.clone()).await;
            continue;
        }

        let msg_sets = group_and_filter(&core, &mut current_retries, broker_id, batch).await;
        let Some(request) = build_request(&core.config, &msg_sets) else {
            continue;
        };

        match broker.produce(request).await {
            Ok(Some(response)) => {
                parse_response(&core, &mut current_retries, broker_id, msg_sets, response).await;
            }
            Ok(None) => {
                // Only happens when no acknowledgement was requested, so
                // the whole batch counts as delivered.
                core.return_successes(flatten(msg_sets)).await;
            }
            Err(err @ Error::RequestEncoding(_)) => {
                core.return_errors(flatten(msg_sets), err).await;
            }
            Err(err) => {
                warn!("flusher/{broker_id} entering closing state: {err}");
                core.abandon_broker_connection(broker_id);
                if let Err(close_err) = broker.close().await {
                    warn!("flusher/{broker_id} failed to close broker: {close_err}");
                }
                closing = Some(err.clone());
                core.retry_messages(flatten(msg_sets), err).await;
            }
        }
    }

    debug!("flusher/{broker_id} shut down");
}

/// Split a batch into per-topic-partition sets, rerouting messages for
/// partitions under rehabilitation and encoding key/value content lazily.
/// Content already cached from an earlier round is not re-encoded.
async fn group_and_filter(
    core: &PipelineCore,
    current_retries: &mut HashMap<String, HashMap<i32, Error>>,
    broker_id: i32,
    batch: Vec<ProducerMessage>,
) -> MessageSets {
    let mut msg_sets: MessageSets = HashMap::new();

    for mut msg in batch {
        let pending_retry = current_retries
            .get(&msg.topic)
            .and_then(|partitions| partitions.get(&msg.partition))
            .cloned();
        if let Some(err) = pending_retry {
            let topic = msg.topic.clone();
            let partition = msg.partition;
            let chaser = msg.is_chaser();
            core.retry_message(msg, err).await;
            if chaser {
                // Rehabilitation is complete; the chaser itself is never
                // included in a produce request.
                if let Some(partitions) = current_retries.get_mut(&topic) {
                    partitions.remove(&partition);
                    if partitions.is_empty() {
                        current_retries.remove(&topic);
                    }
                }
                debug!("flusher/{broker_id} back to normal on {topic}/{partition}");
            }
            continue;
        }

        if msg.key_cache.is_none() {
            if let Some(key) = &msg.key {
                match key.encode() {
                    Ok(bytes) => msg.key_cache = Some(bytes),
                    Err(err) => {
                        core.return_error(msg, err).await;
                        continue;
                    }
                }
            }
        }
        if msg.value_cache.is_none() {
            if let Some(value) = &msg.value {
                match value.encode() {
                    Ok(bytes) => msg.value_cache = Some(bytes),
                    Err(err) => {
                        core.return_error(msg, err).await;
                        continue;
                    }
                }
            }
        }

        msg_sets
            .entry(msg.topic.clone())
            .or_default()
            .entry(msg.partition)
            .or_default()
            .push(msg);
    }

    msg_sets
}

/// Interpret a produce response block by block. Iterates the partitions of
/// the *request* so that partitions the response skipped are noticed.
async fn parse_response(
    core: &PipelineCore,
    current_retries: &mut HashMap<String, HashMap<i32, Error>>,
    broker_id: i32,
    msg_sets: MessageSets,
    response: ProduceResponse,
) {
    for (topic, partitions) in msg_sets {
        for (partition, mut msgs) in partitions {
            let Some(block) = response.get_block(&topic, partition) else {
                core.return_errors(msgs, Error::IncompleteResponse).await;
                continue;
            };

            match block.error {
                ErrorCode::None => {
                    for (i, msg) in msgs.iter_mut().enumerate() {
                        msg.offset = block.base_offset + i as i64;
                    }
                    core.return_successes(msgs).await;
                }
                code if code.is_retriable() => {
                    warn!("flusher/{broker_id} retrying {topic}/{partition}: {code}");
                    current_retries
                        .entry(topic.clone())
                        .or_default()
                        .insert(partition, Error::Server(code));
                    core.retry_messages(msgs, Error::Server(code)).await;
                }
                code => {
                    core.return_errors(msgs, Error::Server(code)).await;
                }
            }
        }
    }
}

/// Collapse grouped sets back into a flat batch, preserving per-partition
/// order.
fn flatten(msg_sets: MessageSets) -> Vec<ProducerMessage> {
    msg_sets
        .into_values()
        .flat_map(HashMap::into_values)
        .flatten()
        .collect()
}

// ============================================================================
// Request builder
// ============================================================================

/// Assemble a produce request from grouped messages using their cached
/// content. Without compression each partition contributes one plain
/// message set. With compression, messages accumulate into sets that are
/// encoded and wrapped as single compressed messages, splitting whenever
/// the wrapped set would exceed the per-message size cap.
fn build_request(config: &ProducerConfig, msg_sets: &MessageSets) -> Option<ProduceRequest> {
    let mut request = ProduceRequest::new(
        config.required_acks,
        config.timeout.as_millis() as i32,
    );
    let mut empty = true;

    for (topic, partitions) in msg_sets {
        for (&partition, msgs) in partitions {
            let mut set = MessageSet::default();
            let mut set_size = 0usize;

            for msg in msgs {
                if config.compression != CompressionType::None
                    && set_size + msg.byte_size() > config.max_message_bytes
                {
                    let encoded = set.encode();
                    request.add_message(
                        topic,
                        partition,
                        WireMessage::new(config.compression, None, Some(encoded)),
                    );
                    set = MessageSet::default();
                    set_size = 0;
                }
                set_size += msg.byte_size();
                set.add_message(WireMessage::new(
                    CompressionType::None,
                    msg.key_cache.clone(),
                    msg.value_cache.clone(),
                ));
                empty = false;
            }

            if config.compression == CompressionType::None {
                request.add_set(topic, partition, set);
            } else {
                let encoded = set.encode();
                request.add_message(
                    topic,
                    partition,
                    WireMessage::new(config.compression, None, Some(encoded)),
                );
            }
        }
    }

    if empty {
        None
    } else {
        Some(request)
    }
}
