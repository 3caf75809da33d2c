//! The asynchronous producer pipeline
//!
//! An [`AsyncProducer`] is a static pipeline of tokio tasks connected by
//! typed channels:
//!
//! ```text
//! input ──► dispatcher ──► topic producer ──► partition producer ──► per-broker
//!   ▲                        (partitioning)    (ordering/retries)     aggregator+flusher
//!   │                                                                      │
//!   └────────────────────── retry relay (unbounded) ◄─────────────────────┘
//! ```
//!
//! The dispatcher admits messages and fans out per topic; topic producers
//! assign partitions; partition producers own the per-partition ordering
//! guarantee and the retry state machine; per-broker pipelines batch and
//! flush (see [`crate::pipeline`]). Failed-but-retriable messages travel
//! back to the dispatcher through an unbounded relay, the single edge that
//! keeps the cycle deadlock-free.
//!
//! # Ordering
//!
//! For any topic-partition, the broker accepts messages in submission
//! order, across any number of retry rounds. Nothing is guaranteed across
//! partitions. Successes and errors are delivered in disposal order, which
//! is not necessarily submission order.

use crate::breaker::CircuitBreaker;
use crate::client::{Broker, MetadataClient};
use crate::config::ProducerConfig;
use crate::error::{Error, ProducerError, ProducerErrors, Result};
use crate::message::ProducerMessage;
use crate::partitioner::Partitioner;
use crate::pipeline::{BrokerHandle, BrokerRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use strand_protocol::CompressionType;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

// ============================================================================
// In-flight tracking
// ============================================================================

/// Counts messages (user messages and chasers) the pipeline is responsible
/// for. Incremented on admission, decremented exactly once on terminal
/// disposition; shutdown waits for zero.
pub(crate) struct InFlight {
    count: AtomicI64,
    zero: Notify,
}

impl InFlight {
    fn new() -> Self {
        Self {
            count: AtomicI64::new(0),
            zero: Notify::new(),
        }
    }

    pub(crate) fn add(&self, n: i64) {
        self.count.fetch_add(n, Ordering::SeqCst);
    }

    pub(crate) fn done(&self) {
        let previous = self.count.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.zero.notify_waiters();
        } else if previous <= 0 {
            // A message was disposed twice. Clamp and wake waiters so
            // shutdown surfaces the corruption instead of hanging.
            error!("in-flight counter underflow; producer accounting is corrupt");
            self.count.store(0, Ordering::SeqCst);
            self.zero.notify_waiters();
        }
    }

    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) <= 0 {
                return;
            }
            notified.await;
        }
    }

    #[cfg(test)]
    fn current(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Shared pipeline state
// ============================================================================

/// State shared by every pipeline task: configuration, the metadata client,
/// the broker-producer registry, in-flight accounting, and the terminal
/// disposition channels.
pub(crate) struct PipelineCore {
    pub(crate) config: ProducerConfig,
    pub(crate) client: Arc<dyn MetadataClient>,
    pub(crate) inflight: Arc<InFlight>,
    pub(crate) registry: Mutex<BrokerRegistry>,
    retry_tx: mpsc::UnboundedSender<ProducerMessage>,
    success_tx: mpsc::Sender<ProducerMessage>,
    error_tx: mpsc::Sender<ProducerError>,
}

impl PipelineCore {
    /// Terminally fail one message: reset it, deliver (or log) the failure,
    /// release its in-flight slot.
    pub(crate) async fn return_error(&self, mut message: ProducerMessage, error: Error) {
        message.clear();
        if self.config.return_errors {
            let failure = ProducerError { message, error };
            if self.error_tx.send(failure).await.is_err() {
                warn!("errors channel closed; dropping delivery failure");
            }
        } else {
            warn!(
                "failed to deliver message to topic {}: {}",
                message.topic, error
            );
        }
        self.inflight.done();
    }

    pub(crate) async fn return_errors(&self, batch: Vec<ProducerMessage>, error: Error) {
        for message in batch {
            self.return_error(message, error.clone()).await;
        }
    }

    /// Terminally succeed a batch: assign nothing further, deliver each
    /// message if the caller asked for successes, release in-flight slots.
    pub(crate) async fn return_successes(&self, batch: Vec<ProducerMessage>) {
        for mut message in batch {
            if self.config.return_successes {
                message.clear();
                if self.success_tx.send(message).await.is_err() {
                    warn!("successes channel closed; dropping acknowledgement");
                }
            }
            self.inflight.done();
        }
    }

    /// Send one message back around the retry loop, or fail it permanently
    /// once the retry ceiling is reached. Retrying never changes in-flight
    /// accounting: the message stays outstanding until terminally disposed.
    pub(crate) async fn retry_message(&self, mut message: ProducerMessage, error: Error) {
        if message.retries >= self.config.retry_max {
            self.return_error(message, error).await;
        } else {
            message.retries += 1;
            if let Err(rejected) = self.retry_tx.send(message) {
                // The relay only stops once in-flight reaches zero; a failed
                // send can only be surfaced as a delivery failure.
                self.return_error(rejected.0, error).await;
            }
        }
    }

    pub(crate) async fn retry_messages(&self, batch: Vec<ProducerMessage>, error: Error) {
        for message in batch {
            self.retry_message(message, error.clone()).await;
        }
    }
}

// ============================================================================
// Producer handle
// ============================================================================

struct Shutdown {
    triggered: AtomicBool,
    input: mpsc::Sender<ProducerMessage>,
    inflight: Arc<InFlight>,
    closed_tx: watch::Sender<bool>,
    client: Arc<dyn MetadataClient>,
    own_client: bool,
}

/// Handle to a running producer pipeline.
///
/// Messages are written to the channel returned by [`input`](Self::input)
/// (or via the [`send`](Self::send) convenience). Acknowledged and failed
/// messages come back on the channels taken with
/// [`successes`](Self::successes) and [`errors`](Self::errors); when the
/// corresponding `return_*` config flag is enabled those channels **must**
/// be drained or the pipeline stalls.
///
/// A producer must be shut down with [`close`](Self::close) or
/// [`async_close`](Self::async_close); dropping the handle without closing
/// leaks the pipeline tasks.
pub struct AsyncProducer {
    input: mpsc::Sender<ProducerMessage>,
    successes: Option<mpsc::Receiver<ProducerMessage>>,
    errors: Option<mpsc::Receiver<ProducerError>>,
    shutdown: Arc<Shutdown>,
}

impl AsyncProducer {
    /// Start a producer on top of a caller-owned metadata client. The
    /// client is *not* closed when the producer shuts down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_client(client: Arc<dyn MetadataClient>, config: ProducerConfig) -> Result<Self> {
        Self::start(client, config, false)
    }

    /// Start a producer that owns its metadata client and closes it after
    /// the last in-flight message drains during shutdown.
    pub fn with_owned_client(
        client: Arc<dyn MetadataClient>,
        config: ProducerConfig,
    ) -> Result<Self> {
        Self::start(client, config, true)
    }

    fn start(
        client: Arc<dyn MetadataClient>,
        config: ProducerConfig,
        own_client: bool,
    ) -> Result<Self> {
        config.validate()?;
        if client.closed() {
            return Err(Error::ClientClosed);
        }

        let capacity = config.channel_buffer_size.max(1);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (success_tx, success_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let inflight = Arc::new(InFlight::new());

        let core = Arc::new(PipelineCore {
            config,
            client: client.clone(),
            inflight: inflight.clone(),
            registry: Mutex::new(BrokerRegistry::new()),
            retry_tx,
            success_tx,
            error_tx,
        });

        tokio::spawn(dispatch(core, input_rx, closed_rx.clone()));
        tokio::spawn(relay_retries(retry_rx, input_tx.clone(), closed_rx));

        Ok(Self {
            input: input_tx.clone(),
            successes: Some(success_rx),
            errors: Some(error_rx),
            shutdown: Arc::new(Shutdown {
                triggered: AtomicBool::new(false),
                input: input_tx,
                inflight,
                closed_tx,
                client,
                own_client,
            }),
        })
    }

    /// The input channel. Clones of the sender may be handed to any number
    /// of tasks.
    pub fn input(&self) -> &mpsc::Sender<ProducerMessage> {
        &self.input
    }

    /// Submit one message. Fails with [`Error::ShuttingDown`] once the
    /// pipeline no longer accepts input.
    pub async fn send(&self, message: ProducerMessage) -> Result<()> {
        self.input
            .send(message)
            .await
            .map_err(|_| Error::ShuttingDown)
    }

    /// Take the successes channel. Only populated when
    /// `return_successes` is enabled; delivers each acknowledged message
    /// with its partition and offset assigned. Returns `None` if already
    /// taken.
    pub fn successes(&mut self) -> Option<mpsc::Receiver<ProducerMessage>> {
        self.successes.take()
    }

    /// Take the errors channel. Only populated when `return_errors` is
    /// enabled. Returns `None` if already taken.
    pub fn errors(&mut self) -> Option<mpsc::Receiver<ProducerError>> {
        self.errors.take()
    }

    /// Begin shutdown without waiting. The caller must keep draining the
    /// successes and errors channels until both close.
    pub fn async_close(&self) {
        if self.shutdown.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        let shutdown = self.shutdown.clone();
        tokio::spawn(run_shutdown(shutdown));
    }

    /// Shut down and wait for every in-flight message to be terminally
    /// disposed. Drains the successes channel internally and returns any
    /// collected delivery failures as one batch error.
    pub async fn close(mut self) -> std::result::Result<(), ProducerErrors> {
        self.async_close();

        if let Some(mut successes) = self.successes.take() {
            tokio::spawn(async move { while successes.recv().await.is_some() {} });
        }

        let mut failures = Vec::new();
        if let Some(mut errors) = self.errors.take() {
            while let Some(failure) = errors.recv().await {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProducerErrors(failures))
        }
    }
}

/// Injects the shutdown sentinel (counting it in-flight first, paired with
/// the dispatcher's decrement), waits for the pipeline to drain, optionally
/// closes an owned metadata client, then signals pipeline teardown.
async fn run_shutdown(shutdown: Arc<Shutdown>) {
    info!("producer shutting down");
    shutdown.inflight.add(1);
    if shutdown
        .input
        .send(ProducerMessage::shutdown_sentinel())
        .await
        .is_err()
    {
        // The dispatcher is already gone; release the sentinel's slot.
        shutdown.inflight.done();
    }

    shutdown.inflight.wait().await;

    if shutdown.own_client {
        if let Err(err) = shutdown.client.close().await {
            warn!("failed to close metadata client during shutdown: {err}");
        }
    }

    let _ = shutdown.closed_tx.send(true);
    info!("producer shut down");
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Per-message admission control and fan-out by topic.
async fn dispatch(
    core: Arc<PipelineCore>,
    mut input: mpsc::Receiver<ProducerMessage>,
    mut closed: watch::Receiver<bool>,
) {
    let mut handlers: HashMap<String, mpsc::Sender<ProducerMessage>> = HashMap::new();
    let mut shutting_down = false;

    loop {
        let msg = tokio::select! {
            _ = closed.changed() => break,
            maybe = input.recv() => match maybe {
                Some(msg) => msg,
                None => break,
            },
        };

        if msg.flags.shutdown {
            shutting_down = true;
            // Balances the increment made when the sentinel was injected.
            core.inflight.done();
            continue;
        }

        if msg.retries == 0 {
            if shutting_down {
                // Never admitted, so no in-flight accounting applies.
                let mut msg = msg;
                msg.clear();
                let rejection = ProducerError {
                    message: msg,
                    error: Error::ShuttingDown,
                };
                if core.config.return_errors {
                    if core.error_tx.send(rejection).await.is_err() {
                        warn!("errors channel closed; dropping shutdown rejection");
                    }
                } else {
                    warn!("{rejection}");
                }
                continue;
            }
            core.inflight.add(1);
        }

        let value_len = msg.value.as_ref().map_or(0, |v| v.len());
        if (core.config.compression == CompressionType::None
            && value_len > core.config.max_message_bytes)
            || msg.byte_size() > core.config.max_message_bytes
        {
            core.return_error(msg, Error::MessageSizeTooLarge).await;
            continue;
        }

        let handler = match handlers.get(&msg.topic) {
            Some(handler) => handler.clone(),
            None => {
                let handler = spawn_topic_producer(core.clone(), msg.topic.clone());
                handlers.insert(msg.topic.clone(), handler.clone());
                handler
            }
        };
        if let Err(rejected) = handler.send(msg).await {
            core.return_error(
                rejected.0,
                Error::Transport("topic pipeline terminated".into()),
            )
            .await;
        }
    }

    // Dropping the topic senders cascades shutdown down the pipeline.
    drop(handlers);
}

// ============================================================================
// Topic producer
// ============================================================================

/// Assigns partitions to fresh messages and fans out per partition.
struct TopicProducer {
    core: Arc<PipelineCore>,
    topic: String,
    breaker: CircuitBreaker,
    partitioner: Box<dyn Partitioner>,
    handlers: HashMap<i32, mpsc::Sender<ProducerMessage>>,
}

fn spawn_topic_producer(core: Arc<PipelineCore>, topic: String) -> mpsc::Sender<ProducerMessage> {
    let (tx, rx) = mpsc::channel(core.config.channel_buffer_size.max(1));
    let producer = TopicProducer {
        partitioner: (core.config.partitioner)(&topic),
        breaker: CircuitBreaker::default(),
        handlers: HashMap::new(),
        core,
        topic,
    };
    tokio::spawn(producer.run(rx));
    tx
}

impl TopicProducer {
    async fn run(mut self, mut input: mpsc::Receiver<ProducerMessage>) {
        while let Some(mut msg) = input.recv().await {
            // Retried messages already carry their assignment and must not
            // be re-partitioned.
            if msg.retries == 0 {
                if let Err(err) = self.assign_partition(&mut msg).await {
                    self.core.return_error(msg, err).await;
                    continue;
                }
            }

            let handler = match self.handlers.get(&msg.partition) {
                Some(handler) => handler.clone(),
                None => {
                    let handler = spawn_partition_producer(
                        self.core.clone(),
                        self.topic.clone(),
                        msg.partition,
                    );
                    self.handlers.insert(msg.partition, handler.clone());
                    handler
                }
            };
            if let Err(rejected) = handler.send(msg).await {
                self.core
                    .return_error(
                        rejected.0,
                        Error::Transport("partition pipeline terminated".into()),
                    )
                    .await;
            }
        }
    }

    async fn assign_partition(&mut self, msg: &mut ProducerMessage) -> Result<()> {
        if !self.breaker.allow() {
            return Err(Error::CircuitBreakerOpen);
        }
        let fetched = if self.partitioner.requires_consistency() {
            self.core.client.partitions(&self.topic).await
        } else {
            self.core.client.writable_partitions(&self.topic).await
        };
        let partitions = match fetched {
            Ok(partitions) => {
                self.breaker.record_success();
                partitions
            }
            Err(err) => {
                self.breaker.record_failure();
                return Err(err);
            }
        };

        if partitions.is_empty() {
            return Err(Error::LeaderNotAvailable);
        }

        let num_partitions = partitions.len() as i32;
        let choice = self.partitioner.partition(msg, num_partitions)?;
        if choice < 0 || choice >= num_partitions {
            return Err(Error::InvalidPartition);
        }
        msg.partition = partitions[choice as usize];
        Ok(())
    }
}

// ============================================================================
// Partition producer
// ============================================================================

#[derive(Default)]
struct RetryLevel {
    buf: Vec<ProducerMessage>,
    expect_chaser: bool,
}

/// Routes one topic-partition's messages to the current leader and owns the
/// ordering invariant across retries.
///
/// `high_watermark` is the retry level currently allowed to flow. Zero
/// means normal operation. While level `h > 0` is in flight, messages of
/// lower levels are buffered in `retry_state` so later-submitted messages
/// can never overtake them; the chaser emitted at each level change proves,
/// when it returns, that everything in between has drained downstream.
struct PartitionProducer {
    core: Arc<PipelineCore>,
    topic: String,
    partition: i32,
    leader: Option<Arc<dyn Broker>>,
    output: Option<BrokerHandle>,
    breaker: CircuitBreaker,
    high_watermark: usize,
    retry_state: Vec<RetryLevel>,
}

fn spawn_partition_producer(
    core: Arc<PipelineCore>,
    topic: String,
    partition: i32,
) -> mpsc::Sender<ProducerMessage> {
    let (tx, rx) = mpsc::channel(core.config.channel_buffer_size.max(1));
    let retry_state = (0..=core.config.retry_max).map(|_| RetryLevel::default()).collect();
    let producer = PartitionProducer {
        core,
        topic,
        partition,
        leader: None,
        output: None,
        breaker: CircuitBreaker::default(),
        high_watermark: 0,
        retry_state,
    };
    tokio::spawn(producer.run(rx));
    tx
}

impl PartitionProducer {
    async fn run(mut self, mut input: mpsc::Receiver<ProducerMessage>) {
        // Prefetch the leader. Failure is non-fatal; the first message will
        // trigger a proper update_leader.
        if let Ok(broker) = self.core.client.leader(&self.topic, self.partition).await {
            self.output = Some(self.core.get_broker_producer(&broker));
            self.leader = Some(broker);
        }

        while let Some(msg) = input.recv().await {
            if msg.retries > self.high_watermark {
                // A new, higher retry level; handle it, then back off.
                self.raise_watermark(msg.retries).await;
                sleep(self.core.config.retry_backoff).await;
            } else if self.high_watermark > 0 {
                // Retrying some level, and this message is not a new one.
                if msg.retries < self.high_watermark {
                    // An earlier level: buffer it so later-ordered messages
                    // cannot overtake it (unless it is just a chaser).
                    if msg.is_chaser() {
                        self.retry_state[msg.retries].expect_chaser = false;
                        self.core.inflight.done();
                    } else {
                        self.retry_state[msg.retries].buf.push(msg);
                    }
                    continue;
                } else if msg.is_chaser() {
                    // The current level has fully drained downstream; the
                    // next lower buffer is now safe to flush.
                    self.retry_state[self.high_watermark].expect_chaser = false;
                    self.flush_retry_buffers().await;
                    self.core.inflight.done();
                    continue;
                }
            }

            // The message carries real data at the current level and can go
            // downstream without breaking the ordering guarantee.
            if self.output.is_none() {
                if let Err(err) = self.update_leader().await {
                    self.core.return_error(msg, err).await;
                    sleep(self.core.config.retry_backoff).await;
                    continue;
                }
            }
            self.forward(msg).await;
        }

        if let (Some(leader), Some(output)) = (self.leader.take(), self.output.take()) {
            self.core.unref_broker_producer(leader.id(), output);
        }
    }

    async fn forward(&mut self, msg: ProducerMessage) {
        if let Some(output) = &self.output {
            if let Err(rejected) = output.input.send(msg).await {
                self.core
                    .return_error(
                        rejected.0,
                        Error::Transport("broker pipeline terminated".into()),
                    )
                    .await;
            }
        }
    }

    /// Enter retry level `level`: emit a chaser down the current route so we
    /// learn when everything in between has drained back to us, then drop
    /// the now-stale broker selection.
    async fn raise_watermark(&mut self, level: usize) {
        warn!(
            "partition {}/{} entering retry level {}",
            self.topic, self.partition, level
        );
        self.high_watermark = level;

        if self.output.is_none() {
            // A retried message implies a previous downstream send, so a
            // route should exist; recover by selecting a leader now.
            if let Err(err) = self.update_leader().await {
                error!(
                    "partition {}/{} has no route for the retry chaser: {err}",
                    self.topic, self.partition
                );
                return;
            }
        }

        self.retry_state[level].expect_chaser = true;
        self.core.inflight.add(1);
        let chaser = ProducerMessage::chaser(self.topic.clone(), self.partition, level - 1);
        if let Some(output) = &self.output {
            if output.input.send(chaser).await.is_err() {
                self.retry_state[level].expect_chaser = false;
                self.core.inflight.done();
            }
        }

        if let (Some(leader), Some(output)) = (self.leader.take(), self.output.take()) {
            debug!(
                "partition {}/{} abandoning broker {}",
                self.topic,
                self.partition,
                leader.id()
            );
            self.core.unref_broker_producer(leader.id(), output);
        }
    }

    /// Walk back down the retry levels, flushing each buffer, until a level
    /// still awaiting its chaser (or normal operation) is reached.
    async fn flush_retry_buffers(&mut self) {
        debug!(
            "partition {}/{} flushing retry level {}",
            self.topic, self.partition, self.high_watermark
        );
        loop {
            self.high_watermark -= 1;
            let level = self.high_watermark;

            let mut abandoned = false;
            if self.output.is_none() {
                if let Err(err) = self.update_leader().await {
                    // Only the current level's buffer is failed; lower
                    // levels stay buffered for the next attempt.
                    let buffered = std::mem::take(&mut self.retry_state[level].buf);
                    self.core.return_errors(buffered, err).await;
                    abandoned = true;
                }
            }
            if !abandoned {
                let buffered = std::mem::take(&mut self.retry_state[level].buf);
                for msg in buffered {
                    self.forward(msg).await;
                }
            }

            if self.retry_state[level].expect_chaser {
                debug!(
                    "partition {}/{} still retrying level {}",
                    self.topic, self.partition, level
                );
                break;
            } else if level == 0 {
                debug!(
                    "partition {}/{} back to normal operation",
                    self.topic, self.partition
                );
                break;
            }
        }
    }

    /// Refresh metadata, look up the leader, and acquire its aggregator
    /// route, all guarded by the circuit breaker.
    async fn update_leader(&mut self) -> Result<()> {
        if !self.breaker.allow() {
            return Err(Error::CircuitBreakerOpen);
        }
        match self.select_leader().await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }

    async fn select_leader(&mut self) -> Result<()> {
        self.core.client.refresh_metadata(&self.topic).await?;
        let broker = self.core.client.leader(&self.topic, self.partition).await?;
        info!(
            "partition {}/{} selected broker {}",
            self.topic,
            self.partition,
            broker.id()
        );
        self.output = Some(self.core.get_broker_producer(&broker));
        self.leader = Some(broker);
        Ok(())
    }
}

// ============================================================================
// Retry relay
// ============================================================================

/// Bridges the retry output back to the dispatcher input. The unbounded
/// channel is the one infinite buffer in the pipeline: flushers can always
/// push retries without blocking, which breaks the cycle
/// flusher → retry → dispatcher → … → flusher that would otherwise
/// deadlock on any bounded path.
async fn relay_retries(
    mut retries: mpsc::UnboundedReceiver<ProducerMessage>,
    input: mpsc::Sender<ProducerMessage>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = closed.changed() => break,
            maybe = retries.recv() => match maybe {
                Some(msg) => {
                    if input.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Receivers that must stay alive while a test drives a bare core.
    #[allow(dead_code)]
    pub(crate) struct TestChannels {
        pub(crate) successes: mpsc::Receiver<ProducerMessage>,
        pub(crate) errors: mpsc::Receiver<ProducerError>,
        pub(crate) retries: mpsc::UnboundedReceiver<ProducerMessage>,
    }

    /// Build a [`PipelineCore`] without starting the dispatcher tasks, for
    /// unit tests that exercise core methods directly.
    pub(crate) fn new_test_core(
        client: Arc<dyn MetadataClient>,
        config: ProducerConfig,
    ) -> (Arc<PipelineCore>, TestChannels) {
        let (success_tx, successes) = mpsc::channel(64);
        let (error_tx, errors) = mpsc::channel(64);
        let (retry_tx, retries) = mpsc::unbounded_channel();
        let core = Arc::new(PipelineCore {
            config,
            client,
            inflight: Arc::new(InFlight::new()),
            registry: Mutex::new(BrokerRegistry::new()),
            retry_tx,
            success_tx,
            error_tx,
        });
        (
            core,
            TestChannels {
                successes,
                errors,
                retries,
            },
        )
    }
}
