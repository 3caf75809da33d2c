//! End-to-end producer pipeline tests against scripted cluster and broker
//! mocks: delivery, ordering across retries, size rejection, retry
//! exhaustion, shutdown draining, and broker abandonment.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strand_client::{
    AsyncProducer, Broker, Encoder, Error, ErrorCode, MetadataClient, ProduceRequest,
    ProduceResponse, ProduceResponseBlock, ProducerConfig, ProducerMessage, Result,
    RoundRobinPartitioner, StringEncoder, MESSAGE_OVERHEAD,
};

// ============================================================================
// Mocks
// ============================================================================

/// Scripted outcome for one produce call.
enum Outcome {
    /// Answer every partition in the request with this code; successful
    /// partitions get consecutive offsets from per-partition counters.
    Respond(ErrorCode),
    /// Fail the call with a transport error.
    Transport,
}

struct MockBroker {
    id: i32,
    script: Mutex<VecDeque<Outcome>>,
    default_code: ErrorCode,
    requests: Mutex<Vec<ProduceRequest>>,
    offsets: Mutex<HashMap<(String, i32), i64>>,
    base_offset: i64,
    closed: AtomicBool,
}

impl MockBroker {
    fn new(id: i32) -> Arc<Self> {
        Self::build(id, ErrorCode::None, 0)
    }

    fn with_base_offset(id: i32, base_offset: i64) -> Arc<Self> {
        Self::build(id, ErrorCode::None, base_offset)
    }

    fn failing(id: i32, code: ErrorCode) -> Arc<Self> {
        Self::build(id, code, 0)
    }

    fn build(id: i32, default_code: ErrorCode, base_offset: i64) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(VecDeque::new()),
            default_code,
            requests: Mutex::new(Vec::new()),
            offsets: Mutex::new(HashMap::new()),
            base_offset,
            closed: AtomicBool::new(false),
        })
    }

    fn enqueue(&self, outcomes: Vec<Outcome>) {
        self.script.lock().extend(outcomes);
    }

    fn produce_calls(&self) -> usize {
        self.requests.lock().len()
    }

    fn total_messages(&self) -> usize {
        self.requests.lock().iter().map(|r| r.message_count()).sum()
    }

    fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MockBroker {
    fn id(&self) -> i32 {
        self.id
    }

    async fn produce(&self, request: ProduceRequest) -> Result<Option<ProduceResponse>> {
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(Outcome::Respond(self.default_code));
        self.requests.lock().push(request.clone());

        match outcome {
            Outcome::Transport => Err(Error::Transport("connection reset".into())),
            Outcome::Respond(code) => {
                let mut response = ProduceResponse::default();
                let mut offsets = self.offsets.lock();
                for (topic, partitions) in &request.sets {
                    for (&partition, set) in partitions {
                        let base_offset = if code == ErrorCode::None {
                            let counter = offsets
                                .entry((topic.clone(), partition))
                                .or_insert(self.base_offset);
                            let base = *counter;
                            *counter += set.len() as i64;
                            base
                        } else {
                            -1
                        };
                        response.add_block(
                            topic,
                            partition,
                            ProduceResponseBlock {
                                error: code,
                                base_offset,
                            },
                        );
                    }
                }
                Ok(Some(response))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Metadata directory serving a fixed partition list and a scripted leader
/// succession: each refresh advances to the next leader, sticking at the
/// last one.
struct MockCluster {
    partitions: Vec<i32>,
    leaders: Vec<Arc<MockBroker>>,
    current: AtomicUsize,
    refreshes: AtomicUsize,
    closed: AtomicBool,
}

impl MockCluster {
    fn new(partitions: Vec<i32>, leaders: Vec<Arc<MockBroker>>) -> Arc<Self> {
        Arc::new(Self {
            partitions,
            leaders,
            current: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataClient for MockCluster {
    async fn partitions(&self, _topic: &str) -> Result<Vec<i32>> {
        Ok(self.partitions.clone())
    }

    async fn writable_partitions(&self, _topic: &str) -> Result<Vec<i32>> {
        Ok(self.partitions.clone())
    }

    async fn leader(&self, _topic: &str, _partition: i32) -> Result<Arc<dyn Broker>> {
        let index = self
            .current
            .load(Ordering::SeqCst)
            .min(self.leaders.len() - 1);
        Ok(self.leaders[index].clone())
    }

    async fn refresh_metadata(&self, _topic: &str) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let current = self.current.load(Ordering::SeqCst);
        if current + 1 < self.leaders.len() {
            self.current.store(current + 1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingEncoder;

impl Encoder for FailingEncoder {
    fn encode(&self) -> Result<Bytes> {
        Err(Error::Encoding("intentional failure".into()))
    }

    fn len(&self) -> usize {
        4
    }
}

fn test_config() -> ProducerConfig {
    ProducerConfig::builder()
        .retry_backoff(Duration::from_millis(1))
        .return_successes(true)
        .return_errors(true)
        .build()
}

fn tagged(topic: &str, index: u32) -> ProducerMessage {
    ProducerMessage::new(topic)
        .with_value(StringEncoder(format!("payload-{index}")))
        .with_metadata(index)
}

fn tag_of(msg: &ProducerMessage) -> u32 {
    *msg.metadata
        .as_ref()
        .expect("metadata present")
        .downcast_ref::<u32>()
        .expect("metadata is the submission tag")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_happy_path_delivers_in_order_with_offsets() {
    let broker = MockBroker::with_base_offset(1, 100);
    let cluster = MockCluster::new(vec![0], vec![broker.clone()]);
    let mut producer =
        AsyncProducer::from_client(cluster.clone(), test_config()).expect("producer starts");
    let mut successes = producer.successes().expect("successes channel");

    for i in 0..3 {
        producer.send(tagged("events", i)).await.expect("send");
    }

    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.push(successes.recv().await.expect("success"));
    }

    for (i, msg) in delivered.iter().enumerate() {
        assert_eq!(tag_of(msg), i as u32, "successes arrive in submission order");
        assert_eq!(msg.offset, 100 + i as i64);
        assert_eq!(msg.partition, 0);
    }

    producer.close().await.expect("clean close");
    assert_eq!(broker.total_messages(), 3);
    assert!(
        !cluster.closed(),
        "a caller-owned client must survive producer shutdown"
    );
}

#[tokio::test]
async fn test_leader_change_retry_preserves_order() {
    let old_leader = MockBroker::failing(1, ErrorCode::NotLeaderForPartition);
    let new_leader = MockBroker::with_base_offset(2, 500);
    let cluster = MockCluster::new(vec![0], vec![old_leader.clone(), new_leader.clone()]);
    let mut producer =
        AsyncProducer::from_client(cluster.clone(), test_config()).expect("producer starts");
    let mut successes = producer.successes().expect("successes channel");

    for i in 0..3 {
        producer.send(tagged("events", i)).await.expect("send");
    }

    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.push(successes.recv().await.expect("success"));
    }

    for (i, msg) in delivered.iter().enumerate() {
        assert_eq!(
            tag_of(msg),
            i as u32,
            "retried messages reach the new leader in submission order"
        );
        assert_eq!(msg.offset, 500 + i as i64);
    }

    assert!(old_leader.produce_calls() >= 1);
    assert_eq!(
        new_leader.total_messages(),
        3,
        "every message is re-sent to the new leader exactly once"
    );
    assert!(cluster.refresh_count() >= 1);

    producer.close().await.expect("clean close");
}

#[tokio::test]
async fn test_oversized_message_rejected_without_broker_call() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![0], vec![broker.clone()]);
    let config = ProducerConfig::builder()
        .max_message_bytes(100)
        .retry_backoff(Duration::from_millis(1))
        .build();
    let mut producer = AsyncProducer::from_client(cluster, config).expect("producer starts");
    let mut errors = producer.errors().expect("errors channel");

    let oversized = "x".repeat(101);
    producer
        .send(ProducerMessage::new("events").with_value(StringEncoder(oversized)))
        .await
        .expect("send");

    let failure = errors.recv().await.expect("rejection");
    assert_eq!(failure.error, Error::MessageSizeTooLarge);

    producer.close().await.expect("clean close");
    assert_eq!(broker.produce_calls(), 0, "no broker call for a rejected message");
}

#[tokio::test]
async fn test_message_at_exact_size_cap_accepted() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![0], vec![broker.clone()]);
    // A 5-byte value plus framing overhead lands exactly on the cap.
    let cap = MESSAGE_OVERHEAD + 5;
    let config = ProducerConfig::builder()
        .max_message_bytes(cap)
        .return_successes(true)
        .retry_backoff(Duration::from_millis(1))
        .build();
    let mut producer = AsyncProducer::from_client(cluster, config).expect("producer starts");
    let mut successes = producer.successes().expect("successes channel");
    let mut errors = producer.errors().expect("errors channel");

    producer
        .send(ProducerMessage::new("events").with_value(StringEncoder("12345".into())))
        .await
        .expect("send at cap");
    producer
        .send(ProducerMessage::new("events").with_value(StringEncoder("123456".into())))
        .await
        .expect("send over cap");

    let accepted = successes.recv().await.expect("exact-size message delivered");
    assert_eq!(accepted.offset, 0);

    let rejected = errors.recv().await.expect("one-over message rejected");
    assert_eq!(rejected.error, Error::MessageSizeTooLarge);

    producer.close().await.expect("clean close");
}

#[tokio::test]
async fn test_retry_exhaustion_surfaces_error() {
    let broker = MockBroker::failing(1, ErrorCode::RequestTimedOut);
    let cluster = MockCluster::new(vec![0], vec![broker.clone()]);
    let config = ProducerConfig::builder()
        .retry_max(2)
        .retry_backoff(Duration::from_millis(1))
        .return_errors(true)
        .build();
    let mut producer = AsyncProducer::from_client(cluster, config).expect("producer starts");
    let mut errors = producer.errors().expect("errors channel");

    producer.send(tagged("events", 0)).await.expect("send");

    let failure = errors.recv().await.expect("exhaustion error");
    assert_eq!(failure.error, Error::Server(ErrorCode::RequestTimedOut));

    producer.close().await.expect("clean close");
    assert_eq!(
        broker.produce_calls(),
        3,
        "one initial attempt plus retry_max retries"
    );
}

#[tokio::test]
async fn test_async_close_drains_every_message() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![0], vec![broker.clone()]);
    let mut producer =
        AsyncProducer::from_client(cluster, test_config()).expect("producer starts");
    let mut successes = producer.successes().expect("successes channel");
    let mut errors = producer.errors().expect("errors channel");

    for i in 0..100 {
        producer.send(tagged("events", i)).await.expect("send");
    }
    producer.async_close();

    let drain_successes =
        tokio::spawn(async move {
            let mut count = 0;
            while successes.recv().await.is_some() {
                count += 1;
            }
            count
        });
    let mut error_count = 0;
    while errors.recv().await.is_some() {
        error_count += 1;
    }
    let success_count = drain_successes.await.expect("drain task");

    assert_eq!(
        success_count + error_count,
        100,
        "every admitted message is terminally disposed exactly once"
    );
    assert_eq!(error_count, 0);
    assert_eq!(broker.total_messages(), 100);
}

#[tokio::test]
async fn test_transport_error_abandons_broker_and_recovers() {
    let broker = MockBroker::new(1);
    broker.enqueue(vec![Outcome::Transport]);
    let cluster = MockCluster::new(vec![0], vec![broker.clone()]);
    let mut producer =
        AsyncProducer::from_client(cluster.clone(), test_config()).expect("producer starts");
    let mut successes = producer.successes().expect("successes channel");

    producer.send(tagged("events", 0)).await.expect("send");

    let delivered = successes.recv().await.expect("delivered after recovery");
    assert_eq!(delivered.offset, 0);

    producer.close().await.expect("clean close");
    assert!(broker.was_closed(), "failed connection is closed");
    assert_eq!(
        broker.produce_calls(),
        2,
        "one failed attempt, then one through a fresh broker pipeline"
    );
    assert!(cluster.refresh_count() >= 1);
}

// ============================================================================
// Additional behavior
// ============================================================================

#[tokio::test]
async fn test_zero_partitions_yields_leader_not_available() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![], vec![broker]);
    let mut producer =
        AsyncProducer::from_client(cluster, test_config()).expect("producer starts");
    let mut errors = producer.errors().expect("errors channel");

    producer.send(tagged("events", 0)).await.expect("send");

    let failure = errors.recv().await.expect("error");
    assert_eq!(failure.error, Error::LeaderNotAvailable);

    producer.close().await.expect("clean close");
}

#[tokio::test]
async fn test_encoder_failure_is_per_message() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![0], vec![broker.clone()]);
    let mut producer =
        AsyncProducer::from_client(cluster, test_config()).expect("producer starts");
    let mut successes = producer.successes().expect("successes channel");
    let mut errors = producer.errors().expect("errors channel");

    producer
        .send(ProducerMessage::new("events").with_value(FailingEncoder))
        .await
        .expect("send");
    producer.send(tagged("events", 1)).await.expect("send");

    let failure = errors.recv().await.expect("encode failure");
    assert_eq!(
        failure.error,
        Error::Encoding("intentional failure".into())
    );

    let delivered = successes.recv().await.expect("healthy message delivered");
    assert_eq!(tag_of(&delivered), 1);

    producer.close().await.expect("clean close");
}

#[tokio::test]
async fn test_flush_message_count_trigger_batches_exactly() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![0], vec![broker.clone()]);
    let config = ProducerConfig::builder()
        .flush_messages(3)
        .flush_frequency(Duration::from_secs(3600))
        .return_successes(true)
        .retry_backoff(Duration::from_millis(1))
        .build();
    let mut producer = AsyncProducer::from_client(cluster, config).expect("producer starts");
    let mut successes = producer.successes().expect("successes channel");

    for i in 0..3 {
        producer.send(tagged("events", i)).await.expect("send");
    }
    for _ in 0..3 {
        successes.recv().await.expect("success");
    }

    assert_eq!(
        broker.produce_calls(),
        1,
        "the batch goes out exactly when it reaches flush_messages"
    );
    assert_eq!(broker.total_messages(), 3);

    producer.close().await.expect("clean close");
}

#[tokio::test]
async fn test_round_robin_spreads_across_partitions() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![0, 1], vec![broker.clone()]);
    let config = ProducerConfig::builder()
        .partitioner(Arc::new(|_topic: &str| -> Box<dyn strand_client::Partitioner> {
            Box::new(RoundRobinPartitioner::default())
        }))
        .return_successes(true)
        .retry_backoff(Duration::from_millis(1))
        .build();
    let mut producer = AsyncProducer::from_client(cluster, config).expect("producer starts");
    let mut successes = producer.successes().expect("successes channel");

    for i in 0..4 {
        producer.send(tagged("events", i)).await.expect("send");
    }

    let mut per_partition: HashMap<i32, usize> = HashMap::new();
    for _ in 0..4 {
        let msg = successes.recv().await.expect("success");
        *per_partition.entry(msg.partition).or_default() += 1;
    }
    assert_eq!(per_partition.get(&0), Some(&2));
    assert_eq!(per_partition.get(&1), Some(&2));

    producer.close().await.expect("clean close");
}

#[tokio::test]
async fn test_owned_client_closed_on_shutdown() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![0], vec![broker]);
    let config = ProducerConfig::builder()
        .retry_backoff(Duration::from_millis(1))
        .build();
    let producer =
        AsyncProducer::with_owned_client(cluster.clone(), config).expect("producer starts");

    producer.send(tagged("events", 0)).await.expect("send");
    producer.close().await.expect("clean close");

    assert!(cluster.closed(), "an owned client is closed during shutdown");
}

#[tokio::test]
async fn test_rejects_already_closed_client() {
    let broker = MockBroker::new(1);
    let cluster = MockCluster::new(vec![0], vec![broker]);
    cluster.close().await.expect("close client");

    let result = AsyncProducer::from_client(cluster, test_config());
    assert!(matches!(result, Err(Error::ClientClosed)));
}

#[tokio::test]
async fn test_close_collects_failures_as_batch_error() {
    let broker = MockBroker::failing(1, ErrorCode::InvalidTopic);
    let cluster = MockCluster::new(vec![0], vec![broker]);
    let config = ProducerConfig::builder()
        .retry_backoff(Duration::from_millis(1))
        .return_errors(true)
        .build();
    let producer = AsyncProducer::from_client(cluster, config).expect("producer starts");

    producer.send(tagged("events", 0)).await.expect("send");
    producer.send(tagged("events", 1)).await.expect("send");

    let errors = producer.close().await.expect_err("failures are returned");
    assert_eq!(errors.0.len(), 2);
    for failure in &errors.0 {
        assert_eq!(failure.error, Error::Server(ErrorCode::InvalidTopic));
    }
}
