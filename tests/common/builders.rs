use std::sync::Arc;

use outbox_core::config::{BackoffPolicy, OutboxConfig, RentPolicy};
use outbox_core::delivery::DeliveryProcessor;
use outbox_core::messaging::{
    ConnectionChannelPool, DefaultMessagePacker, InMemoryBroker, PublishMessageSender,
};
use outbox_core::state_machine::{InMemoryStorage, StateChanger};
use outbox_core::Envelope;

/// Configuration with short timeouts suitable for tests
pub fn test_config() -> OutboxConfig {
    let mut config = OutboxConfig::default();
    config.pool.max_pool_size = 2;
    config.pool.rent_timeout_ms = 200;
    config.pool.rent_policy = RentPolicy::Block;
    config.broker.publish_timeout_ms = 500;
    config.retry.max_retries = 3;
    config.retry.backoff = BackoffPolicy::Exponential;
    config.retry.base_delay_seconds = 1;
    config.retry.max_delay_seconds = 60;
    config.delivery.max_concurrent_deliveries = 4;
    config
}

/// Fully wired delivery pipeline over the in-memory broker and storage
pub struct TestPipeline {
    pub config: OutboxConfig,
    pub broker: InMemoryBroker,
    pub storage: Arc<InMemoryStorage>,
    pub pool: Arc<ConnectionChannelPool>,
    pub sender: PublishMessageSender,
    pub processor: DeliveryProcessor,
}

impl TestPipeline {
    pub fn new(config: OutboxConfig) -> Self {
        Self::with_changer(config, |changer| changer)
    }

    /// Build with a hook to customize the state changer
    pub fn with_changer(
        config: OutboxConfig,
        customize: impl FnOnce(StateChanger) -> StateChanger,
    ) -> Self {
        let broker = InMemoryBroker::new();
        let storage = Arc::new(InMemoryStorage::new());
        let pool = Arc::new(ConnectionChannelPool::from_config(
            Arc::new(broker.connector()),
            &config,
        ));
        let sender = PublishMessageSender::new(
            pool.clone(),
            Arc::new(DefaultMessagePacker::default()),
            &config,
        );
        let changer = customize(StateChanger::new(storage.clone(), &config));
        let processor = DeliveryProcessor::new(sender.clone(), changer, storage.clone(), &config);

        Self {
            config,
            broker,
            storage,
            pool,
            sender,
            processor,
        }
    }

    /// Store a fresh scheduled envelope and return it
    pub fn enqueue(&self, id: &str, key: &str, content: &str) -> Envelope {
        let envelope = Envelope::with_id(id, key, content);
        self.storage
            .store(envelope.clone())
            .expect("envelope ids are unique within a test");
        envelope
    }
}
