use std::sync::Arc;
use std::time::Duration;

use outbox_core::messaging::{
    ConnectionChannelPool, DefaultMessagePacker, FailureDisposition, InMemoryBroker,
    MessagePacker, MessagingError, MessagingResult, OperateResult, PublishMessageSender,
};
use outbox_core::Envelope;

use crate::common::{test_config, TestPipeline};

#[tokio::test]
async fn test_success_returns_channel_exactly_once() {
    let pipeline = TestPipeline::new(test_config());
    let envelope = Envelope::with_id("abc", "order.created", "{}");

    let result = pipeline.sender.publish(&envelope).await;

    assert_eq!(result, OperateResult::Success);
    let stats = pipeline.pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.rented, 0);
    assert_eq!(stats.destroyed_total, 0);
    assert_eq!(pipeline.broker.channels_closed(), 0);
}

#[tokio::test]
async fn test_publish_uses_configured_exchange_and_properties() {
    let pipeline = TestPipeline::new(test_config());
    let envelope = Envelope::with_id("abc", "order.created", r#"{"order_id":42}"#);

    pipeline.sender.publish(&envelope).await;

    let published = pipeline.broker.published();
    assert_eq!(published.len(), 1);
    let message = &published[0];
    assert_eq!(message.destination, "cap.default.router");
    assert_eq!(message.routing_key, "order.created");
    assert_eq!(message.properties.delivery_mode, 2);
    assert_eq!(message.properties.message_id, "abc");

    let body: Envelope = serde_json::from_slice(&message.body).unwrap();
    assert_eq!(body, envelope);

    let destination = pipeline.broker.destination("cap.default.router").unwrap();
    assert!(destination.durable);
}

#[tokio::test]
async fn test_consecutive_successes_reuse_one_channel() {
    let pipeline = TestPipeline::new(test_config());

    for i in 0..5 {
        let envelope = Envelope::with_id(format!("e-{i}"), "order.created", "{}");
        assert!(pipeline.sender.publish(&envelope).await.is_success());
    }

    assert_eq!(pipeline.broker.channels_opened(), 1);
    assert_eq!(pipeline.broker.published_count(), 5);
}

#[tokio::test]
async fn test_broker_failure_destroys_compromised_channel() {
    let pipeline = TestPipeline::new(test_config());
    pipeline.broker.fail_next_publish(MessagingError::broker_publish(
        "CONNECTION_FORCED",
        "broker forced connection closure",
        false,
    ));

    let result = pipeline
        .sender
        .publish(&Envelope::with_id("abc", "order.created", "{}"))
        .await;

    let error = result.error().unwrap();
    assert_eq!(error.code, "CONNECTION_FORCED");
    assert_eq!(error.disposition, FailureDisposition::Retryable);

    let stats = pipeline.pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.rented, 0);
    assert_eq!(stats.destroyed_total, 1);
    assert_eq!(pipeline.broker.channels_closed(), 1);
}

#[tokio::test]
async fn test_permanent_broker_error_is_terminal() {
    let pipeline = TestPipeline::new(test_config());
    pipeline.broker.fail_next_publish(MessagingError::broker_publish(
        "ACCESS_REFUSED",
        "access to exchange refused for user",
        true,
    ));

    let result = pipeline
        .sender
        .publish(&Envelope::with_id("abc", "order.created", "{}"))
        .await;

    assert_eq!(
        result.error().unwrap().disposition,
        FailureDisposition::Terminal
    );
}

struct RejectingPacker;

impl MessagePacker for RejectingPacker {
    fn pack(&self, _envelope: &Envelope) -> MessagingResult<String> {
        Err(MessagingError::serialization("content is not encodable"))
    }

    fn unpack(&self, _content: &str) -> MessagingResult<Envelope> {
        Err(MessagingError::deserialization("content is not decodable"))
    }
}

#[tokio::test]
async fn test_pack_failure_is_terminal_and_keeps_channel() {
    let config = test_config();
    let broker = InMemoryBroker::new();
    let pool = Arc::new(ConnectionChannelPool::from_config(
        Arc::new(broker.connector()),
        &config,
    ));
    let sender = PublishMessageSender::new(pool.clone(), Arc::new(RejectingPacker), &config);

    let result = sender
        .publish(&Envelope::with_id("abc", "order.created", "{}"))
        .await;

    let error = result.error().unwrap();
    assert_eq!(error.code, "SERIALIZATION");
    assert_eq!(error.disposition, FailureDisposition::Terminal);

    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.rented, 0);
    assert_eq!(stats.destroyed_total, 0);
    assert_eq!(broker.published_count(), 0);
    assert_eq!(broker.channels_closed(), 0);
}

#[tokio::test]
async fn test_invalid_routing_key_fails_without_renting() {
    let pipeline = TestPipeline::new(test_config());

    let result = pipeline
        .sender
        .publish(&Envelope::with_id("abc", "order created", "{}"))
        .await;

    let error = result.error().unwrap();
    assert_eq!(error.code, "INVALID_ROUTING_KEY");
    assert!(!error.is_retryable());
    assert_eq!(pipeline.broker.channels_opened(), 0);
}

#[tokio::test]
async fn test_slow_publish_times_out_and_discards_channel() {
    let mut config = test_config();
    config.broker.publish_timeout_ms = 20;
    let pipeline = TestPipeline::new(config);
    pipeline
        .broker
        .set_publish_delay(Some(Duration::from_millis(200)));

    let result = pipeline
        .sender
        .publish(&Envelope::with_id("abc", "order.created", "{}"))
        .await;

    let error = result.error().unwrap();
    assert_eq!(error.code, "PUBLISH_TIMEOUT");
    assert!(error.is_retryable());
    assert_eq!(pipeline.pool.stats().idle, 0);
    assert_eq!(pipeline.pool.stats().rented, 0);
    assert_eq!(pipeline.broker.published_count(), 0);
}

#[tokio::test]
async fn test_exhausted_pool_is_retryable() {
    let mut config = test_config();
    config.pool.max_pool_size = 1;
    config.pool.rent_timeout_ms = 20;
    let pipeline = TestPipeline::new(config);

    let _held = pipeline.pool.rent().await.unwrap();
    let result = pipeline
        .sender
        .publish(&Envelope::with_id("abc", "order.created", "{}"))
        .await;

    let error = result.error().unwrap();
    assert_eq!(error.code, "POOL_EXHAUSTED");
    assert!(error.is_retryable());
    assert_eq!(pipeline.broker.published_count(), 0);
}

#[tokio::test]
async fn test_shut_down_pool_is_retryable() {
    let pipeline = TestPipeline::new(test_config());
    pipeline.pool.shutdown().await;

    let result = pipeline
        .sender
        .publish(&Envelope::with_id("abc", "order.created", "{}"))
        .await;

    assert_eq!(result.error().unwrap().code, "POOL_CLOSED");
}

#[tokio::test]
async fn test_servers_address_is_redacted() {
    let config = test_config();
    let broker = InMemoryBroker::new();
    let pool = Arc::new(ConnectionChannelPool::from_config(
        Arc::new(broker.connector()),
        &config,
    ));
    let sender = PublishMessageSender::new(pool, Arc::new(DefaultMessagePacker::default()), &config);

    assert_eq!(sender.servers_address(), "amqp://localhost:5672/%2F");
    assert_eq!(sender.destination().name, "cap.default.router");
}
