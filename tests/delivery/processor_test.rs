use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use outbox_core::messaging::MessagingError;
use outbox_core::state_machine::{EnvelopeState, StateMachineError, StorageConnection};
use outbox_core::Envelope;

use crate::common::{test_config, TestPipeline};

fn broker_publish_error() -> MessagingError {
    MessagingError::broker_publish("CONNECTION_FORCED", "broker forced connection closure", false)
}

#[tokio::test]
async fn test_three_broker_failures_with_max_retries_three() {
    let pipeline = TestPipeline::new(test_config());
    assert_eq!(pipeline.config.retry.max_retries, 3);
    let mut envelope = pipeline.enqueue("x", "order.created", "{}");

    for expected_retries in 1..=3 {
        pipeline.broker.fail_next_publish(broker_publish_error());
        envelope = pipeline.processor.send(&envelope).await.unwrap();
        assert_eq!(envelope.retries, expected_retries);
        if expected_retries < 3 {
            assert_eq!(envelope.status, EnvelopeState::Scheduled);
        }
    }

    assert_eq!(envelope.status, EnvelopeState::Failed);
    assert_eq!(envelope.retries, 3);
    let stored = pipeline.storage.get(&envelope.id).unwrap();
    assert_eq!(stored.status, EnvelopeState::Failed);
    assert_eq!(stored.retries, 3);

    // Every failed attempt destroyed its channel
    let stats = pipeline.pool.stats();
    assert_eq!(stats.destroyed_total, 3);
    assert_eq!(stats.rented, 0);
}

#[tokio::test]
async fn test_rescheduled_envelope_is_not_due_until_backoff_elapses() {
    let pipeline = TestPipeline::new(test_config());
    pipeline.enqueue("x", "order.created", "{}");
    pipeline.broker.fail_next_publish(broker_publish_error());

    let report = pipeline.processor.process_due().await.unwrap();
    assert_eq!(report.rescheduled, 1);

    let again = pipeline.processor.process_due().await.unwrap();
    assert_eq!(again.attempted, 0);
    assert_eq!(pipeline.broker.published_count(), 0);
}

#[tokio::test]
async fn test_persistence_failure_leaves_envelope_due() {
    let pipeline = TestPipeline::new(test_config());
    let envelope = pipeline.enqueue("x", "order.created", "{}");
    pipeline.storage.fail_next_saves(1);

    let err = pipeline.processor.send(&envelope).await.unwrap_err();
    assert!(matches!(err, StateMachineError::Persistence(_)));

    // Published but not recorded: delivered again on the next pass
    assert_eq!(pipeline.broker.published_count(), 1);
    let due = pipeline.storage.load_due_envelopes().await.unwrap();
    assert_eq!(due.len(), 1);

    let report = pipeline.processor.process_due().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(pipeline.broker.published_count(), 2);
}

#[tokio::test]
async fn test_process_due_counts_persistence_errors() {
    let pipeline = TestPipeline::new(test_config());
    pipeline.enqueue("x", "order.created", "{}");
    pipeline.storage.fail_next_saves(1);

    let report = pipeline.processor.process_due().await.unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.errors, 1);
}

#[tokio::test]
async fn test_concurrent_pass_stays_within_pool_bound() {
    let mut config = test_config();
    config.pool.max_pool_size = 2;
    config.pool.rent_timeout_ms = 5_000;
    config.delivery.max_concurrent_deliveries = 8;
    let pipeline = TestPipeline::new(config);
    for i in 0..40 {
        pipeline.enqueue(&format!("e-{i}"), "order.created", "{}");
    }

    let report = pipeline.processor.process_due().await.unwrap();

    assert_eq!(report.attempted, 40);
    assert_eq!(report.succeeded, 40);
    assert_eq!(pipeline.broker.published_count(), 40);
    assert!(pipeline.broker.channels_opened() <= 2);
    assert_eq!(pipeline.pool.stats().rented, 0);
}

#[tokio::test]
async fn test_failed_threshold_callback_fires_from_delivery() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut config = test_config();
    config.retry.max_retries = 1;
    let pipeline = TestPipeline::with_changer(config, |changer| {
        changer.with_failed_threshold_callback(Arc::new(move |_: &Envelope| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    });
    let envelope = pipeline.enqueue("x", "order.created", "{}");
    pipeline.broker.fail_next_publish(broker_publish_error());

    let updated = pipeline.processor.send(&envelope).await.unwrap();

    assert_eq!(updated.status, EnvelopeState::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_broker_restart_recovers_with_fresh_channel() {
    let pipeline = TestPipeline::new(test_config());
    let first = pipeline.enqueue("a", "order.created", "{}");
    let second = pipeline.enqueue("b", "order.created", "{}");

    pipeline.processor.send(&first).await.unwrap();
    pipeline.broker.close_all_channels();
    let updated = pipeline.processor.send(&second).await.unwrap();

    assert_eq!(updated.status, EnvelopeState::Succeeded);
    assert_eq!(pipeline.broker.channels_opened(), 2);
}
