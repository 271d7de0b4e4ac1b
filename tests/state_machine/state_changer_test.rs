use std::sync::{Arc, Mutex};

use chrono::Utc;
use outbox_core::config::{BackoffPolicy, OutboxConfig};
use outbox_core::messaging::{OperateError, OperateResult};
use outbox_core::state_machine::{
    EnvelopeState, InMemoryStorage, StateChanger, StateMachineError,
};
use outbox_core::Envelope;

fn changer(storage: &Arc<InMemoryStorage>, max_retries: u32) -> StateChanger {
    let mut config = OutboxConfig::default();
    config.retry.max_retries = max_retries;
    config.retry.backoff = BackoffPolicy::Linear;
    config.retry.base_delay_seconds = 10;
    config.retry.max_delay_seconds = 25;
    StateChanger::new(storage.clone(), &config)
}

fn broker_failure() -> OperateResult {
    OperateResult::failed(OperateError::retryable("CONNECTION_FORCED", "broker restart"))
}

#[tokio::test]
async fn test_retry_budget_fails_on_last_allowed_failure() {
    let storage = Arc::new(InMemoryStorage::new());
    let changer = changer(&storage, 5);
    let mut envelope = Envelope::with_id("x", "order.created", "{}");
    storage.store(envelope.clone()).unwrap();

    for attempt in 1..5 {
        envelope = changer.apply(&envelope, &broker_failure()).await.unwrap();
        assert_eq!(envelope.status, EnvelopeState::Scheduled, "attempt {attempt}");
        assert_eq!(envelope.retries, attempt);
    }

    envelope = changer.apply(&envelope, &broker_failure()).await.unwrap();
    assert_eq!(envelope.status, EnvelopeState::Failed);
    assert_eq!(envelope.retries, 5);
}

#[tokio::test]
async fn test_backoff_delay_grows_and_is_capped() {
    let storage = Arc::new(InMemoryStorage::new());
    let changer = changer(&storage, 10);
    let mut envelope = Envelope::with_id("x", "order.created", "{}");
    storage.store(envelope.clone()).unwrap();

    let mut delays = Vec::new();
    for _ in 0..4 {
        let before = Utc::now();
        envelope = changer.apply(&envelope, &broker_failure()).await.unwrap();
        let next = envelope.next_attempt_at.unwrap();
        delays.push((next - before).num_seconds());
    }

    // linear 10s, 20s, then capped at 25s
    assert_eq!(delays, vec![10, 20, 25, 25]);
}

#[tokio::test]
async fn test_last_error_reflects_most_recent_failure() {
    let storage = Arc::new(InMemoryStorage::new());
    let changer = changer(&storage, 10);
    let envelope = Envelope::with_id("x", "order.created", "{}");
    storage.store(envelope.clone()).unwrap();

    let first = OperateResult::failed(OperateError::retryable("A", "first failure"));
    let second = OperateResult::failed(OperateError::retryable("B", "second failure"));
    let envelope = changer.apply(&envelope, &first).await.unwrap();
    let envelope = changer.apply(&envelope, &second).await.unwrap();

    assert_eq!(envelope.last_error.as_deref(), Some("second failure"));
    assert_eq!(
        storage.get(&envelope.id).unwrap().last_error.as_deref(),
        Some("second failure")
    );
}

#[tokio::test]
async fn test_terminal_states_never_regress() {
    let storage = Arc::new(InMemoryStorage::new());
    let changer = changer(&storage, 3);

    let succeeded = Envelope::with_id("s", "order.created", "{}");
    storage.store(succeeded.clone()).unwrap();
    let succeeded = changer.apply(&succeeded, &OperateResult::Success).await.unwrap();

    let failed = Envelope::with_id("f", "order.created", "{}");
    storage.store(failed.clone()).unwrap();
    let failed = changer
        .apply(
            &failed,
            &OperateResult::failed(OperateError::terminal("SERIALIZATION", "bad")),
        )
        .await
        .unwrap();

    for terminal in [&succeeded, &failed] {
        for result in [OperateResult::Success, broker_failure()] {
            let err = changer.apply(terminal, &result).await.unwrap_err();
            assert!(matches!(err, StateMachineError::InvalidTransition { .. }));
        }
        assert_eq!(storage.get(&terminal.id).unwrap().status, terminal.status);
        assert_eq!(storage.transitions(&terminal.id).len(), 1);
    }
}

#[tokio::test]
async fn test_stale_copy_cannot_overwrite_terminal_row() {
    let storage = Arc::new(InMemoryStorage::new());
    let changer = changer(&storage, 3);
    let envelope = Envelope::with_id("x", "order.created", "{}");
    storage.store(envelope.clone()).unwrap();

    // Two workers picked up the same scheduled copy; the first one wins
    changer.apply(&envelope, &OperateResult::Success).await.unwrap();
    let err = changer.apply(&envelope, &broker_failure()).await.unwrap_err();

    assert!(matches!(err, StateMachineError::Persistence(_)));
    assert_eq!(
        storage.get(&envelope.id).unwrap().status,
        EnvelopeState::Succeeded
    );
}

#[tokio::test]
async fn test_failed_threshold_callback_sees_failed_envelope_once() {
    let storage = Arc::new(InMemoryStorage::new());
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let changer = changer(&storage, 2).with_failed_threshold_callback(Arc::new(
        move |envelope: &Envelope| {
            sink.lock().unwrap().push(envelope.id.to_string());
        },
    ));

    let mut envelope = Envelope::with_id("x", "order.created", "{}");
    storage.store(envelope.clone()).unwrap();
    envelope = changer.apply(&envelope, &broker_failure()).await.unwrap();
    assert!(seen.lock().unwrap().is_empty());

    envelope = changer.apply(&envelope, &broker_failure()).await.unwrap();
    assert_eq!(envelope.status, EnvelopeState::Failed);
    assert_eq!(*seen.lock().unwrap(), vec!["x".to_string()]);
}

#[tokio::test]
async fn test_callback_not_invoked_when_persist_fails() {
    let storage = Arc::new(InMemoryStorage::new());
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let changer = changer(&storage, 1).with_failed_threshold_callback(Arc::new(
        move |_: &Envelope| {
            *counter.lock().unwrap() += 1;
        },
    ));
    let envelope = Envelope::with_id("x", "order.created", "{}");
    storage.store(envelope.clone()).unwrap();
    storage.fail_next_saves(1);

    let err = changer.apply(&envelope, &broker_failure()).await.unwrap_err();

    assert!(matches!(err, StateMachineError::Persistence(_)));
    assert_eq!(*calls.lock().unwrap(), 0);
}
