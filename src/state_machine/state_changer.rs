use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::{
    backoff::BackoffCalculator,
    errors::{StateMachineError, StateMachineResult},
    events::EnvelopeEvent,
    persistence::{StatusUpdate, StorageConnection, TransitionRecord},
    states::EnvelopeState,
};
use crate::config::{OutboxConfig, RetentionConfig, RetryConfig};
use crate::messaging::OperateResult;
use crate::models::Envelope;

/// Host hook invoked once an envelope has been failed terminally
pub type FailedThresholdCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Computes the next status of an envelope from an attempt outcome and
/// persists it through the storage connection
#[derive(Clone)]
pub struct StateChanger {
    storage: Arc<dyn StorageConnection>,
    retry: RetryConfig,
    retention: RetentionConfig,
    backoff: BackoffCalculator,
    failed_threshold_callback: Option<FailedThresholdCallback>,
}

impl std::fmt::Debug for StateChanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChanger")
            .field("retry", &self.retry)
            .field("retention", &self.retention)
            .field("backoff", &self.backoff)
            .field(
                "failed_threshold_callback",
                &self.failed_threshold_callback.is_some(),
            )
            .finish()
    }
}

impl StateChanger {
    pub fn new(storage: Arc<dyn StorageConnection>, config: &OutboxConfig) -> Self {
        Self {
            storage,
            retry: config.retry.clone(),
            retention: config.retention.clone(),
            backoff: BackoffCalculator::from_config(&config.retry),
            failed_threshold_callback: None,
        }
    }

    /// Register a hook that observes envelopes once they are failed terminally
    pub fn with_failed_threshold_callback(mut self, callback: FailedThresholdCallback) -> Self {
        self.failed_threshold_callback = Some(callback);
        self
    }

    /// Apply an attempt outcome to an envelope and persist the new status
    ///
    /// The returned envelope reflects the persisted row. On a persistence
    /// failure nothing is returned and the stored row keeps its previous
    /// status, so the envelope is picked up again by the next due pass.
    pub async fn apply(
        &self,
        envelope: &Envelope,
        result: &OperateResult,
    ) -> StateMachineResult<Envelope> {
        let now = Utc::now();
        let mut next = envelope.clone();

        let event = match result {
            OperateResult::Success => EnvelopeEvent::Succeed,
            OperateResult::Failed(error) => {
                next.retries = envelope.retries.saturating_add(1);
                if error.is_retryable() && next.retries < self.retry.max_retries {
                    EnvelopeEvent::Reschedule(error.description.clone())
                } else {
                    EnvelopeEvent::Fail(error.description.clone())
                }
            }
        };

        let target = determine_target_state(envelope.status, &event)?;

        next.status = target;
        next.last_attempt_at = Some(now);
        next.last_error = event.error_message().map(str::to_string);
        match &event {
            EnvelopeEvent::Succeed => {
                next.next_attempt_at = None;
                next.expires_at = Some(add_duration(now, self.retention.succeeded_expiry()));
            }
            EnvelopeEvent::Reschedule(_) => {
                let delay = self.backoff.delay_for(next.retries);
                next.next_attempt_at = Some(add_duration(now, delay));
                next.expires_at = None;
            }
            EnvelopeEvent::Fail(_) => {
                next.next_attempt_at = None;
                next.expires_at = Some(add_duration(now, self.retention.failed_expiry()));
            }
            EnvelopeEvent::Start => {}
        }

        let transition = TransitionRecord {
            envelope_id: next.id.clone(),
            from_state: envelope.status,
            to_state: target,
            event: event.event_type().to_string(),
            retries: next.retries,
            error: next.last_error.clone(),
            recorded_at: now,
        };

        if let Err(e) = self
            .storage
            .save_status(&StatusUpdate::from_envelope(&next, transition))
            .await
        {
            error!(
                envelope_id = %next.id,
                from_state = %envelope.status,
                to_state = %target,
                error = %e,
                "Failed to persist envelope status"
            );
            return Err(StateMachineError::Persistence(e));
        }

        match target {
            EnvelopeState::Succeeded => debug!(
                envelope_id = %next.id,
                retries = next.retries,
                "Envelope succeeded"
            ),
            EnvelopeState::Scheduled => info!(
                envelope_id = %next.id,
                retries = next.retries,
                next_attempt_at = ?next.next_attempt_at,
                error = ?next.last_error,
                "Envelope rescheduled"
            ),
            EnvelopeState::Failed => {
                warn!(
                    envelope_id = %next.id,
                    retries = next.retries,
                    error = ?next.last_error,
                    "Envelope failed terminally"
                );
                if let Some(callback) = &self.failed_threshold_callback {
                    callback(&next);
                }
            }
            EnvelopeState::Publishing => {}
        }

        Ok(next)
    }
}

/// Determine the target state based on current state and event
pub fn determine_target_state(
    current_state: EnvelopeState,
    event: &EnvelopeEvent,
) -> StateMachineResult<EnvelopeState> {
    let target = match (current_state, event) {
        (EnvelopeState::Scheduled, EnvelopeEvent::Start) => EnvelopeState::Publishing,

        (EnvelopeState::Scheduled | EnvelopeState::Publishing, EnvelopeEvent::Succeed) => {
            EnvelopeState::Succeeded
        }
        (EnvelopeState::Scheduled | EnvelopeState::Publishing, EnvelopeEvent::Reschedule(_)) => {
            EnvelopeState::Scheduled
        }
        (EnvelopeState::Scheduled | EnvelopeState::Publishing, EnvelopeEvent::Fail(_)) => {
            EnvelopeState::Failed
        }

        (from_state, _) => {
            return Err(StateMachineError::invalid_transition(
                from_state,
                event.event_type(),
            ))
        }
    };

    Ok(target)
}

/// `now + delay`, saturating at the latest representable timestamp
fn add_duration(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
