use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::OutboxConfig;
use crate::logging::{log_delivery_outcome, log_error};
use crate::messaging::PublishMessageSender;
use crate::models::Envelope;
use crate::state_machine::{
    determine_target_state, EnvelopeEvent, EnvelopeState, StateChanger, StateMachineError,
    StateMachineResult, StorageConnection,
};

/// Outcome counts of one pass over the due envelopes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Attempts whose new status could not be recorded
    pub errors: usize,
}

impl DeliveryReport {
    fn record(&mut self, outcome: &StateMachineResult<Envelope>) {
        self.attempted += 1;
        match outcome {
            Ok(envelope) => match envelope.status {
                EnvelopeState::Succeeded => self.succeeded += 1,
                EnvelopeState::Failed => self.failed += 1,
                EnvelopeState::Scheduled | EnvelopeState::Publishing => self.rescheduled += 1,
            },
            Err(_) => self.errors += 1,
        }
    }
}

/// Drives envelopes through the sender and the state changer
#[derive(Clone)]
pub struct DeliveryProcessor {
    sender: PublishMessageSender,
    state_changer: StateChanger,
    storage: Arc<dyn StorageConnection>,
    max_concurrent_deliveries: usize,
}

impl std::fmt::Debug for DeliveryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryProcessor")
            .field("sender", &self.sender)
            .field("state_changer", &self.state_changer)
            .field("max_concurrent_deliveries", &self.max_concurrent_deliveries)
            .finish()
    }
}

impl DeliveryProcessor {
    pub fn new(
        sender: PublishMessageSender,
        state_changer: StateChanger,
        storage: Arc<dyn StorageConnection>,
        config: &OutboxConfig,
    ) -> Self {
        Self {
            sender,
            state_changer,
            storage,
            max_concurrent_deliveries: config.delivery.max_concurrent_deliveries.max(1),
        }
    }

    /// Run one delivery attempt and persist its outcome
    ///
    /// Terminal envelopes are rejected with `InvalidTransition` before any
    /// broker interaction.
    pub async fn send(&self, envelope: &Envelope) -> StateMachineResult<Envelope> {
        let mut publishing = envelope.clone();
        publishing.status = determine_target_state(envelope.status, &EnvelopeEvent::Start)?;
        publishing.last_attempt_at = Some(Utc::now());

        debug!(
            envelope_id = %publishing.id,
            routing_key = %publishing.key,
            retries = publishing.retries,
            "Publishing envelope"
        );

        let result = self.sender.publish(&publishing).await;
        log_delivery_outcome(&publishing, &result);

        self.state_changer.apply(&publishing, &result).await
    }

    /// Deliver every due envelope with bounded concurrency
    ///
    /// Per-envelope failures are counted in the report; only a failure to load
    /// the due envelopes is returned as an error.
    pub async fn process_due(&self) -> StateMachineResult<DeliveryReport> {
        let due = self.storage.load_due_envelopes().await?;
        if due.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let semaphore = Semaphore::new(self.max_concurrent_deliveries);
        let semaphore = &semaphore;
        let outcomes: Vec<(Envelope, StateMachineResult<Envelope>)> =
            join_all(due.into_iter().map(|envelope| async move {
                // Never closed, so the permit is always granted
                let _permit = semaphore.acquire().await.ok();
                let outcome = self.send(&envelope).await;
                (envelope, outcome)
            }))
            .await;

        let mut report = DeliveryReport::default();
        for (envelope, outcome) in &outcomes {
            if let Err(e) = outcome {
                let context = format!("envelope_id={}", envelope.id);
                match e {
                    StateMachineError::Persistence(_) => {
                        log_error("delivery", "save_status", &e.to_string(), Some(&context))
                    }
                    StateMachineError::InvalidTransition { .. } => {
                        log_error("delivery", "transition", &e.to_string(), Some(&context))
                    }
                }
            }
            report.record(outcome);
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            rescheduled = report.rescheduled,
            failed = report.failed,
            errors = report.errors,
            "📦 Delivery pass complete"
        );
        Ok(report)
    }
}
