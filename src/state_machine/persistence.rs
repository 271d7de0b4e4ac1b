use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::PersistenceResult;
use super::states::EnvelopeState;
use crate::models::{Envelope, EnvelopeId};

/// One entry of the append-only transition log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub envelope_id: EnvelopeId,
    /// State observed before the change; may be the in-memory `publishing`
    pub from_state: EnvelopeState,
    pub to_state: EnvelopeState,
    pub event: String,
    pub retries: u32,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Everything storage must record atomically for one envelope row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub envelope_id: EnvelopeId,
    pub status: EnvelopeState,
    pub retries: u32,
    pub error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub transition: TransitionRecord,
}

impl StatusUpdate {
    /// Build the update that makes `envelope` durable
    pub fn from_envelope(envelope: &Envelope, transition: TransitionRecord) -> Self {
        Self {
            envelope_id: envelope.id.clone(),
            status: envelope.status,
            retries: envelope.retries,
            error: envelope.last_error.clone(),
            last_attempt_at: envelope.last_attempt_at,
            next_attempt_at: envelope.next_attempt_at,
            expires_at: envelope.expires_at,
            transition,
        }
    }

    /// Copy the recorded fields onto a stored envelope
    pub fn apply_to(&self, envelope: &mut Envelope) {
        envelope.status = self.status;
        envelope.retries = self.retries;
        envelope.last_error = self.error.clone();
        envelope.last_attempt_at = self.last_attempt_at;
        envelope.next_attempt_at = self.next_attempt_at;
        envelope.expires_at = self.expires_at;
    }
}

/// Durable record of envelopes and their status
///
/// Implementations must apply a single `save_status` atomically per envelope
/// row. The core never writes the `publishing` state through this trait.
#[async_trait]
pub trait StorageConnection: Send + Sync {
    /// Envelopes whose status is scheduled and whose next attempt is due
    async fn load_due_envelopes(&self) -> PersistenceResult<Vec<Envelope>>;

    /// Persist a status change together with its transition record
    async fn save_status(&self, update: &StatusUpdate) -> PersistenceResult<()>;
}
