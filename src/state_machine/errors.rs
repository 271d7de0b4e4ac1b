use thiserror::Error;

use super::states::EnvelopeState;

/// Error types for state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: EnvelopeState, event: String },

    #[error("Persistence operation failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Storage failures; a status change is not durable until storage accepts it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Envelope not found: {envelope_id}")]
    EnvelopeNotFound { envelope_id: String },

    #[error("Envelope already exists: {envelope_id}")]
    DuplicateEnvelope { envelope_id: String },

    #[error("Failed to save status for envelope {envelope_id}: {reason}")]
    StatusSaveFailed { envelope_id: String, reason: String },

    #[error("Concurrent modification detected for envelope {envelope_id}")]
    ConcurrentModification { envelope_id: String },

    #[error("Transition log for envelope {envelope_id} is inconsistent at sort key {sort_key}")]
    CorruptTransitionLog { envelope_id: String, sort_key: u32 },

    #[error("Failed to load due envelopes: {reason}")]
    LoadFailed { reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StateMachineError {
    pub fn invalid_transition(from: EnvelopeState, event: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from,
            event: event.into(),
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;
