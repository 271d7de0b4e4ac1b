use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::state_machine::{PersistenceError, StateMachineError};

/// Crate-level error aggregating the subsystem errors
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl OutboxError {
    /// Whether retrying the failed operation later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration(_) => false,
            Self::Messaging(e) => e.is_retryable(),
            Self::StateMachine(StateMachineError::Persistence(_)) | Self::Persistence(_) => true,
            Self::StateMachine(StateMachineError::InvalidTransition { .. }) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OutboxError>;
