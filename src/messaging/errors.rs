//! # Messaging Error Types
//!
//! Structured errors for the pool, packer and broker collaborators. The
//! publish sender folds every one of these into an `OperateError`; none of
//! them crosses the sender boundary.

use thiserror::Error;

use crate::constants::error_codes;

/// Messaging error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Connection pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("Connection pool is shut down")]
    PoolClosed,

    #[error("Broker connection error: {message}")]
    BrokerConnection { message: String },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("Message deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Broker publish error [{code}]: {description}")]
    BrokerPublish {
        code: String,
        description: String,
        /// Retrying cannot succeed (destination misconfigured, access refused)
        permanent: bool,
    },

    #[error("Network timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Invalid routing key {key:?}: {reason}")]
    InvalidRoutingKey { key: String, reason: String },
}

impl MessagingError {
    /// Create a pool exhausted error
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    /// Create a broker connection error
    pub fn broker_connection(message: impl Into<String>) -> Self {
        Self::BrokerConnection {
            message: message.into(),
        }
    }

    /// Create a message serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
        }
    }

    /// Create a broker publish error
    pub fn broker_publish(
        code: impl Into<String>,
        description: impl Into<String>,
        permanent: bool,
    ) -> Self {
        Self::BrokerPublish {
            code: code.into(),
            description: description.into(),
            permanent,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an invalid routing key error
    pub fn invalid_routing_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRoutingKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether a later attempt with the same envelope could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted { .. }
            | Self::PoolClosed
            | Self::BrokerConnection { .. }
            | Self::Timeout { .. } => true,
            Self::BrokerPublish { permanent, .. } => !permanent,
            Self::Serialization { .. }
            | Self::Deserialization { .. }
            | Self::InvalidRoutingKey { .. } => false,
        }
    }

    /// Stable code recorded in `OperateError`
    pub fn code(&self) -> &str {
        match self {
            Self::PoolExhausted { .. } => error_codes::POOL_EXHAUSTED,
            Self::PoolClosed => error_codes::POOL_CLOSED,
            Self::BrokerConnection { .. } => error_codes::BROKER_CONNECTION,
            Self::Serialization { .. } => error_codes::SERIALIZATION,
            Self::Deserialization { .. } => error_codes::DESERIALIZATION,
            Self::BrokerPublish { code, .. } => code,
            Self::Timeout { .. } => error_codes::PUBLISH_TIMEOUT,
            Self::InvalidRoutingKey { .. } => error_codes::INVALID_ROUTING_KEY,
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
