//! # Broker Client Traits
//!
//! The operations the delivery core needs from a message broker. A
//! [`BrokerConnector`] opens channels; a [`BrokerChannel`] declares
//! destinations and publishes. Implementations: the in-memory broker in this
//! crate and the RabbitMQ connector behind the `rabbitmq` feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::MessagingResult;
use crate::config::{BrokerConfig, DestinationKind};
use crate::constants::broker::{CONTENT_TYPE_JSON, PERSISTENT_DELIVERY_MODE};

/// Destination (exchange) declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationSpec {
    pub name: String,
    pub kind: DestinationKind,
    pub durable: bool,
}

impl DestinationSpec {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            name: config.exchange_name.clone(),
            kind: config.exchange_kind,
            durable: config.destination_durable,
        }
    }
}

/// Per-message publish properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishProperties {
    /// 2 asks the broker to persist the message
    pub delivery_mode: u8,
    pub content_type: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

impl PublishProperties {
    /// Persistent JSON message identified by `message_id`
    pub fn persistent(message_id: impl Into<String>) -> Self {
        Self {
            delivery_mode: PERSISTENT_DELIVERY_MODE,
            content_type: CONTENT_TYPE_JSON.to_string(),
            message_id: message_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One live broker channel
///
/// Errors are `MessagingError::BrokerPublish` with `permanent` set when a
/// retry cannot succeed.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare the destination; idempotent
    async fn declare_destination(&self, spec: &DestinationSpec) -> MessagingResult<()>;

    /// Publish and wait for the broker to acknowledge
    async fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        properties: &PublishProperties,
        body: &[u8],
    ) -> MessagingResult<()>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// Opens broker channels for the pool
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> MessagingResult<Box<dyn BrokerChannel>>;

    fn host_address(&self) -> String;
}
