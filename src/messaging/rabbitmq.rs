//! # RabbitMQ Broker Connector
//!
//! `BrokerConnector` over AMQP 0.9.1 using the `lapin` crate. Enabled with the
//! `rabbitmq` cargo feature.
//!
//! One AMQP connection is shared by every pooled channel and re-established
//! when the broker drops it. Each pooled channel is its own AMQP channel with
//! publisher confirms enabled, so `publish` resolves only once the broker has
//! acknowledged the message.
//!
//! ```ignore
//! use std::sync::Arc;
//! use outbox_core::config::OutboxConfig;
//! use outbox_core::messaging::{ConnectionChannelPool, RabbitMqConnector};
//!
//! let config = OutboxConfig::default();
//! let connector = RabbitMqConnector::new(&config.broker);
//! let pool = ConnectionChannelPool::from_config(Arc::new(connector), &config);
//! ```

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::broker::{BrokerChannel, BrokerConnector, DestinationSpec, PublishProperties};
use super::errors::{MessagingError, MessagingResult};
use crate::config::{BrokerConfig, DestinationKind};
use crate::constants::error_codes;

/// Reply codes after which a retry with the same message cannot succeed

/// Opens confirm-mode channels on a shared RabbitMQ connection
pub struct RabbitMqConnector {
    config: BrokerConfig,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RabbitMqConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqConnector")
            .field("host_address", &self.config.host_address_redacted())
            .field("connection_name", &self.config.connection_name)
            .finish()
    }
}

impl RabbitMqConnector {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            config: config.clone(),
            connection: Mutex::new(None),
        }
    }

    async fn open_channel(&self) -> MessagingResult<Channel> {
        let mut connection = self.connection.lock().await;

        let reusable = connection
            .as_ref()
            .is_some_and(|conn| conn.status().connected());
        if !reusable {
            let conn = Connection::connect(
                &self.config.host_address,
                ConnectionProperties::default()
                    .with_connection_name(self.config.connection_name.clone().into()),
            )
            .await
            .map_err(|e| {
                MessagingError::broker_connection(format!("RabbitMQ connection failed: {e}"))
            })?;
            info!(
                host = %self.config.host_address_redacted(),
                "🐇 Connected to RabbitMQ"
            );
            *connection = Some(conn);
        }

        let conn = connection.as_ref().ok_or_else(|| {
            MessagingError::broker_connection("RabbitMQ connection unavailable")
        })?;
        conn.create_channel().await.map_err(|e| {
            MessagingError::broker_connection(format!("RabbitMQ channel creation failed: {e}"))
        })
    }
}

#[async_trait]
impl BrokerConnector for RabbitMqConnector {
    async fn connect(&self) -> MessagingResult<Box<dyn BrokerChannel>> {
        let channel = self.open_channel().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                MessagingError::broker_connection(format!("Failed to enable publisher confirms: {e}"))
            })?;

        debug!(channel = channel.id(), "Opened RabbitMQ channel");
        Ok(Box::new(RabbitMqChannel { channel }))
    }

    fn host_address(&self) -> String {
        self.config.host_address_redacted()
    }
}

struct RabbitMqChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for RabbitMqChannel {
    async fn declare_destination(&self, spec: &DestinationSpec) -> MessagingResult<()> {
        self.channel
            .exchange_declare(
                &spec.name,
                exchange_kind(spec.kind),
                ExchangeDeclareOptions {
                    durable: spec.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify(&format!("Exchange declare failed for '{}'", spec.name), &e))
    }

    async fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        properties: &PublishProperties,
        body: &[u8],
    ) -> MessagingResult<()> {
        let amqp_properties = BasicProperties::default()
            .with_delivery_mode(properties.delivery_mode)
            .with_content_type(properties.content_type.clone().into())
            .with_message_id(properties.message_id.clone().into())
            .with_timestamp(properties.timestamp.timestamp().max(0) as u64);

        let confirm = self
            .channel
            .basic_publish(
                destination,
                routing_key,
                BasicPublishOptions::default(),
                body,
                amqp_properties,
            )
            .await
            .map_err(|e| classify("Publish failed", &e))?;

        // Wait for confirmation
        let confirmation = confirm
            .await
            .map_err(|e| classify("Publish confirmation failed", &e))?;

        match confirmation {
            Confirmation::Nack(_) => Err(MessagingError::broker_publish(
                error_codes::BROKER_PUBLISH,
                format!("Broker rejected message for '{routing_key}'"),
                false,
            )),
            _ => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn close(&self) {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "channel discarded").await {
                debug!(error = %e, "Error closing RabbitMQ channel");
            }
        }
    }
}

fn exchange_kind(kind: DestinationKind) -> ExchangeKind {
    match kind {
        DestinationKind::Direct => ExchangeKind::Direct,
        DestinationKind::Fanout => ExchangeKind::Fanout,
        DestinationKind::Topic => ExchangeKind::Topic,
        DestinationKind::Headers => ExchangeKind::Headers,
    }
}

/// Map a lapin error to a broker publish error
///
/// NOT_FOUND, ACCESS_REFUSED and PRECONDITION_FAILED replies are permanent;
/// any other failure is retryable.
fn classify(context: &str, err: &lapin::Error) -> MessagingError {
    let description = format!("{context}: {err}");
    match err {
        lapin::Error::ProtocolError(amqp) => match amqp.kind() {
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => {
                MessagingError::broker_publish("NOT_FOUND", description, true)
            }
            AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED) => {
                MessagingError::broker_publish("ACCESS_REFUSED", description, true)
            }
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                MessagingError::broker_publish("PRECONDITION_FAILED", description, true)
            }
            _ => MessagingError::broker_publish(error_codes::BROKER_PUBLISH, description, false),
        },
        _ => MessagingError::broker_publish(error_codes::BROKER_PUBLISH, description, false),
    }
}
