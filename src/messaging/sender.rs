use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::broker::{DestinationSpec, PublishProperties};
use super::errors::{MessagingError, MessagingResult};
use super::operate_result::OperateResult;
use super::packer::MessagePacker;
use super::pool::{ConnectionChannelPool, RentedChannel};
use crate::config::OutboxConfig;
use crate::constants::broker::MAX_ROUTING_KEY_BYTES;
use crate::models::Envelope;

/// Performs single delivery attempts over pooled broker channels
///
/// Stateless across calls; every outcome comes back as an [`OperateResult`]
/// and the rented channel is returned or destroyed before `publish` returns.
#[derive(Clone)]
pub struct PublishMessageSender {
    pool: Arc<ConnectionChannelPool>,
    packer: Arc<dyn MessagePacker>,
    destination: DestinationSpec,
    publish_timeout: Duration,
}

impl std::fmt::Debug for PublishMessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishMessageSender")
            .field("pool", &self.pool)
            .field("destination", &self.destination)
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}

impl PublishMessageSender {
    pub fn new(
        pool: Arc<ConnectionChannelPool>,
        packer: Arc<dyn MessagePacker>,
        config: &OutboxConfig,
    ) -> Self {
        Self {
            pool,
            packer,
            destination: DestinationSpec::from_config(&config.broker),
            publish_timeout: config.broker.publish_timeout(),
        }
    }

    /// Broker address this sender publishes to, credentials removed
    pub fn servers_address(&self) -> String {
        self.pool.host_address()
    }

    pub fn destination(&self) -> &DestinationSpec {
        &self.destination
    }

    /// Run one delivery attempt for `envelope`
    pub async fn publish(&self, envelope: &Envelope) -> OperateResult {
        if let Err(e) = validate_routing_key(&envelope.key) {
            warn!(envelope_id = %envelope.id, error = %e, "Rejecting envelope with invalid routing key");
            return e.into();
        }

        let mut channel = match self.pool.rent().await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(envelope_id = %envelope.id, error = %e, "No channel for delivery attempt");
                return e.into();
            }
        };

        let body = match self.packer.pack(envelope) {
            Ok(body) => body,
            Err(e) => {
                self.release(channel).await;
                return e.into();
            }
        };

        match self.deliver(&channel, envelope, body.as_bytes()).await {
            Ok(()) => {
                debug!(
                    envelope_id = %envelope.id,
                    routing_key = %envelope.key,
                    channel_id = %channel.id(),
                    exchange = %self.destination.name,
                    "📤 Message published"
                );
                self.release(channel).await;
                OperateResult::Success
            }
            Err(e) => {
                warn!(
                    envelope_id = %envelope.id,
                    routing_key = %envelope.key,
                    channel_id = %channel.id(),
                    error = %e,
                    "Publish failed; discarding channel"
                );
                channel.mark_broken();
                self.release(channel).await;
                e.into()
            }
        }
    }

    async fn deliver(
        &self,
        channel: &RentedChannel,
        envelope: &Envelope,
        body: &[u8],
    ) -> MessagingResult<()> {
        let attempt = async {
            channel.declare_destination(&self.destination).await?;
            let properties = PublishProperties::persistent(envelope.id.as_str());
            channel
                .publish(&self.destination.name, &envelope.key, &properties, body)
                .await
        };

        match tokio::time::timeout(self.publish_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(MessagingError::timeout(
                "publish",
                self.publish_timeout.as_millis() as u64,
            )),
        }
    }

    /// Hand the channel back, destroying it when the pool refuses it
    async fn release(&self, mut channel: RentedChannel) {
        if !self.pool.return_channel(&mut channel) {
            channel.destroy().await;
        }
    }
}

/// AMQP-safe routing key: non-empty, at most 255 bytes, no whitespace or
/// control characters
pub fn validate_routing_key(key: &str) -> MessagingResult<()> {
    if key.is_empty() {
        return Err(MessagingError::invalid_routing_key(key, "routing key is empty"));
    }
    if key.len() > MAX_ROUTING_KEY_BYTES {
        return Err(MessagingError::invalid_routing_key(
            key,
            format!(
                "routing key is {} bytes, limit is {MAX_ROUTING_KEY_BYTES}",
                key.len()
            ),
        ));
    }
    if let Some(c) = key.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(MessagingError::invalid_routing_key(
            key,
            format!("routing key contains forbidden character {c:?}"),
        ));
    }
    Ok(())
}
