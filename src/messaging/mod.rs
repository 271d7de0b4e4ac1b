//! # Messaging Module
//!
//! Broker-facing half of the delivery core: the connection channel pool, the
//! content packer and the publish sender that performs one delivery attempt
//! and reports it as an [`OperateResult`].

pub mod broker;
pub mod errors;
pub mod in_memory;
pub mod operate_result;
pub mod packer;
pub mod pool;
#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;
pub mod sender;

pub use broker::{BrokerChannel, BrokerConnector, DestinationSpec, PublishProperties};
pub use errors::{MessagingError, MessagingResult};
pub use in_memory::{InMemoryBroker, InMemoryConnector, PublishedMessage};
pub use operate_result::{FailureDisposition, OperateError, OperateResult};
pub use packer::{ContentSerializer, DefaultMessagePacker, JsonContentSerializer, MessagePacker};
pub use pool::{ChannelId, ConnectionChannelPool, PoolStats, RentedChannel};
#[cfg(feature = "rabbitmq")]
pub use rabbitmq::RabbitMqConnector;
pub use sender::{validate_routing_key, PublishMessageSender};
