#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Outbox Core
//!
//! Reliable outbound-message delivery core for a transactional outbox.
//!
//! ## Overview
//!
//! An application stores each outbound message as an [`Envelope`] in the same
//! local transaction as its business data. This crate is the pipeline that
//! takes those envelopes to a message broker and records what happened, so a
//! message is never silently lost:
//!
//! - a bounded pool of reusable broker channels that never leaks a channel
//!   under failure,
//! - a publish sender that performs one delivery attempt and classifies it as
//!   an [`OperateResult`], and
//! - a state machine that schedules retries with backoff, marks envelopes
//!   succeeded or failed and persists every change with a transition record.
//!
//! Delivery is at-least-once; consumers are expected to be idempotent.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Channel pool, content packer, publish sender, broker traits
//! - [`state_machine`] - Envelope states, state changer, storage contract
//! - [`delivery`] - Send cycle and bounded-concurrency due pass
//! - [`models`] - Envelope model
//! - [`config`] - Configuration loading and validation
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use outbox_core::config::OutboxConfig;
//! use outbox_core::delivery::DeliveryProcessor;
//! use outbox_core::messaging::{
//!     ConnectionChannelPool, DefaultMessagePacker, InMemoryBroker, PublishMessageSender,
//! };
//! use outbox_core::state_machine::{InMemoryStorage, StateChanger};
//! use outbox_core::Envelope;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OutboxConfig::default();
//! let broker = InMemoryBroker::new();
//! let storage = Arc::new(InMemoryStorage::new());
//!
//! let pool = Arc::new(ConnectionChannelPool::from_config(
//!     Arc::new(broker.connector()),
//!     &config,
//! ));
//! let sender = PublishMessageSender::new(pool, Arc::new(DefaultMessagePacker::default()), &config);
//! let changer = StateChanger::new(storage.clone(), &config);
//! let processor = DeliveryProcessor::new(sender, changer, storage.clone(), &config);
//!
//! storage.store(Envelope::new("order.created", r#"{"order_id":42}"#))?;
//! let report = processor.process_due().await?;
//! assert_eq!(report.succeeded, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod state_machine;

pub use config::{ConfigManager, ConfigurationError, OutboxConfig};
pub use delivery::{DeliveryProcessor, DeliveryReport};
pub use error::{OutboxError, Result};
pub use logging::init_structured_logging;
pub use messaging::{
    ConnectionChannelPool, MessagePacker, MessagingError, OperateError, OperateResult,
    PublishMessageSender,
};
pub use models::{Envelope, EnvelopeId};
pub use state_machine::{EnvelopeState, StateChanger, StorageConnection};
