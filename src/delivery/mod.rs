//! # Delivery
//!
//! Per-envelope send cycle: mark the envelope publishing, run one attempt
//! through the [`PublishMessageSender`](crate::messaging::PublishMessageSender)
//! and hand the outcome to the [`StateChanger`](crate::state_machine::StateChanger).

pub mod processor;

pub use processor::{DeliveryProcessor, DeliveryReport};
