//! # In-Memory Broker
//!
//! Thread-safe broker for testing and development. Records declared
//! destinations and published messages, and lets tests inject connect and
//! publish failures or slow publishes.
//!
//! ```rust
//! use std::sync::Arc;
//! use outbox_core::config::OutboxConfig;
//! use outbox_core::messaging::{ConnectionChannelPool, InMemoryBroker};
//!
//! let broker = InMemoryBroker::new();
//! let pool = ConnectionChannelPool::from_config(
//!     Arc::new(broker.connector()),
//!     &OutboxConfig::default(),
//! );
//! assert_eq!(pool.stats().idle, 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::broker::{BrokerChannel, BrokerConnector, DestinationSpec, PublishProperties};
use super::errors::{MessagingError, MessagingResult};

/// Message accepted by the in-memory broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub destination: String,
    pub routing_key: String,
    pub properties: PublishProperties,
    pub body: Vec<u8>,
    /// Broker-side id of the channel that published it
    pub channel: u64,
}

impl PublishedMessage {
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    destinations: Mutex<HashMap<String, DestinationSpec>>,
    published: Mutex<Vec<PublishedMessage>>,
    publish_failures: Mutex<VecDeque<MessagingError>>,
    publish_delay: Mutex<Option<Duration>>,
    connect_failures: AtomicU32,
    /// Bumped to sever every channel opened before it
    generation: AtomicU64,
    next_channel: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Shared in-memory broker
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector opening channels on this broker
    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            state: self.state.clone(),
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().clone()
    }

    pub fn published_count(&self) -> usize {
        self.state.published.lock().len()
    }

    pub fn destination(&self, name: &str) -> Option<DestinationSpec> {
        self.state.destinations.lock().get(name).cloned()
    }

    /// Fail the next publish with `error`; queued failures are used in order
    pub fn fail_next_publish(&self, error: MessagingError) {
        self.state.publish_failures.lock().push_back(error);
    }

    /// Make the next `count` connects fail with a connection error
    pub fn fail_next_connects(&self, count: u32) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every publish, e.g. to exercise publish timeouts
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.state.publish_delay.lock() = delay;
    }

    /// Sever every open channel, as a broker restart would
    pub fn close_all_channels(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn channels_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Channels closed through `BrokerChannel::close`
    pub fn channels_closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

/// `BrokerConnector` for an [`InMemoryBroker`]
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    state: Arc<BrokerState>,
}

#[async_trait]
impl BrokerConnector for InMemoryConnector {
    async fn connect(&self) -> MessagingResult<Box<dyn BrokerChannel>> {
        let refused = self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(MessagingError::broker_connection(
                "connection refused by in-memory broker",
            ));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryChannel {
            id: self.state.next_channel.fetch_add(1, Ordering::SeqCst) + 1,
            generation: self.state.generation.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
            state: self.state.clone(),
        }))
    }

    fn host_address(&self) -> String {
        "memory://localhost".to_string()
    }
}

#[derive(Debug)]
struct InMemoryChannel {
    id: u64,
    generation: u64,
    closed: AtomicBool,
    state: Arc<BrokerState>,
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_destination(&self, spec: &DestinationSpec) -> MessagingResult<()> {
        if !self.is_open() {
            return Err(channel_closed());
        }

        let mut destinations = self.state.destinations.lock();
        match destinations.get(&spec.name) {
            Some(existing) if existing != spec => Err(MessagingError::broker_publish(
                "PRECONDITION_FAILED",
                format!(
                    "inequivalent arg for exchange '{}': declared as {} durable={}",
                    spec.name,
                    existing.kind.as_str(),
                    existing.durable
                ),
                true,
            )),
            Some(_) => Ok(()),
            None => {
                destinations.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
        }
    }

    async fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        properties: &PublishProperties,
        body: &[u8],
    ) -> MessagingResult<()> {
        let delay = *self.state.publish_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.is_open() {
            return Err(channel_closed());
        }

        let injected = self.state.publish_failures.lock().pop_front();
        if let Some(error) = injected {
            return Err(error);
        }

        if !self.state.destinations.lock().contains_key(destination) {
            return Err(MessagingError::broker_publish(
                "NOT_FOUND",
                format!("no exchange '{destination}'"),
                true,
            ));
        }

        self.state.published.lock().push(PublishedMessage {
            destination: destination.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: body.to_vec(),
            channel: self.id,
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.generation == self.state.generation.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn channel_closed() -> MessagingError {
    MessagingError::broker_publish("CHANNEL_ERROR", "channel is closed", false)
}
