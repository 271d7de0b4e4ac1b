//! # Connection Channel Pool
//!
//! Bounded pool of reusable broker channels shared by concurrent senders.
//!
//! A semaphore with `max_pool_size` permits bounds the rented channels; the
//! idle set is a lock-protected deque. A channel is created only when a permit
//! holder finds the idle set empty, so live channels (idle plus rented) never
//! exceed `max_pool_size`.
//!
//! ## Rent / return protocol
//!
//! 1. `rent()` acquires a permit (waiting up to `rent_timeout` or failing fast
//!    per [`RentPolicy`]), pops an open idle channel or creates a new one.
//! 2. The caller works through the returned [`RentedChannel`] guard.
//! 3. `return_channel()` puts a healthy channel back; when it answers `false`
//!    the caller destroys the channel with [`RentedChannel::destroy`].
//!
//! A guard dropped without either step discards its channel and frees its
//! slot, so no exit path leaks a channel or a permit.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use super::broker::{BrokerChannel, BrokerConnector, DestinationSpec, PublishProperties};
use super::errors::{MessagingError, MessagingResult};
use crate::config::{BrokerConfig, OutboxConfig, PoolConfig, RentPolicy};

/// Pool-assigned identity of a broker channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

struct PooledChannel {
    id: ChannelId,
    channel: Box<dyn BrokerChannel>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    rented: AtomicUsize,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_pool_size: usize,
    pub idle: usize,
    pub rented: usize,
    pub created_total: u64,
    pub destroyed_total: u64,
}

/// Bounded pool of broker channels
pub struct ConnectionChannelPool {
    connector: Arc<dyn BrokerConnector>,
    config: PoolConfig,
    broker: BrokerConfig,
    idle: Mutex<VecDeque<PooledChannel>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    next_id: AtomicU64,
    counters: Arc<PoolCounters>,
}

impl fmt::Debug for ConnectionChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionChannelPool")
            .field("host_address", &self.broker.host_address_redacted())
            .field("exchange", &self.broker.exchange_name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionChannelPool {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        config: PoolConfig,
        broker: BrokerConfig,
    ) -> Self {
        Self {
            connector,
            permits: Arc::new(Semaphore::new(config.max_pool_size)),
            config,
            broker,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn from_config(connector: Arc<dyn BrokerConnector>, config: &OutboxConfig) -> Self {
        Self::new(connector, config.pool.clone(), config.broker.clone())
    }

    /// Rent a channel, reusing an idle one when possible
    pub async fn rent(&self) -> MessagingResult<RentedChannel> {
        if self.is_closed() {
            return Err(MessagingError::PoolClosed);
        }

        let started = Instant::now();
        let permit = self.acquire_permit().await?;

        loop {
            // Guard released at end of statement; never held across an await
            let candidate = self.idle.lock().pop_back();
            match candidate {
                Some(pooled) if pooled.channel.is_open() => {
                    debug!(channel_id = %pooled.id, "♻️ Reusing idle channel");
                    return Ok(self.guard(pooled, permit));
                }
                Some(pooled) => {
                    debug!(channel_id = %pooled.id, "Discarding closed idle channel");
                    pooled.channel.close().await;
                    self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        let budget = self.connect_budget(started.elapsed());
        let connected = match tokio::time::timeout(budget, self.connector.connect()).await {
            Ok(connected) => connected,
            Err(_) => Err(MessagingError::broker_connection(format!(
                "broker did not open a channel within {}ms",
                budget.as_millis()
            ))),
        };

        let channel = match connected {
            Ok(channel) => channel,
            Err(e) => {
                warn!(
                    host = %self.broker.host_address_redacted(),
                    error = %e,
                    "Failed to open broker channel"
                );
                return Err(match e {
                    MessagingError::BrokerConnection { .. } => e,
                    other => MessagingError::broker_connection(other.to_string()),
                });
            }
        };

        let id = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        debug!(channel_id = %id, "🔌 Opened broker channel");

        Ok(self.guard(PooledChannel { id, channel }, permit))
    }

    /// Offer a rented channel back to the idle set
    ///
    /// Returns `false` when the channel is broken or closed, the pool is shut
    /// down or already holds `max_pool_size` idle channels. The guard then
    /// still owns the channel and the caller must destroy it.
    pub fn return_channel(&self, rented: &mut RentedChannel) -> bool {
        let Some(pooled) = rented.channel.take() else {
            return false;
        };

        if rented.broken || !pooled.channel.is_open() {
            rented.channel = Some(pooled);
            return false;
        }

        {
            let mut idle = self.idle.lock();
            if self.is_closed() || idle.len() >= self.config.max_pool_size {
                drop(idle);
                rented.channel = Some(pooled);
                return false;
            }
            debug!(channel_id = %pooled.id, "Channel returned to pool");
            idle.push_back(pooled);
        }

        // Slot is freed only after the channel is visible in the idle set
        rented.release_slot();
        true
    }

    /// Close idle channels and refuse further rents
    ///
    /// Rented channels stay with their holders; their returns are rejected.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();

        let drained: Vec<PooledChannel> = self.idle.lock().drain(..).collect();
        let count = drained.len();
        for pooled in drained {
            pooled.channel.close().await;
            self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            host = %self.broker.host_address_redacted(),
            closed_idle = count,
            rented = self.counters.rented.load(Ordering::Relaxed),
            "🛑 Connection channel pool shut down"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_pool_size: self.config.max_pool_size,
            idle: self.idle.lock().len(),
            rented: self.counters.rented.load(Ordering::Relaxed),
            created_total: self.counters.created.load(Ordering::Relaxed),
            destroyed_total: self.counters.destroyed.load(Ordering::Relaxed),
        }
    }

    /// Broker address with credentials removed
    pub fn host_address(&self) -> String {
        self.broker.host_address_redacted()
    }

    pub fn exchange(&self) -> &str {
        &self.broker.exchange_name
    }

    async fn acquire_permit(&self) -> MessagingResult<OwnedSemaphorePermit> {
        match self.config.rent_policy {
            RentPolicy::Block => {
                let timeout = self.config.rent_timeout();
                match tokio::time::timeout(timeout, self.permits.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(MessagingError::PoolClosed),
                    Err(_) => Err(MessagingError::pool_exhausted(format!(
                        "no channel available within {}ms (max_pool_size={})",
                        timeout.as_millis(),
                        self.config.max_pool_size
                    ))),
                }
            }
            RentPolicy::FailFast => match self.permits.clone().try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::Closed) => Err(MessagingError::PoolClosed),
                Err(TryAcquireError::NoPermits) => Err(MessagingError::pool_exhausted(format!(
                    "all {} channels are rented",
                    self.config.max_pool_size
                ))),
            },
        }
    }

    /// Time left for opening a channel once a permit is held
    ///
    /// Blocking rents share `rent_timeout` between the permit wait and the
    /// connect. Fail-fast rents with no rent timeout fall back to the publish
    /// timeout.
    fn connect_budget(&self, waited: Duration) -> Duration {
        let rent_timeout = self.config.rent_timeout();
        match self.config.rent_policy {
            RentPolicy::Block => rent_timeout.saturating_sub(waited),
            RentPolicy::FailFast if rent_timeout.is_zero() => self.broker.publish_timeout(),
            RentPolicy::FailFast => rent_timeout,
        }
    }

    fn guard(&self, pooled: PooledChannel, permit: OwnedSemaphorePermit) -> RentedChannel {
        self.counters.rented.fetch_add(1, Ordering::Relaxed);
        RentedChannel {
            id: pooled.id,
            channel: Some(pooled),
            permit: Some(permit),
            broken: false,
            counters: self.counters.clone(),
        }
    }
}

/// Exclusive handle to a rented channel
pub struct RentedChannel {
    id: ChannelId,
    channel: Option<PooledChannel>,
    permit: Option<OwnedSemaphorePermit>,
    broken: bool,
    counters: Arc<PoolCounters>,
}

impl fmt::Debug for RentedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RentedChannel")
            .field("id", &self.id)
            .field("held", &self.channel.is_some())
            .field("broken", &self.broken)
            .finish()
    }
}

impl RentedChannel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Flag the channel as compromised; the pool will refuse it back
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Open and still held by this guard
    pub fn is_open(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|pooled| pooled.channel.is_open())
    }

    pub async fn declare_destination(&self, spec: &DestinationSpec) -> MessagingResult<()> {
        self.inner()?.declare_destination(spec).await
    }

    pub async fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        properties: &PublishProperties,
        body: &[u8],
    ) -> MessagingResult<()> {
        self.inner()?
            .publish(destination, routing_key, properties, body)
            .await
    }

    /// Close the channel and free its pool slot
    pub async fn destroy(mut self) {
        if let Some(pooled) = self.channel.take() {
            pooled.channel.close().await;
            self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
            debug!(channel_id = %pooled.id, "💥 Destroyed broker channel");
        }
        self.release_slot();
    }

    fn inner(&self) -> MessagingResult<&dyn BrokerChannel> {
        self.channel
            .as_ref()
            .map(|pooled| pooled.channel.as_ref())
            .ok_or_else(|| {
                MessagingError::broker_connection(format!(
                    "channel {} was already released",
                    self.id
                ))
            })
    }

    fn release_slot(&mut self) {
        if self.permit.take().is_some() {
            self.counters.rented.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl Drop for RentedChannel {
    fn drop(&mut self) {
        if let Some(pooled) = self.channel.take() {
            warn!(
                channel_id = %pooled.id,
                "Rented channel dropped without return; discarding"
            );
            self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { pooled.channel.close().await });
            }
        }
        self.release_slot();
    }
}
