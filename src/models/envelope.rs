//! # Envelope Model
//!
//! One outbound unit of work: identity, routing key, payload and delivery
//! status. The application stores an envelope in the same local transaction
//! as its business data; the delivery pipeline then works on transient copies
//! loaded from storage.
//!
//! ## Lifecycle
//!
//! 1. **Scheduled**: created by the application, or rescheduled after a
//!    retryable failure (`next_attempt_at` set by the backoff policy)
//! 2. **Publishing**: in-memory marker while an attempt is in flight
//! 3. **Succeeded** / **Failed**: terminal, `expires_at` set for retention
//!
//! Status changes are only made by the state machine; `retries` never
//! decreases and `id` never changes after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::EnvelopeState;

/// Opaque, never reused envelope identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(String);

impl EnvelopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh UUID v4 based identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EnvelopeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EnvelopeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Outbound message with its delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    /// Routing/topic key used to address the broker destination
    pub key: String,
    /// Opaque payload produced by the application
    pub content: String,
    pub retries: u32,
    pub status: EnvelopeState,
    pub added_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When a scheduled envelope becomes due; `None` means due now
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Set once terminal so storage can prune the record
    pub expires_at: Option<DateTime<Utc>>,
    /// Description of the most recent failure only
    pub last_error: Option<String>,
}

impl Envelope {
    /// Create a scheduled envelope with a generated identifier
    pub fn new(key: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(EnvelopeId::generate(), key, content)
    }

    /// Create a scheduled envelope with a caller-assigned identifier
    pub fn with_id(
        id: impl Into<EnvelopeId>,
        key: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            content: content.into(),
            retries: 0,
            status: EnvelopeState::Scheduled,
            added_at: Utc::now(),
            last_attempt_at: None,
            next_attempt_at: None,
            expires_at: None,
            last_error: None,
        }
    }

    /// Scheduled and past its next attempt time
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EnvelopeState::Scheduled
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
