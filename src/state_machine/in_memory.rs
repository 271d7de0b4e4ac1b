//! # In-Memory Storage Connection
//!
//! Thread-safe `StorageConnection` for tests, development and hosts that keep
//! their outbox in process. Keeps the append-only transition log per envelope
//! and can replay it to reconstruct the durable state.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use super::errors::{PersistenceError, PersistenceResult};
use super::persistence::{StatusUpdate, StorageConnection, TransitionRecord};
use super::states::EnvelopeState;
use crate::models::{Envelope, EnvelopeId};

/// Durable state reconstructed from the transition log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedState {
    pub status: EnvelopeState,
    pub retries: u32,
    pub last_error: Option<String>,
    pub transitions: usize,
}

/// Transition with its storage-assigned ordering key
#[derive(Debug, Clone)]
struct StoredTransition {
    sort_key: u32,
    record: TransitionRecord,
}

/// In-memory storage keyed by envelope id
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    envelopes: DashMap<EnvelopeId, Envelope>,
    transitions: DashMap<EnvelopeId, Vec<StoredTransition>>,
    /// Number of upcoming `save_status` calls that fail
    injected_save_failures: AtomicU32,
    injected_load_failures: AtomicU32,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new envelope, as the application transaction would
    pub fn store(&self, envelope: Envelope) -> PersistenceResult<()> {
        match self.envelopes.entry(envelope.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(PersistenceError::DuplicateEnvelope {
                envelope_id: envelope.id.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(envelope);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &EnvelopeId) -> Option<Envelope> {
        self.envelopes.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Envelopes currently in `status`
    pub fn with_status(&self, status: EnvelopeState) -> Vec<Envelope> {
        self.envelopes
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Transition log for an envelope in sort-key order
    pub fn transitions(&self, id: &EnvelopeId) -> Vec<TransitionRecord> {
        self.transitions
            .get(id)
            .map(|log| log.iter().map(|t| t.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Make the next `count` saves fail with `PersistenceError::Unavailable`
    pub fn fail_next_saves(&self, count: u32) {
        self.injected_save_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` loads fail with `PersistenceError::LoadFailed`
    pub fn fail_next_loads(&self, count: u32) {
        self.injected_load_failures.store(count, Ordering::SeqCst);
    }

    /// Rebuild the durable state of an envelope from its transition log
    ///
    /// Every record must start from the state the previous one ended in;
    /// `publishing` is accepted wherever `scheduled` is expected since it is
    /// never durable.
    pub fn replay(&self, id: &EnvelopeId) -> PersistenceResult<ReplayedState> {
        if !self.envelopes.contains_key(id) {
            return Err(PersistenceError::EnvelopeNotFound {
                envelope_id: id.to_string(),
            });
        }

        let mut state = ReplayedState {
            status: EnvelopeState::Scheduled,
            retries: 0,
            last_error: None,
            transitions: 0,
        };

        if let Some(log) = self.transitions.get(id) {
            for stored in log.iter() {
                let from = match stored.record.from_state {
                    EnvelopeState::Publishing => EnvelopeState::Scheduled,
                    other => other,
                };
                if from != state.status || stored.record.retries < state.retries {
                    return Err(PersistenceError::CorruptTransitionLog {
                        envelope_id: id.to_string(),
                        sort_key: stored.sort_key,
                    });
                }
                state.status = stored.record.to_state;
                state.retries = stored.record.retries;
                state.last_error = stored.record.error.clone();
                state.transitions += 1;
            }
        }

        Ok(state)
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl StorageConnection for InMemoryStorage {
    async fn load_due_envelopes(&self) -> PersistenceResult<Vec<Envelope>> {
        if Self::take_injected_failure(&self.injected_load_failures) {
            return Err(PersistenceError::LoadFailed {
                reason: "injected load failure".to_string(),
            });
        }

        let now = Utc::now();
        let mut due: Vec<Envelope> = self
            .envelopes
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect();

        due.sort_by_key(|envelope| (envelope.next_attempt_at.unwrap_or(envelope.added_at), envelope.added_at));

        debug!(count = due.len(), "📥 Loaded due envelopes");
        Ok(due)
    }

    async fn save_status(&self, update: &StatusUpdate) -> PersistenceResult<()> {
        let envelope_id = update.envelope_id.to_string();

        if Self::take_injected_failure(&self.injected_save_failures) {
            return Err(PersistenceError::Unavailable {
                reason: "injected save failure".to_string(),
            });
        }

        if !update.status.is_durable() {
            return Err(PersistenceError::StatusSaveFailed {
                envelope_id,
                reason: format!("{} is not a durable status", update.status),
            });
        }

        let mut stored = self
            .envelopes
            .get_mut(&update.envelope_id)
            .ok_or_else(|| PersistenceError::EnvelopeNotFound {
                envelope_id: envelope_id.clone(),
            })?;

        if stored.status.is_terminal() || update.retries < stored.retries {
            return Err(PersistenceError::ConcurrentModification { envelope_id });
        }

        update.apply_to(stored.value_mut());

        // Row guard is still held, so the log append is atomic with the row write
        let mut log = self
            .transitions
            .entry(update.envelope_id.clone())
            .or_default();
        let sort_key = log.len() as u32 + 1;
        log.push(StoredTransition {
            sort_key,
            record: update.transition.clone(),
        });

        debug!(
            envelope_id = %update.envelope_id,
            status = %update.status,
            retries = update.retries,
            sort_key = sort_key,
            "💾 Envelope status saved"
        );
        Ok(())
    }
}
