// Envelope state machine
//
// Scheduled -> Publishing -> Succeeded | Scheduled (retry) | Failed.
// Publishing lives in memory only; every durable change goes through the
// StorageConnection together with its transition record.

pub mod backoff;
pub mod errors;
pub mod events;
pub mod in_memory;
pub mod persistence;
pub mod state_changer;
pub mod states;

// Re-export main types for convenient access
pub use backoff::BackoffCalculator;
pub use errors::{PersistenceError, PersistenceResult, StateMachineError, StateMachineResult};
pub use events::EnvelopeEvent;
pub use in_memory::{InMemoryStorage, ReplayedState};
pub use persistence::{StatusUpdate, StorageConnection, TransitionRecord};
pub use state_changer::{determine_target_state, FailedThresholdCallback, StateChanger};
pub use states::EnvelopeState;
