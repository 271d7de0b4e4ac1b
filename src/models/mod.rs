pub mod envelope;

// Re-export core models for easy access
pub use envelope::{Envelope, EnvelopeId};
