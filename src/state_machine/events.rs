use serde::{Deserialize, Serialize};

use crate::constants::events;

/// Events that can trigger envelope state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EnvelopeEvent {
    /// Begin a publish attempt
    Start,
    /// Broker acknowledged the message
    Succeed,
    /// Attempt failed within the retry budget
    Reschedule(String),
    /// Attempt failed terminally
    Fail(String),
}

impl EnvelopeEvent {
    /// Get the event name recorded in the transition log
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => events::ENVELOPE_START,
            Self::Succeed => events::ENVELOPE_SUCCEED,
            Self::Reschedule(_) => events::ENVELOPE_RESCHEDULE,
            Self::Fail(_) => events::ENVELOPE_FAIL,
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Reschedule(msg) | Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::Fail(_))
    }
}
