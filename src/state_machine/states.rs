use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope delivery states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    /// Not yet attempted, or failed and waiting for its next attempt
    #[default]
    Scheduled,
    /// Attempt in flight; held in memory only, never persisted
    Publishing,
    /// Broker accepted the message
    Succeeded,
    /// Retry budget exhausted or failure classified as permanent
    Failed,
}

impl EnvelopeState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether storage may record this state
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Publishing)
    }
}

impl fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Publishing => write!(f, "publishing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for EnvelopeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "publishing" => Ok(Self::Publishing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid envelope state: {s}")),
        }
    }
}
