use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::MessagingError;

/// Whether a failed attempt may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    Retryable,
    Terminal,
}

/// Failure detail of a delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperateError {
    pub code: String,
    pub description: String,
    pub disposition: FailureDisposition,
}

impl OperateError {
    pub fn retryable(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            disposition: FailureDisposition::Retryable,
        }
    }

    pub fn terminal(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            disposition: FailureDisposition::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition == FailureDisposition::Retryable
    }
}

impl fmt::Display for OperateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.description)
    }
}

impl From<MessagingError> for OperateError {
    fn from(err: MessagingError) -> Self {
        let disposition = if err.is_retryable() {
            FailureDisposition::Retryable
        } else {
            FailureDisposition::Terminal
        };
        let description = match &err {
            MessagingError::BrokerPublish { description, .. } => description.clone(),
            other => other.to_string(),
        };
        Self {
            code: err.code().to_string(),
            description,
            disposition,
        }
    }
}

/// Outcome of one delivery attempt: success, or a failure with its error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum OperateResult {
    Success,
    Failed(OperateError),
}

impl OperateResult {
    pub fn failed(error: OperateError) -> Self {
        Self::Failed(error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn error(&self) -> Option<&OperateError> {
        match self {
            Self::Success => None,
            Self::Failed(error) => Some(error),
        }
    }
}

impl From<MessagingError> for OperateResult {
    fn from(err: MessagingError) -> Self {
        Self::Failed(err.into())
    }
}
