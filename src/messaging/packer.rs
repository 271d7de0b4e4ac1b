//! # Content Packer
//!
//! Turns an envelope into the transport string handed to the broker and back.
//! The wire format is whatever the configured [`ContentSerializer`] produces;
//! the default is JSON via serde_json.

use serde::{de::DeserializeOwned, Serialize};
use tracing::error;

use super::errors::{MessagingError, MessagingResult};
use crate::models::Envelope;

/// Object serialization contract used by the packer
pub trait ContentSerializer: Send + Sync {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> MessagingResult<String>;

    fn deserialize<T: DeserializeOwned>(&self, content: &str) -> MessagingResult<T>;
}

/// JSON serializer backed by serde_json
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonContentSerializer;

impl ContentSerializer for JsonContentSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> MessagingResult<String> {
        serde_json::to_string(value).map_err(|e| MessagingError::serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, content: &str) -> MessagingResult<T> {
        serde_json::from_str(content).map_err(|e| MessagingError::deserialization(e.to_string()))
    }
}

/// Envelope packing contract
///
/// Implementations must satisfy `unpack(&pack(e)?)? == e`.
pub trait MessagePacker: Send + Sync {
    fn pack(&self, envelope: &Envelope) -> MessagingResult<String>;

    fn unpack(&self, content: &str) -> MessagingResult<Envelope>;
}

/// Packer that serializes the whole envelope with a `ContentSerializer`
#[derive(Debug, Clone)]
pub struct DefaultMessagePacker<S = JsonContentSerializer> {
    serializer: S,
}

impl Default for DefaultMessagePacker<JsonContentSerializer> {
    fn default() -> Self {
        Self::new(JsonContentSerializer)
    }
}

impl<S: ContentSerializer> DefaultMessagePacker<S> {
    pub fn new(serializer: S) -> Self {
        Self { serializer }
    }
}

impl<S: ContentSerializer> MessagePacker for DefaultMessagePacker<S> {
    fn pack(&self, envelope: &Envelope) -> MessagingResult<String> {
        self.serializer.serialize(envelope)
    }

    fn unpack(&self, content: &str) -> MessagingResult<Envelope> {
        self.serializer.deserialize(content).inspect_err(|e| {
            // A stored record that cannot be decoded is corrupt, not transient
            error!(
                error = %e,
                content_length = content.len(),
                "Failed to unpack envelope content"
            );
        })
    }
}
