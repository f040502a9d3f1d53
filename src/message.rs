//! The unit of data that flows through a route.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message moving through a route's pipeline.
///
/// `body` is the payload a processor or connector interprets; `metadata`
/// carries out-of-band fields (timestamps, source identifiers, retry
/// counters) that processors may read or add to without touching the
/// body itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// The message payload.
    pub body: serde_json::Value,
    /// Out-of-band fields attached by sources, processors, or the route
    /// supervisor itself.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Builds a message with no metadata.
    #[must_use]
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            body,
            metadata: HashMap::new(),
        }
    }

    /// Returns the named metadata field, if present.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Sets a metadata field, returning the message for chaining.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The result of running a message through one link of the processor
/// chain: either it continues forward, possibly changed, or it is
/// dropped and the rest of the chain is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// The message continues to the next processor (or the destination).
    Forward(Message),
    /// The message is discarded; nothing downstream sees it.
    Drop,
}

impl ChainOutcome {
    /// Returns the forwarded message, if any.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        match self {
            ChainOutcome::Forward(message) => Some(message),
            ChainOutcome::Drop => None,
        }
    }
}
