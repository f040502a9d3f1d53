//! Debug processor: logs a message and passes it through unchanged.
//! Useful for inspecting a chain's intermediate state without altering it.

use super::Processor;
use crate::config::ProcessorConfig;
use crate::error::ProcessorError;
use crate::message::{ChainOutcome, Message};
use async_trait::async_trait;

/// Logs each message at `info` level under `prefix`, then forwards it.
pub struct DebugProcessor {
    prefix: String,
}

impl DebugProcessor {
    /// Builds a processor from its config. `prefix` defaults to `"DEBUG"`.
    ///
    /// # Errors
    /// Never fails; present for signature consistency with the other
    /// processor constructors.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ProcessorError> {
        let prefix = config.get_str("prefix").unwrap_or_else(|| "DEBUG".to_string());
        Ok(Self { prefix })
    }
}

#[async_trait]
impl Processor for DebugProcessor {
    async fn process(&self, message: Message) -> Result<ChainOutcome, ProcessorError> {
        tracing::info!(prefix = %self.prefix, body = %message.body, metadata = ?message.metadata, "debug");
        Ok(ChainOutcome::Forward(message))
    }
}
