//! Processor Chain: the ordered, type-registered stages a message passes
//! through between a route's source and destination.

pub mod aggregate;
pub mod debug;
pub mod external;
pub mod filter;
pub mod transform;

use crate::config::ProcessorConfig;
use crate::error::{ConfigurationError, ProcessorBuildError, ProcessorError};
use crate::message::{ChainOutcome, Message};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One stage in a route's processor chain.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Transforms or filters one message.
    async fn process(&self, message: Message) -> Result<ChainOutcome, ProcessorError>;

    /// Releases any resources the processor holds. Stateful processors
    /// (notably Aggregate) may have buffered output still pending; if
    /// so, this returns it so the route can run it through whatever
    /// processors sit after this one and into the destination, the same
    /// "emit downstream" path a timer-fired flush would have used. The
    /// default is a no-op with nothing pending.
    async fn close(&self) -> Option<Message> {
        None
    }
}

/// Context a processor's constructor needs beyond its own config: its
/// position in the chain and the channel used to re-enter the pipeline
/// for asynchronously produced output (aggregate timer flushes).
#[derive(Clone)]
pub struct ProcessorContext {
    /// This processor's zero-based index in the chain.
    pub index: usize,
    /// Channel the route drains alongside its source, used to resume
    /// `apply_chain` at `index + 1` when a processor emits downstream of
    /// its own synchronous return.
    pub reinject: mpsc::UnboundedSender<(usize, Message)>,
    /// Time provider, so deferred flush timers are mockable in tests.
    pub time_provider: crate::time_provider::SharedTimeProvider,
}

/// Builds one processor from its config, dispatching on the
/// case-insensitive `type` field. Unknown types are a
/// [`ConfigurationError`], per spec §4.3.6/§7.
///
/// # Errors
/// Returns [`ProcessorBuildError::Configuration`] for an unrecognized
/// type, or [`ProcessorBuildError::Processor`] if the specific
/// constructor rejects its own fields.
pub fn create_processor(
    config: &ProcessorConfig,
    ctx: &ProcessorContext,
) -> Result<Arc<dyn Processor>, ProcessorBuildError> {
    match config.kind.to_lowercase().as_str() {
        "transform" => Ok(Arc::new(transform::TransformProcessor::from_config(config)?)),
        "filter" => Ok(Arc::new(filter::FilterProcessor::from_config(config)?)),
        "external" => Ok(Arc::new(external::ExternalProcessor::from_config(config)?)),
        "aggregate" => Ok(Arc::new(aggregate::AggregateProcessor::from_config(
            config, ctx,
        )?)),
        "debug" => Ok(Arc::new(debug::DebugProcessor::from_config(config)?)),
        other => Err(ConfigurationError::UnknownType {
            kind: "processor type",
            name: other.to_string(),
        }
        .into()),
    }
}
