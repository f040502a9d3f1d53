//! Aggregate processor: buffers messages up to a size or time bound,
//! then emits a single summarized message downstream.
//!
//! The buffer (spec §3 `AggregateBuffer`) is the hardest piece of the
//! processor chain: its flush can fire from two independent paths — the
//! synchronous `process` call when `max_size` is reached, and a
//! single-shot deferred timer when `timeout` elapses first — and both
//! paths share one "emit downstream" mechanism so a timer-fired flush
//! still reaches any processor after this one and the destination. The
//! timer is a `tokio::task::JoinHandle` holding a weak self-reference
//! (`Arc::new_cyclic`), cancelled with `abort` exactly the way the
//! message-routing component family spawns and aborts its own worker
//! tasks.

use super::{Processor, ProcessorContext};
use crate::config::ProcessorConfig;
use crate::domain_types::AggregateMaxSize;
use crate::duration::parse_duration_spec;
use crate::error::ProcessorError;
use crate::message::{ChainOutcome, Message};
use crate::time_provider::SharedTimeProvider;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Mutex};

/// How buffered items are combined into one emitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Collect,
    Sum,
    Average,
    Count,
}

impl Strategy {
    fn parse(name: &str) -> Result<Self, ProcessorError> {
        match name.to_lowercase().as_str() {
            "collect" => Ok(Strategy::Collect),
            "sum" => Ok(Strategy::Sum),
            "average" => Ok(Strategy::Average),
            "count" => Ok(Strategy::Count),
            other => Err(ProcessorError::Configuration(format!(
                "aggregate strategy must be one of collect|sum|average|count, got '{other}'"
            ))),
        }
    }
}

#[derive(Default)]
struct AggregateState {
    items: Vec<Message>,
    /// `None` when empty, matching `first_admit_time == 0` in spec §3;
    /// `Some(t)` records the real timestamp of the first admission so a
    /// `collect` flush can report a genuine `first_timestamp`.
    first_admit: Option<SystemTime>,
    pending_flush: Option<tokio::task::JoinHandle<()>>,
}

/// Size- and time-bounded accumulator that emits one message per flush.
pub struct AggregateProcessor {
    strategy: Strategy,
    timeout: Duration,
    max_size: AggregateMaxSize,
    state: Mutex<AggregateState>,
    index: usize,
    reinject: mpsc::UnboundedSender<(usize, Message)>,
    time_provider: SharedTimeProvider,
    self_weak: Weak<AggregateProcessor>,
}

impl AggregateProcessor {
    /// Builds a processor from its config and chain position.
    ///
    /// # Errors
    /// Returns [`ProcessorError::Configuration`] if `strategy` is not one
    /// of `collect|sum|average|count`, or `max_size` is absent or out of
    /// [`AggregateMaxSize`]'s bounds (1..=1,000,000).
    pub fn from_config(
        config: &ProcessorConfig,
        ctx: &ProcessorContext,
    ) -> Result<Arc<Self>, ProcessorError> {
        let strategy = Strategy::parse(&config.require_str("strategy")?)?;
        let timeout_spec = config.get_str("timeout").unwrap_or_else(|| "30s".to_string());
        let timeout = parse_duration_spec(&timeout_spec, Duration::from_secs(30));
        let max_size_raw = config
            .fields
            .get("max_size")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| {
                ProcessorError::Configuration("aggregate requires 'max_size'".to_string())
            })?;
        let max_size = AggregateMaxSize::try_new(max_size_raw).map_err(|e| {
            ProcessorError::Configuration(format!("aggregate 'max_size': {e}"))
        })?;
        Ok(Arc::new_cyclic(|weak| Self {
            strategy,
            timeout,
            max_size,
            state: Mutex::new(AggregateState::default()),
            index: ctx.index,
            reinject: ctx.reinject.clone(),
            time_provider: ctx.time_provider.clone(),
            self_weak: weak.clone(),
        }))
    }

    fn schedule_flush(&self, state: &mut AggregateState) {
        let weak = self.self_weak.clone();
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            let Some(this) = weak.upgrade() else {
                return;
            };
            this.time_provider.sleep(timeout).await;
            this.fire_timer_flush().await;
        });
        state.pending_flush = Some(handle);
    }

    async fn fire_timer_flush(&self) {
        let mut state = self.state.lock().await;
        if let Some(out) = self.flush_locked(&mut state) {
            // The synchronous caller has already moved past this
            // processor's position; re-enter the chain one slot after it
            // so downstream processors and the destination still run.
            let _ = self.reinject.send((self.index + 1, out));
        }
    }

    fn flush_locked(&self, state: &mut AggregateState) -> Option<Message> {
        if state.items.is_empty() {
            return None;
        }
        let items = std::mem::take(&mut state.items);
        let first_admit = state.first_admit.take();
        if let Some(handle) = state.pending_flush.take() {
            handle.abort();
        }
        Some(self.aggregate(items, first_admit))
    }

    fn aggregate(&self, items: Vec<Message>, first_admit: Option<SystemTime>) -> Message {
        let flushed_at = self.time_provider.now();
        let first_at = first_admit.unwrap_or(flushed_at);
        match self.strategy {
            Strategy::Collect => {
                let bodies: Vec<Value> = items.iter().map(|m| m.body.clone()).collect();
                Message::new(serde_json::json!({
                    "items": bodies,
                    "first_timestamp": epoch_secs(first_at),
                    "last_timestamp": epoch_secs(flushed_at),
                }))
            }
            Strategy::Sum => {
                let sum: f64 = items.iter().map(|m| as_number(&m.body)).sum();
                Message::new(serde_json::json!(sum))
            }
            Strategy::Average => {
                let sum: f64 = items.iter().map(|m| as_number(&m.body)).sum();
                let avg = if items.is_empty() {
                    0.0
                } else {
                    sum / items.len() as f64
                };
                Message::new(serde_json::json!(avg))
            }
            Strategy::Count => Message::new(serde_json::json!(items.len())),
        }
    }
}

fn epoch_secs(time: SystemTime) -> f64 {
    time.duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn as_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Object(obj) => obj.get("value").map(as_number).unwrap_or(0.0),
        Value::Bool(_) | Value::Array(_) | Value::Null => 0.0,
    }
}

#[async_trait]
impl Processor for AggregateProcessor {
    async fn process(&self, message: Message) -> Result<ChainOutcome, ProcessorError> {
        let mut state = self.state.lock().await;
        state.items.push(message);
        if state.first_admit.is_none() {
            state.first_admit = Some(self.time_provider.now());
            self.schedule_flush(&mut state);
        }
        if state.items.len() >= self.max_size.into_inner() {
            if let Some(out) = self.flush_locked(&mut state) {
                return Ok(ChainOutcome::Forward(out));
            }
        }
        Ok(ChainOutcome::Drop)
    }

    async fn close(&self) -> Option<Message> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state)
    }
}
