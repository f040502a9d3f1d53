//! Filter processor: drops messages that fail a confidence threshold or
//! a sandboxed boolean expression.
//!
//! The expression evaluator is `evalexpr`, whose context is inert data
//! with no registered functions — there is no I/O, reflection, or
//! callable construction surface, satisfying the requirement that the
//! condition language expose no host facility.

use super::Processor;
use crate::config::ProcessorConfig;
use crate::error::ProcessorError;
use crate::message::{ChainOutcome, Message};
use async_trait::async_trait;
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as EvalValue};
use serde_json::Value;

/// Drops a message that fails `min_confidence` and/or `condition`.
pub struct FilterProcessor {
    min_confidence: Option<f64>,
    condition: Option<String>,
}

impl FilterProcessor {
    /// Builds a processor from its config.
    ///
    /// # Errors
    /// Returns [`ProcessorError::Configuration`] if neither
    /// `min_confidence` nor `condition` is set.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ProcessorError> {
        let min_confidence = config.get_f64("min_confidence");
        let condition = config.get_str("condition");
        if min_confidence.is_none() && condition.is_none() {
            return Err(ProcessorError::Configuration(
                "filter requires at least one of 'min_confidence' or 'condition'".to_string(),
            ));
        }
        Ok(Self {
            min_confidence,
            condition,
        })
    }

    fn passes_confidence(&self, message: &Message) -> bool {
        match self.min_confidence {
            None => true,
            Some(threshold) => message
                .body
                .as_object()
                .and_then(|obj| obj.get("confidence"))
                .and_then(Value::as_f64)
                .is_some_and(|confidence| confidence >= threshold),
        }
    }

    fn passes_condition(&self, message: &Message) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };
        let mut context = HashMapContext::new();
        if let Some(obj) = message.body.as_object() {
            for (key, value) in obj {
                if let Some(eval_value) = scalar_to_eval(value) {
                    if context.set_value(key.clone(), eval_value).is_err() {
                        return false;
                    }
                }
            }
        }
        for (key, value) in &message.metadata {
            if let Some(eval_value) = scalar_to_eval(value) {
                let _ = context.set_value(key.clone(), eval_value);
            }
        }
        evalexpr::eval_boolean_with_context(condition, &context).unwrap_or(false)
    }
}

fn scalar_to_eval(value: &Value) -> Option<EvalValue> {
    match value {
        Value::Null => Some(EvalValue::Empty),
        Value::Bool(b) => Some(EvalValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(EvalValue::Int(i))
            } else {
                n.as_f64().map(EvalValue::Float)
            }
        }
        Value::String(s) => Some(EvalValue::String(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[async_trait]
impl Processor for FilterProcessor {
    async fn process(&self, message: Message) -> Result<ChainOutcome, ProcessorError> {
        if self.passes_confidence(&message) && self.passes_condition(&message) {
            Ok(ChainOutcome::Forward(message))
        } else {
            Ok(ChainOutcome::Drop)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(min_confidence: Option<f64>, condition: Option<&str>) -> ProcessorConfig {
        let mut fields = HashMap::new();
        if let Some(value) = min_confidence {
            fields.insert(
                "min_confidence".to_string(),
                serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number),
            );
        }
        if let Some(value) = condition {
            fields.insert("condition".to_string(), Value::String(value.to_string()));
        }
        ProcessorConfig {
            kind: "filter".to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn min_confidence_zero_passes_any_numeric_confidence() {
        let processor = FilterProcessor::from_config(&config(Some(0.0), None)).unwrap();
        let message = Message::new(serde_json::json!({"confidence": 0.01}));
        let outcome = processor.process(message).await.unwrap();
        assert!(matches!(outcome, ChainOutcome::Forward(_)));
    }

    #[tokio::test]
    async fn drops_below_threshold_and_missing_confidence() {
        let processor = FilterProcessor::from_config(&config(Some(0.5), None)).unwrap();
        assert_eq!(
            processor
                .process(Message::new(serde_json::json!({"confidence": 0.2})))
                .await
                .unwrap(),
            ChainOutcome::Drop
        );
        assert_eq!(
            processor
                .process(Message::new(serde_json::json!({})))
                .await
                .unwrap(),
            ChainOutcome::Drop
        );
    }

    #[tokio::test]
    async fn condition_evaluates_against_message_scalars() {
        let processor = FilterProcessor::from_config(&config(None, Some("count > 10"))).unwrap();
        let pass = processor
            .process(Message::new(serde_json::json!({"count": 15})))
            .await
            .unwrap();
        assert!(matches!(pass, ChainOutcome::Forward(_)));
        let drop = processor
            .process(Message::new(serde_json::json!({"count": 3})))
            .await
            .unwrap();
        assert_eq!(drop, ChainOutcome::Drop);
    }

    #[tokio::test]
    async fn condition_evaluation_failure_drops() {
        let processor = FilterProcessor::from_config(&config(None, Some("missing_field > 1"))).unwrap();
        let outcome = processor
            .process(Message::new(serde_json::json!({"other": 1})))
            .await
            .unwrap();
        assert_eq!(outcome, ChainOutcome::Drop);
    }

    #[test]
    fn requires_at_least_one_option() {
        assert!(FilterProcessor::from_config(&config(None, None)).is_err());
    }
}
