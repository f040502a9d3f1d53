//! Transform processor: renders a `{field}` template against the
//! message and writes the result back, either replacing the body or
//! into a named output field.

use super::Processor;
use crate::config::ProcessorConfig;
use crate::error::ProcessorError;
use crate::message::{ChainOutcome, Message};
use async_trait::async_trait;
use serde_json::Value;

/// Renders `template` against a message.
pub struct TransformProcessor {
    template: String,
    output_field: Option<String>,
}

impl TransformProcessor {
    /// Builds a processor from its config.
    ///
    /// # Errors
    /// Returns [`ProcessorError::Configuration`] if `template` is
    /// missing.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ProcessorError> {
        let template = config
            .get_str("template")
            .ok_or_else(|| ProcessorError::Configuration("transform requires 'template'".to_string()))?;
        Ok(Self {
            template,
            output_field: config.get_str("output_field"),
        })
    }

    fn render(&self, message: &Message) -> String {
        let mut out = String::with_capacity(self.template.len());
        let chars = self.template.as_str();
        let mut i = 0;
        while i < chars.len() {
            if chars[i..].starts_with('{') {
                if let Some(end) = chars[i + 1..].find('}') {
                    let name = &chars[i + 1..i + 1 + end];
                    out.push_str(&field_as_string(message, name));
                    i += end + 2;
                    continue;
                }
            }
            let ch = chars[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
        out
    }
}

fn field_as_string(message: &Message, name: &str) -> String {
    if let Some(value) = message.body.as_object().and_then(|obj| obj.get(name)) {
        return value_to_string(value);
    }
    if let Some(value) = message.meta(name) {
        return value_to_string(value);
    }
    String::new()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Processor for TransformProcessor {
    async fn process(&self, message: Message) -> Result<ChainOutcome, ProcessorError> {
        let rendered = self.render(&message);
        let mut message = message;
        match &self.output_field {
            Some(field) => {
                if let Some(obj) = message.body.as_object_mut() {
                    obj.insert(field.clone(), Value::String(rendered));
                } else {
                    let mut obj = serde_json::Map::new();
                    obj.insert(field.clone(), Value::String(rendered));
                    message.body = Value::Object(obj);
                }
            }
            None => message.body = Value::String(rendered),
        }
        Ok(ChainOutcome::Forward(message))
    }
}
