//! External processor: delegates processing to a shell command, passing
//! the message through a scoped temporary file.
//!
//! The temporary file is a `tempfile::NamedTempFile`, deleted on drop
//! regardless of how `process` returns — success, command failure,
//! timeout, or a future cancellation — satisfying the "deleted on all
//! exit paths" requirement without an explicit cleanup branch per exit.

use super::Processor;
use crate::config::ProcessorConfig;
use crate::error::ProcessorError;
use crate::message::{ChainOutcome, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

/// Runs `command` (with `{input_file}` substituted) against the
/// message, serialized to a temp file, and forwards whatever the
/// command prints to stdout.
pub struct ExternalProcessor {
    command: String,
    timeout: Duration,
}

impl ExternalProcessor {
    /// Builds a processor from its config.
    ///
    /// # Errors
    /// Returns [`ProcessorError::Configuration`] if `command` is absent.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ProcessorError> {
        let command = config.require_str("command")?;
        let timeout = Duration::from_secs_f64(config.get_f64("timeout").unwrap_or(30.0).max(0.0));
        Ok(Self { command, timeout })
    }
}

#[async_trait]
impl Processor for ExternalProcessor {
    async fn process(&self, message: Message) -> Result<ChainOutcome, ProcessorError> {
        let mut tmp = tempfile::NamedTempFile::new()
            .map_err(|e| ProcessorError::External(format!("creating temp file: {e}")))?;
        serde_json::to_writer(&mut tmp, &message.body)?;
        tmp.flush()
            .map_err(|e| ProcessorError::External(format!("writing temp file: {e}")))?;

        let rendered = self
            .command
            .replace("{input_file}", &tmp.path().to_string_lossy());

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&rendered)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| ProcessorError::External(format!("spawning '{rendered}': {e}")))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                tracing::warn!(command = %rendered, timeout = ?self.timeout, "external processor timed out");
                Ok(ChainOutcome::Drop)
            }
            Ok(Err(e)) => {
                tracing::warn!(command = %rendered, error = %e, "external processor I/O error");
                Ok(ChainOutcome::Drop)
            }
            Ok(Ok(output)) => {
                if !output.status.success() {
                    tracing::warn!(
                        command = %rendered,
                        status = %output.status,
                        stderr = %String::from_utf8_lossy(&output.stderr),
                        "external processor exited non-zero"
                    );
                    return Ok(ChainOutcome::Drop);
                }
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if stdout.is_empty() {
                    return Ok(ChainOutcome::Drop);
                }
                let body =
                    serde_json::from_str(&stdout).unwrap_or_else(|_| Value::String(stdout));
                Ok(ChainOutcome::Forward(Message::new(body)))
            }
        }
    }
}
