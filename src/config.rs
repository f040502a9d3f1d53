//! Route and engine configuration: schema, validation, and the YAML/JSON
//! document loaded at startup.

use crate::domain_types::{RetryAttempts, RetryDelaySecs, RouteName, ShutdownGraceMs, TimeoutSecs};
use crate::error::{ConfigurationError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Either flavor of startup-time config failure a route or engine config
/// can raise, kept as one error so callers can `?` through a single
/// `validate()` call and let the caller decide the exit code (spec §6).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Malformed URI, unknown scheme/type, or unparseable document.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Out-of-range field or a missing required environment variable.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<ConfigError> for crate::error::EngineError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Configuration(source) => source.into(),
            ConfigError::Validation(source) => source.into(),
        }
    }
}

/// One entry in a route's `error_handlers` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorHandlerConfig {
    /// Log the error and continue to the next handler in declaration
    /// order (so multiple policies may apply to the same failure).
    Log {
        /// Optional message template logged alongside the error.
        #[serde(default)]
        message: Option<String>,
    },
    /// Re-run the processor chain and the send, up to `max_attempts`,
    /// sleeping `delay` seconds between tries. Stops the handler list on
    /// success.
    Retry {
        /// Maximum number of re-run attempts.
        max_attempts: u32,
        /// Delay, in seconds, between attempts.
        delay: f64,
    },
    /// Send the original message to a fallback destination URI. Stops
    /// the handler list on success.
    Fallback {
        /// Destination URI to send to instead of the route's own.
        destination: String,
    },
}

/// Configuration for one processor in a route's chain. `kind` selects
/// the constructor via the processor factory (spec §4.3.6); the
/// remaining fields are processor-specific and validated by that
/// processor's own `from_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Case-insensitive processor type name (`transform`, `filter`,
    /// `external`, `aggregate`, `debug`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Processor-specific fields, kept untyped here and validated by the
    /// processor's constructor.
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl ProcessorConfig {
    /// Reads a required string field from `fields`.
    ///
    /// # Errors
    /// Returns [`ValidationError::Field`] if `key` is absent or not a
    /// string.
    pub fn require_str(&self, key: &str) -> Result<String, ValidationError> {
        self.fields
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ValidationError::Field {
                field: key.to_string(),
                reason: "required string field missing".to_string(),
            })
    }

    /// Reads an optional string field from `fields`.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.fields
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    }

    /// Reads an optional f64 field from `fields`.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(serde_json::Value::as_f64)
    }
}

/// One route as it appears in the config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Unique, human-assigned route name.
    pub name: String,
    /// Source connector URI.
    pub from: String,
    /// Destination connector URI.
    pub to: String,
    /// Ordered processor chain.
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
    /// Whether the route is started with the engine. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Retry attempts for `safe_receive`/`safe_send`, not counting the
    /// initial attempt. Defaults to 3.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Delay between retries, in seconds. Defaults to 1.0.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// Per-suspension-point timeout, in seconds. Unbounded if absent.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Ordered error handlers, tried in sequence on failure.
    #[serde(default)]
    pub error_handlers: Vec<ErrorHandlerConfig>,
}

fn default_true() -> bool {
    true
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    1.0
}

impl RouteConfig {
    /// Validates cross-field invariants and bounds, returning the
    /// validated domain values a [`crate::route::Route`] is built from.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] if `name` is empty or any
    /// bounded field (retries, delay, timeout) is out of range; returns
    /// [`ConfigError::Configuration`] if `from`/`to` fail
    /// [`crate::resolver::parse_uri`].
    pub fn validate(&self) -> Result<ValidatedRoute, ConfigError> {
        let name = RouteName::try_new(self.name.clone()).map_err(|e| validation("name", e))?;
        crate::resolver::parse_uri(&self.from)?;
        crate::resolver::parse_uri(&self.to)?;
        let retry_attempts = RetryAttempts::try_new(self.retry_attempts)
            .map_err(|e| validation("retry_attempts", e))?;
        let retry_delay = RetryDelaySecs::try_new(self.retry_delay)
            .map_err(|e| validation("retry_delay", e))?;
        let timeout = self
            .timeout
            .map(TimeoutSecs::try_new)
            .transpose()
            .map_err(|e| validation("timeout", e))?;
        Ok(ValidatedRoute {
            name,
            from: self.from.clone(),
            to: self.to.clone(),
            processors: self.processors.clone(),
            enabled: self.enabled,
            retry_attempts,
            retry_delay,
            timeout,
            error_handlers: self.error_handlers.clone(),
        })
    }
}

fn validation(field: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Validation(ValidationError::Field {
        field: field.to_string(),
        reason: reason.to_string(),
    })
}

/// A [`RouteConfig`] after successful validation, with bounded fields
/// promoted to their domain types.
#[derive(Debug, Clone)]
pub struct ValidatedRoute {
    /// Validated route name.
    pub name: RouteName,
    /// Source connector URI (already confirmed parseable).
    pub from: String,
    /// Destination connector URI (already confirmed parseable).
    pub to: String,
    /// Ordered processor chain configuration.
    pub processors: Vec<ProcessorConfig>,
    /// Whether the route should be started.
    pub enabled: bool,
    /// Validated retry attempt count.
    pub retry_attempts: RetryAttempts,
    /// Validated retry delay.
    pub retry_delay: RetryDelaySecs,
    /// Validated per-suspension-point timeout, if one was configured.
    pub timeout: Option<TimeoutSecs>,
    /// Ordered error handlers.
    pub error_handlers: Vec<ErrorHandlerConfig>,
}

/// The top-level config document: a list of routes plus engine-wide
/// settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Routes to construct at startup.
    pub routes: Vec<RouteConfig>,
    /// Environment variables that must be set before the engine is
    /// allowed to start; checked via [`crate::resolver::missing_env_vars`].
    #[serde(default)]
    pub required_env: Vec<String>,
    /// How long the engine waits for routes to drain on shutdown before
    /// abandoning stragglers. Defaults to 30000ms.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_shutdown_grace_ms() -> u64 {
    30_000
}

impl EngineConfig {
    /// Loads and parses a YAML or JSON config document from `path`.
    /// YAML is a superset of JSON, so one parser handles both.
    ///
    /// # Errors
    /// Returns [`ConfigError::Configuration`] if the file cannot be read
    /// or fails to parse.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::InvalidUri(format!("reading {path:?}: {e}")))?;
        let mut config: Self = serde_yaml::from_str(&contents).map_err(ConfigurationError::from)?;
        config.interpolate_env();
        Ok(config)
    }

    /// Expands `${NAME}`/`{{NAME}}` references in every route's `from`,
    /// `to`, processor fields, and error-handler fields, in place.
    /// Unset names expand to the empty string and are returned so a
    /// caller may cross-check them against `required_env` (spec §4.1).
    pub fn interpolate_env(&mut self) -> Vec<String> {
        let mut unset = Vec::new();
        for route in &mut self.routes {
            let (from, mut missing) = crate::resolver::interpolate_env(&route.from);
            route.from = from;
            unset.append(&mut missing);
            let (to, mut missing) = crate::resolver::interpolate_env(&route.to);
            route.to = to;
            unset.append(&mut missing);
            for processor in &mut route.processors {
                for value in processor.fields.values_mut() {
                    crate::resolver::interpolate_json(value, &mut unset);
                }
            }
            for handler in &mut route.error_handlers {
                match handler {
                    ErrorHandlerConfig::Log {
                        message: Some(message),
                    } => {
                        let (expanded, mut missing) = crate::resolver::interpolate_env(message);
                        *message = expanded;
                        unset.append(&mut missing);
                    }
                    ErrorHandlerConfig::Fallback { destination } => {
                        let (expanded, mut missing) = crate::resolver::interpolate_env(destination);
                        *destination = expanded;
                        unset.append(&mut missing);
                    }
                    ErrorHandlerConfig::Log { message: None } | ErrorHandlerConfig::Retry { .. } => {}
                }
            }
        }
        unset.sort_unstable();
        unset.dedup();
        unset
    }

    /// Validates every route, the shutdown grace period, and the
    /// `required_env` list, returning the engine-level shutdown grace as
    /// a domain type alongside the per-route validated configs.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] encountered: an invalid route,
    /// an out-of-range `shutdown_grace_ms`, or a required environment
    /// variable that is not set.
    pub fn validate(&self) -> Result<(Vec<ValidatedRoute>, ShutdownGraceMs), ConfigError> {
        let routes = self
            .routes
            .iter()
            .map(RouteConfig::validate)
            .collect::<Result<Vec<_>, _>>()?;
        let grace = ShutdownGraceMs::try_new(self.shutdown_grace_ms)
            .map_err(|e| validation("shutdown_grace_ms", e))?;
        let missing = crate::resolver::missing_env_vars(&self.required_env);
        if let Some(name) = missing.into_iter().next() {
            return Err(ConfigError::Validation(ValidationError::MissingEnvVar(
                name,
            )));
        }
        Ok((routes, grace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_route() -> RouteConfig {
        RouteConfig {
            name: "ingest".to_string(),
            from: "timer:5s".to_string(),
            to: "log:info".to_string(),
            processors: vec![],
            enabled: true,
            retry_attempts: 3,
            retry_delay: 1.0,
            timeout: Some(30.0),
            error_handlers: vec![],
        }
    }

    #[test]
    fn validates_minimal_route() {
        assert!(minimal_route().validate().is_ok());
    }

    #[test]
    fn timeout_is_optional() {
        let mut route = minimal_route();
        route.timeout = None;
        assert!(route.validate().unwrap().timeout.is_none());
    }

    #[test]
    fn rejects_empty_name() {
        let mut route = minimal_route();
        route.name = String::new();
        assert!(route.validate().is_err());
    }

    #[test]
    fn rejects_unparseable_source_uri() {
        let mut route = minimal_route();
        route.from = "not a uri".to_string();
        assert!(route.validate().is_err());
    }

    #[test]
    fn rejects_excessive_retry_attempts() {
        let mut route = minimal_route();
        route.retry_attempts = 9999;
        assert!(route.validate().is_err());
    }

    #[test]
    fn engine_config_deserializes_from_yaml() {
        let yaml = r"
routes:
  - name: ingest
    from: timer:5s
    to: log:info
    error_handlers:
      - type: retry
        max_attempts: 2
        delay: 0.1
      - type: fallback
        destination: log:fallback
";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].name, "ingest");
        assert_eq!(config.routes[0].error_handlers.len(), 2);
        let (validated, grace) = config.validate().unwrap();
        assert_eq!(validated.len(), 1);
        assert_eq!(grace.into_inner(), 30_000);
    }

    #[test]
    fn interpolate_env_expands_uris_and_reports_unset() {
        let yaml = r"
routes:
  - name: ingest
    from: 'http://${TRIBUTARY_CFG_TEST_HOST}/in'
    to: 'http://${TRIBUTARY_CFG_TEST_MISSING}/out'
";
        let mut config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        unsafe {
            std::env::set_var("TRIBUTARY_CFG_TEST_HOST", "example.com");
        }
        let unset = config.interpolate_env();
        unsafe {
            std::env::remove_var("TRIBUTARY_CFG_TEST_HOST");
        }
        assert_eq!(config.routes[0].from, "http://example.com/in");
        assert_eq!(config.routes[0].to, "http:///out");
        assert_eq!(unset, vec!["TRIBUTARY_CFG_TEST_MISSING".to_string()]);
    }

    #[test]
    fn missing_required_env_var_fails_validation() {
        let config = EngineConfig {
            routes: vec![minimal_route()],
            required_env: vec!["TRIBUTARY_CFG_DEFINITELY_UNSET".to_string()],
            shutdown_grace_ms: 30_000,
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation(ValidationError::MissingEnvVar(_))
        ));
    }
}
