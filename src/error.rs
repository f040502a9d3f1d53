//! Error taxonomy for the integration engine.
//!
//! Each component raises its own narrow error type; those types convert
//! into [`EngineError`] at the boundary where they cross into route- or
//! engine-level reporting, the same layering the message-routing
//! component family used between its narrow errors and a crate-wide
//! umbrella type.

use thiserror::Error;

/// Errors raised while resolving a URI or interpolating configuration.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A URI did not match either the long (`scheme://...`) or short
    /// (`scheme:path`) grammar.
    #[error("invalid URI format: {0}")]
    InvalidUri(String),

    /// A route or processor config referenced a scheme/type with no
    /// registered constructor. Fatal at startup, per spec §4.1.
    #[error("unknown {kind} '{name}'")]
    UnknownType {
        /// Either `"scheme"` or `"processor type"`.
        kind: &'static str,
        /// The unrecognized scheme or type name.
        name: String,
    },

    /// Deserializing the config document itself failed.
    #[error("config deserialization error: {0}")]
    Deserialize(#[from] serde_yaml::Error),
}

/// Errors raised by field-level/cross-field validation and missing
/// required environment variables — the `ValidationError` kind of
/// spec §7, kept distinct from [`ConfigurationError`] so the two map to
/// different CLI exit codes (spec §6: 2 vs. 3).
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A required environment variable was not set when the engine
    /// checked its declared `required_env` list.
    #[error("required environment variable not set: {0}")]
    MissingEnvVar(String),

    /// A config document failed structural or cross-field validation
    /// (out-of-range bound, empty name, malformed processor option).
    #[error("validation error on field '{field}': {reason}")]
    Field {
        /// Dotted path of the offending field.
        field: String,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Errors raised by a connector (source or destination).
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// A retryable failure: the destination/source may succeed if tried
    /// again (network blip, 5xx response, connection reset).
    #[error("transient connector error: {0}")]
    Transient(String),

    /// A non-retryable failure (bad config, 4xx response, malformed
    /// payload the connector cannot interpret).
    #[error("permanent connector error: {0}")]
    Permanent(String),

    /// The connector's own open/close contract was violated (e.g. send
    /// called before open, or double-close).
    #[error("connector lifecycle error: {0}")]
    Lifecycle(String),
}

impl From<ValidationError> for ProcessorError {
    fn from(source: ValidationError) -> Self {
        ProcessorError::Configuration(source.to_string())
    }
}

impl ConnectorError {
    /// Whether this error should be retried under a route's retry policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }
}

/// Error from building a connector: either the URI's scheme has no
/// registered constructor (a [`ConfigurationError`], fatal at startup
/// per spec §7), or the registered constructor itself failed (a
/// [`ConnectorError`]).
#[derive(Error, Debug)]
pub enum ConnectorBuildError {
    /// Unparseable URI or unregistered scheme.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The constructor for a registered scheme failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Errors raised while a message moves through a processor.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// The processor's own config was invalid (missing required field,
    /// mutually exclusive options both absent).
    #[error("processor configuration error: {0}")]
    Configuration(String),

    /// A filter condition failed to parse or evaluate.
    #[error("filter condition error: {0}")]
    Condition(#[from] evalexpr::EvalexprError),

    /// An external command exceeded its timeout.
    #[error("external processor timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An external command exited non-zero or its I/O failed.
    #[error("external processor failed: {0}")]
    External(String),

    /// The message body was not valid JSON where JSON was required.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An aggregate buffer operation violated its own invariants.
    #[error("aggregate buffer error: {0}")]
    Aggregate(String),
}

/// Error from building a processor: either its `type` field names no
/// registered constructor (a [`ConfigurationError`], fatal at startup
/// per spec §7), or the registered constructor rejected its own config
/// (a [`ProcessorError`]).
#[derive(Error, Debug)]
pub enum ProcessorBuildError {
    /// Unrecognized processor `type`.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The constructor for a known type rejected its own fields.
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// The crate-wide umbrella error, aggregating the taxonomy from spec §7.
/// Every route-visible failure is reported through this type, carrying
/// the name of the route it occurred on when one is known.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration or URI resolution failed, generally fatal at startup.
    #[error("configuration error{}: {source}", route_suffix(.route))]
    Configuration {
        /// The route the error occurred on, if any.
        route: Option<String>,
        /// Underlying cause.
        #[source]
        source: ConfigurationError,
    },

    /// A field failed validation, or a declared-required environment
    /// variable was unset. Fatal at startup, per spec §4.1/§7.
    #[error("validation error{}: {source}", route_suffix(.route))]
    Validation {
        /// The route the error occurred on, if any.
        route: Option<String>,
        /// Underlying cause.
        #[source]
        source: ValidationError,
    },

    /// A connector failed; whether this is fatal depends on the route's
    /// retry policy and whether the error is transient.
    #[error("connector error on route '{route}': {source}")]
    Connector {
        /// Route the connector belongs to.
        route: String,
        /// Underlying cause.
        #[source]
        source: ConnectorError,
    },

    /// A processor in the chain failed.
    #[error("processor error on route '{route}': {source}")]
    Processor {
        /// Route the processor belongs to.
        route: String,
        /// Underlying cause.
        #[source]
        source: ProcessorError,
    },

    /// A safe-receive or safe-send operation exceeded its timeout and
    /// exhausted its retries.
    #[error("timeout on route '{route}' after {attempts} attempt(s)")]
    Timeout {
        /// Route the timeout occurred on.
        route: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// A config/URI scanner encountered an unreadable or malformed
    /// resource while discovering routes.
    #[error("scanner error: {0}")]
    Scanner(String),

    /// A failure that doesn't fit the rest of the taxonomy — currently
    /// a background task (the shutdown-signal listener) ending in a
    /// panic rather than a normal return.
    #[error("unhandled error: {0}")]
    Unhandled(String),
}

fn route_suffix(route: &Option<String>) -> String {
    match route {
        Some(name) => format!(" on route '{name}'"),
        None => String::new(),
    }
}

impl EngineError {
    /// Maps this error onto the process exit codes from spec §6:
    /// 2 configuration, 3 validation (missing required env var, malformed
    /// processor field), 4 connector setup, 5 processor setup, 6 timeout
    /// on shutdown grace.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Configuration { .. } => 2,
            EngineError::Validation { .. } => 3,
            EngineError::Connector { .. } => 4,
            EngineError::Processor { .. } => 5,
            EngineError::Timeout { .. } => 6,
            EngineError::Scanner(_) | EngineError::Unhandled(_) => 1,
        }
    }
}

impl From<ConfigurationError> for EngineError {
    fn from(source: ConfigurationError) -> Self {
        EngineError::Configuration {
            route: None,
            source,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(source: ValidationError) -> Self {
        EngineError::Validation {
            route: None,
            source,
        }
    }
}
