//! Validated domain primitives for route and engine configuration.
//!
//! Bounded/validated values are newtype-wrapped with `nutype` rather than
//! passed around as raw `u32`/`f64`, so an out-of-range retry count or
//! timeout is rejected at the config boundary instead of surfacing as a
//! confusing runtime behavior deep inside a route.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a route, generated at registration time.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct RouteId(Uuid);

impl RouteId {
    /// Generates a new random route id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Human-assigned, non-empty route name as it appears in config.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct RouteName(String);

/// Number of attempts `safe_receive`/`safe_send` make before giving up,
/// not counting the initial attempt.
#[nutype(
    validate(less_or_equal = 20),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 3
)]
pub struct RetryAttempts(u32);

impl RetryAttempts {
    /// Total number of tries, including the initial one.
    #[must_use]
    pub fn total_tries(self) -> u32 {
        self.into_inner() + 1
    }
}

/// Delay between retry attempts, in seconds.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 300.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1.0
)]
pub struct RetryDelaySecs(f64);

impl RetryDelaySecs {
    /// This delay as a `Duration`.
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs_f64(self.into_inner())
    }
}

/// Per-suspension-point timeout (source receive, destination send),
/// in seconds. Optional at the route level: when absent, `safe-receive`
/// and `safe-send` wait indefinitely.
#[nutype(
    validate(greater_or_equal = 0.001, less_or_equal = 3600.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct TimeoutSecs(f64);

impl TimeoutSecs {
    /// This timeout as a `Duration`.
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs_f64(self.into_inner())
    }
}

/// Maximum number of buffered items an aggregate processor holds before
/// an automatic flush, regardless of elapsed time.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 100
)]
pub struct AggregateMaxSize(usize);

/// Grace period the engine waits for routes to drain on shutdown before
/// abandoning stragglers.
#[nutype(
    validate(less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct ShutdownGraceMs(u64);

impl ShutdownGraceMs {
    /// This grace period as a `Duration`.
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_attempts_default_is_three() {
        assert_eq!(RetryAttempts::default().into_inner(), 3);
    }

    #[test]
    fn retry_attempts_total_tries_includes_initial() {
        let attempts = RetryAttempts::try_new(2).unwrap();
        assert_eq!(attempts.total_tries(), 3);
    }

    #[test]
    fn retry_attempts_rejects_excessive_values() {
        assert!(RetryAttempts::try_new(21).is_err());
    }

    #[test]
    fn timeout_rejects_zero() {
        assert!(TimeoutSecs::try_new(0.0).is_err());
    }

    #[test]
    fn aggregate_max_size_default_is_one_hundred() {
        assert_eq!(AggregateMaxSize::default().into_inner(), 100);
    }

    #[test]
    fn route_name_rejects_empty() {
        assert!(RouteName::try_new(String::new()).is_err());
    }
}
