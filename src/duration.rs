//! Shared duration-spec parsing: bare numbers are seconds; `s`/`m`/`h`
//! suffixes scale accordingly. Used by the `timer` source and the
//! aggregate processor's `timeout` field, both of which inherited this
//! grammar from the same upstream config surface.

use std::time::Duration;

/// Parses a duration spec like `"30"`, `"30s"`, `"1m"`, `"1.5h"`.
///
/// Falls back to `default` (logging a warning) if `spec` parses as
/// neither a bare number nor a recognized suffixed form.
#[must_use]
pub fn parse_duration_spec(spec: &str, default: Duration) -> Duration {
    let spec = spec.trim();
    if let Ok(seconds) = spec.parse::<f64>() {
        return Duration::from_secs_f64(seconds.max(0.0));
    }
    let (number, scale) = if let Some(prefix) = spec.strip_suffix("ms") {
        (prefix, 0.001)
    } else if let Some(prefix) = spec.strip_suffix('h') {
        (prefix, 3600.0)
    } else if let Some(prefix) = spec.strip_suffix('m') {
        (prefix, 60.0)
    } else if let Some(prefix) = spec.strip_suffix('s') {
        (prefix, 1.0)
    } else {
        tracing::warn!(spec, "unrecognized duration spec, using default");
        return default;
    };
    match number.parse::<f64>() {
        Ok(value) => Duration::from_secs_f64((value * scale).max(0.0)),
        Err(_) => {
            tracing::warn!(spec, "unrecognized duration spec, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_seconds() {
        assert_eq!(
            parse_duration_spec("30", Duration::from_secs(1)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn parses_suffixed_forms() {
        assert_eq!(
            parse_duration_spec("5s", Duration::ZERO),
            Duration::from_secs(5)
        );
        assert_eq!(
            parse_duration_spec("1m", Duration::ZERO),
            Duration::from_secs(60)
        );
        assert_eq!(
            parse_duration_spec("1.5h", Duration::ZERO),
            Duration::from_secs_f64(5400.0)
        );
        assert_eq!(
            parse_duration_spec("250ms", Duration::ZERO),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn falls_back_to_default_on_garbage() {
        assert_eq!(
            parse_duration_spec("not-a-duration", Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }
}
