//! Mapping from raw MQTT payloads to gauge values.

/// Payload tokens exported as `0`.
pub const FALSY_TOKENS: &[&str] = &["false", "f", "low", "closed", "up"];

/// Payload tokens exported as `1`.
pub const TRUTHY_TOKENS: &[&str] = &["true", "t", "high", "open", "down", "longpress"];

/// Why a message produced no sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// The broker replayed a stored value rather than delivering a live event.
    Retained,
    /// The payload is not valid UTF-8.
    InvalidUtf8,
    /// The payload looks like a JSON object.
    Structured,
    /// The payload is neither a known token nor a finite number.
    Unparseable,
}

/// Outcome of classifying one payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Value(f64),
    Ignore(Ignored),
}

impl Reading {
    /// The sample value, if the payload produced one.
    pub fn value(self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::Ignore(_) => None,
        }
    }
}

/// Classify a message payload as a gauge value.
///
/// Checks run in a fixed order:
/// - retained deliveries are rejected before the payload is looked at
/// - the payload must decode as UTF-8
/// - boolean-like tokens (ASCII case-insensitive) map to `0` or `1`
/// - anything starting with `{` is treated as JSON and skipped
/// - the remaining text must parse as a finite `f64`
pub fn classify(payload: &[u8], retained: bool) -> Reading {
    if retained {
        return Reading::Ignore(Ignored::Retained);
    }

    let Ok(text) = std::str::from_utf8(payload) else {
        return Reading::Ignore(Ignored::InvalidUtf8);
    };

    if let Some(v) = match_token(text) {
        return Reading::Value(v);
    }

    if text.starts_with('{') {
        return Reading::Ignore(Ignored::Structured);
    }

    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Reading::Value(v),
        _ => Reading::Ignore(Ignored::Unparseable),
    }
}

fn match_token(text: &str) -> Option<f64> {
    if FALSY_TOKENS.iter().any(|t| t.eq_ignore_ascii_case(text)) {
        Some(0.0)
    } else if TRUTHY_TOKENS.iter().any(|t| t.eq_ignore_ascii_case(text)) {
        Some(1.0)
    } else {
        None
    }
}
