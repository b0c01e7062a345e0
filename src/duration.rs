//! Parsing of human duration tokens such as `30m` or `2 d`.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Anchored at both ends: anything after the unit rejects the whole token.
    Regex::new(r"^([0-9]+)\s*([smhdy])$").unwrap_or_else(|e| panic!("invalid duration pattern: {e}"))
});

/// Why a duration token was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid time format `{0}`, use something like `1h`, `30m` or `45s`")]
    InvalidFormat(String),
    #[error("duration `{0}` is too large")]
    Overflow(String),
}

/// Seconds per unit character
const fn unit_seconds(unit: char) -> Option<u64> {
    match unit {
        's' => Some(1),
        'm' => Some(60),
        'h' => Some(3_600),
        'd' => Some(86_400),
        'y' => Some(31_536_000),
        _ => None,
    }
}

/// Convert a duration token into seconds.
///
/// Leading whitespace is ignored. The rest must be one or more digits, optional
/// whitespace and a single unit out of `s`, `m`, `h`, `d`, `y` with nothing after it.
///
/// # Errors
/// Returns [`DurationError::InvalidFormat`] if the token does not match and
/// [`DurationError::Overflow`] if the result does not fit in a `u64`.
pub fn parse_duration(text: &str) -> Result<u64, DurationError> {
    let normalized = text.trim_start().to_ascii_lowercase();
    let invalid = || DurationError::InvalidFormat(text.to_string());

    let captures = DURATION_PATTERN.captures(&normalized).ok_or_else(invalid)?;
    let value: u64 = captures[1]
        .parse()
        .map_err(|_| DurationError::Overflow(text.to_string()))?;
    let unit = captures[2].chars().next().and_then(unit_seconds).ok_or_else(invalid)?;

    value
        .checked_mul(unit)
        .ok_or_else(|| DurationError::Overflow(text.to_string()))
}

/// Render seconds in the largest unit that divides them evenly, e.g. `3 days`.
#[must_use]
pub fn describe_duration(secs: u64) -> String {
    const UNITS: [(u64, &str); 5] = [
        (31_536_000, "year"),
        (86_400, "day"),
        (3_600, "hour"),
        (60, "minute"),
        (1, "second"),
    ];

    let (size, name) = UNITS
        .iter()
        .copied()
        .find(|(size, _)| secs >= *size && secs % size == 0)
        .unwrap_or((1, "second"));
    let count = secs / size;
    if count == 1 {
        format!("1 {name}")
    } else {
        format!("{count} {name}s")
    }
}

impl From<DurationError> for crate::ModerationError {
    fn from(error: DurationError) -> Self {
        Self::InvalidInput(error.to_string())
    }
}
