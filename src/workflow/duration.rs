//! Duration strings used in definitions and configuration
//!
//! Accepts `"15m"`, `"1s"`, `"250ms"`, `"1h30m"`, `"2d"`, or a bare number of
//! seconds (`"90"`, `90`).

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid duration '{input}': {reason}")]
pub struct DurationError {
    pub input: String,
    pub reason: String,
}

impl DurationError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a duration string like "1h30m", "500ms", "2d"
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let input = s;
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationError::new(input, "empty string"));
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();
    let mut current_num = String::new();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            current_num.push(c);
            continue;
        }
        if c.is_whitespace() {
            continue;
        }

        if current_num.is_empty() {
            return Err(DurationError::new(
                input,
                format!("expected number before unit '{}'", c),
            ));
        }
        let num: f64 = current_num
            .parse()
            .map_err(|_| DurationError::new(input, format!("invalid number: {}", current_num)))?;
        current_num.clear();

        let unit_nanos = match c {
            'd' => 86_400e9,
            'h' => 3_600e9,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1e6
            }
            'm' => 60e9,
            's' => 1e9,
            _ => return Err(DurationError::new(input, format!("unknown unit '{}'", c))),
        };
        total += Duration::from_nanos((num * unit_nanos).round() as u64);
    }

    // Trailing number without a unit means seconds
    if !current_num.is_empty() {
        let num: f64 = current_num
            .parse()
            .map_err(|_| DurationError::new(input, format!("invalid number: {}", current_num)))?;
        total += Duration::from_nanos((num * 1e9).round() as u64);
    }

    Ok(total)
}

/// Render a duration in the same notation `parse_duration` accepts
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 1_000 != 0 {
        return format!("{}ms", millis);
    }

    let mut secs = duration.as_secs();
    let mut out = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    if secs > 0 {
        out.push_str(&format!("{}s", secs));
    }
    out
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a duration like \"15m\", \"1s\", \"250ms\" or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse_duration(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("duration cannot be negative"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Duration::try_from_secs_f64(v).map_err(E::custom)
    }
}

/// `#[serde(with = "duration_serde")]` for `Duration` fields
pub mod duration_serde {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    /// `#[serde(with = "duration_serde::option")]` for `Option<Duration>` fields
    pub mod option {
        use super::*;
        use serde::{Deserialize, Serialize};

        #[derive(Serialize, Deserialize)]
        struct Wrapped(#[serde(with = "super")] Duration);

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            duration.map(Wrapped).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(d)| d))
        }
    }
}
