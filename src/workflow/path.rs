//! Context path addressing
//!
//! Paths select a value inside the execution context document:
//! - `$` - the whole document
//! - `$.body.job_status` or `body.job_status` - object keys
//! - `faces[0].timestamp` - array indices
//! - `$['key with spaces']` - quoted keys; `\` escapes the next character

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:\.([A-Za-z_][A-Za-z0-9_\-]*)|\[(\d+)\]|\['((?:[^'\\]|\\.)*)'\]|\["((?:[^"\\]|\\.)*)"\])"#,
    )
    .unwrap()
});

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap());

/// Largest array index a path may address
pub const MAX_INDEX: usize = 1 << 20;

/// Errors that can occur while parsing a path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("Empty path")]
    Empty,

    #[error("Invalid path '{path}': cannot parse '{remainder}'")]
    InvalidSyntax { path: String, remainder: String },

    #[error("Array index out of range in path '{0}'")]
    IndexOverflow(String),
}

/// One step of a path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed path into the execution context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ContextPath {
    segments: Vec<Segment>,
}

impl ContextPath {
    /// The path of the whole document (`$`)
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, PathError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let rest = if let Some(stripped) = trimmed.strip_prefix('$') {
            stripped.to_string()
        } else if trimmed.starts_with('[') {
            trimmed.to_string()
        } else {
            format!(".{}", trimmed)
        };

        let mut segments = Vec::new();
        let mut offset = 0;

        while offset < rest.len() {
            let remainder = &rest[offset..];
            let caps = SEGMENT_REGEX
                .captures(remainder)
                .ok_or_else(|| PathError::InvalidSyntax {
                    path: input.to_string(),
                    remainder: remainder.to_string(),
                })?;

            if let Some(index) = caps.get(2) {
                let index = index
                    .as_str()
                    .parse::<usize>()
                    .ok()
                    .filter(|index| *index <= MAX_INDEX)
                    .ok_or_else(|| PathError::IndexOverflow(input.to_string()))?;
                segments.push(Segment::Index(index));
            } else if let Some(key) = caps.get(1) {
                segments.push(Segment::Key(key.as_str().to_string()));
            } else if let Some(key) = caps.get(3).or_else(|| caps.get(4)) {
                segments.push(Segment::Key(unescape(key.as_str())));
            }

            offset += caps.get(0).map_or(remainder.len(), |m| m.end());
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Extend this path with an object key
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(Segment::Key(key.into()));
        self
    }

    /// Extend this path with an array index
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }
}

fn unescape(quoted: &str) -> String {
    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for ContextPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) if IDENTIFIER_REGEX.is_match(key) => write!(f, ".{}", key)?,
                Segment::Key(key) => write!(
                    f,
                    "['{}']",
                    key.replace('\\', "\\\\").replace('\'', "\\'")
                )?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl FromStr for ContextPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ContextPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl Serialize for ContextPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContextPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ContextPath::parse(&raw).map_err(serde::de::Error::custom)
    }
}
