//! Dotted field paths (`address.city`, `courses.0`) used by filters, updates, projections,
//! sorts and indexes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    constants::{ID_FIELD, MAX_PATH_DEPTH},
    CorvidError,
    Result,
};

/// A parsed, validated dotted path into a document.
///
/// Paths are validated once at parse time, so every later lookup can walk the
/// segments without re-checking syntax.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath {
    /// The path exactly as written by the caller.
    raw:      String,
    /// The individual segments, never empty.
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses and validates a dotted field path.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidPath` when the path is empty, has an empty
    /// segment (`a..b`, `.a`, `a.`), has a segment starting with `$`, or is deeper
    /// than [`MAX_PATH_DEPTH`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::FieldPath;
    ///
    /// let path = FieldPath::parse("address.city").unwrap();
    /// assert_eq!(path.segments(), ["address", "city"]);
    /// assert!(FieldPath::parse("address..city").is_err());
    /// ```
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            CorvidError::InvalidPath {
                path:   path.to_owned(),
                reason: reason.to_owned(),
            }
        };

        if path.is_empty() {
            return Err(invalid("path is empty"));
        }

        let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
        if segments.len() > MAX_PATH_DEPTH {
            return Err(invalid("path is too deep"));
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(invalid("path contains an empty segment"));
            }
            if segment.starts_with('$') {
                return Err(invalid("path segments cannot start with '$'"));
            }
        }

        Ok(Self {
            raw: path.to_owned(),
            segments,
        })
    }

    /// The `_id` path.
    pub(crate) fn id() -> Self {
        Self {
            raw:      ID_FIELD.to_owned(),
            segments: vec![ID_FIELD.to_owned()],
        }
    }

    /// Returns the path as written.
    pub fn as_str(&self) -> &str { &self.raw }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] { &self.segments }

    /// Returns the first segment (the top-level field name).
    pub fn head(&self) -> &str { &self.segments[0] }

    /// Returns true for the `_id` path.
    pub fn is_id(&self) -> bool { self.raw == ID_FIELD }

    /// Returns true if `self` equals `other` or is a segment-wise prefix of it.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.segments.len() <= other.segments.len() &&
            self.segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a == b)
    }

    /// Returns true when one path is a prefix of the other, meaning both cannot be written
    /// in the same update or projection.
    pub fn conflicts_with(&self, other: &Self) -> bool { self.is_prefix_of(other) || other.is_prefix_of(self) }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.raw) }
}

impl FromStr for FieldPath {
    type Err = CorvidError;

    fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
