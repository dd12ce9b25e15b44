//! Path grammar for addressing values in the state tree.
//!
//! A path is an ordered, non-empty sequence of property keys. The
//! dotted string form ("account.address.city") exists only at the API
//! boundary; everything internal works on segments. A dot always
//! splits, so keys containing a literal dot cannot be addressed.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Reserved infix separating a real path from its alias in a
/// registration spec.
const ALIAS_INFIX: &str = " as ";

/// Dotted path shape: one or more non-empty dot-free segments.
fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^.]+(\.[^.]+)*$").unwrap())
}

/// Errors produced while parsing path or registration-spec text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path must not be empty")]
    Empty,

    #[error("path '{raw}' contains an empty segment")]
    EmptySegment { raw: String },

    #[error("registration spec '{raw}' has more than one ' as ' clause")]
    MalformedAlias { raw: String },
}

/// An ordered, non-empty sequence of property keys addressing one node
/// in the state tree.
///
/// Paths are plain value types: comparable, hashable, and ordered
/// segment-lexicographically so that a prefix sorts immediately before
/// the paths beneath it.
///
/// # Examples
///
/// ```
/// use statespace_core::PropertyPath;
///
/// let path = PropertyPath::parse("account.address.city").unwrap();
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.leaf(), "city");
/// assert_eq!(path.to_string(), "account.address.city");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyPath {
    segments: Vec<String>,
}

impl PropertyPath {
    /// Parses a dotted path.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::Empty`] for empty input and
    /// [`PathError::EmptySegment`] for leading, trailing or doubled
    /// dots.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        if !path_pattern().is_match(raw) {
            return Err(PathError::EmptySegment {
                raw: raw.to_string(),
            });
        }
        Ok(Self {
            segments: raw.split('.').map(str::to_string).collect(),
        })
    }

    /// Builds a path from pre-split segments.
    pub fn from_segments(segments: Vec<String>) -> Result<Self, PathError> {
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        if segments.iter().any(|s| s.is_empty() || s.contains('.')) {
            return Err(PathError::EmptySegment {
                raw: segments.join("."),
            });
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; paths are non-empty by construction.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The final key.
    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Everything except the final key, or `None` for a single-segment
    /// path (whose parent is the tree root).
    pub fn parent(&self) -> Option<PropertyPath> {
        if self.segments.len() <= 1 {
            None
        } else {
            Some(Self {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    /// This path extended by one key.
    pub fn child(&self, key: &str) -> PropertyPath {
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Self { segments }
    }

    /// This path extended by every segment of `tail`.
    pub fn join(&self, tail: &PropertyPath) -> PropertyPath {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(&tail.segments);
        Self { segments }
    }

    /// The first `len` segments, or `None` when out of range.
    pub fn prefix(&self, len: usize) -> Option<PropertyPath> {
        if len == 0 || len > self.segments.len() {
            None
        } else {
            Some(Self {
                segments: self.segments[..len].to_vec(),
            })
        }
    }

    /// True when `prefix` is this path or an ancestor of it.
    pub fn starts_with(&self, prefix: &PropertyPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// The segments below `prefix`, empty when the paths are equal.
    pub fn strip_prefix(&self, prefix: &PropertyPath) -> Option<&[String]> {
        if self.starts_with(prefix) {
            Some(&self.segments[prefix.segments.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl FromStr for PropertyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PropertyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PropertyPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// One entry of a consumer registration: the real path to subscribe
/// under, plus the optional alias path updates are addressed to.
///
/// The boundary grammar is `"real.path"` or `"real.path as alias.path"`.
/// The ` as ` infix is reserved only here; a key containing spaces is
/// otherwise a legal path segment.
///
/// # Examples
///
/// ```
/// use statespace_core::RegistrationSpec;
///
/// let spec = RegistrationSpec::parse("account.name as person.name").unwrap();
/// assert_eq!(spec.path.to_string(), "account.name");
/// assert_eq!(spec.alias.unwrap().to_string(), "person.name");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSpec {
    pub path: PropertyPath,
    pub alias: Option<PropertyPath>,
}

impl RegistrationSpec {
    /// Parses a registration spec.
    ///
    /// # Errors
    ///
    /// Propagates [`PathError`] from either side, and rejects more
    /// than one ` as ` clause as [`PathError::MalformedAlias`].
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let mut parts = raw.split(ALIAS_INFIX);
        let path_part = parts.next().unwrap_or("");
        let alias_part = parts.next();
        if parts.next().is_some() {
            return Err(PathError::MalformedAlias {
                raw: raw.to_string(),
            });
        }
        let path = PropertyPath::parse(path_part.trim())?;
        let alias = match alias_part {
            Some(alias) => Some(PropertyPath::parse(alias.trim())?),
            None => None,
        };
        Ok(Self { path, alias })
    }
}
