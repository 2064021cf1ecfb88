//! Structured paths into the state tree.
//!
//! A path selects one leaf of a [`StateStore`](crate::store::StateStore):
//! a base key followed by bracketed segments, written textually as
//! `base[seg1][seg2]...`. Each segment is either a string key into a map
//! node or an integer index into a list node.
//!
//! Paths are parsed and validated once, at construction. The wire format
//! carries a path as a fixed 244-byte null-padded UTF-8 field, so the
//! textual form must encode to at most [`MAX_PATH_BYTES`] bytes; longer
//! paths are rejected here, before any socket I/O happens.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Maximum encoded length of a path on the wire.
pub const MAX_PATH_BYTES: usize = 244;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path '{path}' encodes to {len} bytes, limit is {MAX_PATH_BYTES}")]
    TooLong { path: String, len: usize },

    #[error("empty path")]
    Empty,

    #[error("malformed path '{path}', {reason}")]
    Malformed { path: String, reason: String },
}

/// One step of a path: a string key into a map or an index into a list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{key}"),
            Segment::Index(idx) => write!(f, "{idx}"),
        }
    }
}

/// A validated path into the state tree.
///
/// Built either by parsing the textual form (`"model[layers][0][weight]"`)
/// or programmatically:
///
/// ```rust
/// use permafrost::path::Path;
///
/// let path = Path::new("model").unwrap().key("layers").unwrap().index(0).unwrap();
/// assert_eq!(path.to_string(), "model[layers][0]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// Start a path at a base map key.
    pub fn new(base: impl Into<String>) -> Result<Self, PathError> {
        let base = base.into();
        validate_key(&base, &base)?;
        let path = Path {
            segments: vec![Segment::Key(base)],
        };
        path.check_len()?;
        Ok(path)
    }

    /// Extend with a string key segment.
    pub fn key(mut self, key: impl Into<String>) -> Result<Self, PathError> {
        let key = key.into();
        validate_key(&key, &format!("{self}[{key}]"))?;
        self.segments.push(Segment::Key(key));
        self.check_len()?;
        Ok(self)
    }

    /// Extend with an integer index segment.
    pub fn index(mut self, idx: usize) -> Result<Self, PathError> {
        self.segments.push(Segment::Index(idx));
        self.check_len()?;
        Ok(self)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn check_len(&self) -> Result<(), PathError> {
        let text = self.to_string();
        if text.len() > MAX_PATH_BYTES {
            return Err(PathError::TooLong {
                len: text.len(),
                path: text,
            });
        }
        Ok(())
    }
}

fn validate_key(key: &str, path: &str) -> Result<(), PathError> {
    if key.is_empty() {
        return Err(PathError::Malformed {
            path: path.to_string(),
            reason: "empty segment".to_string(),
        });
    }
    if key.contains(['[', ']', '\0']) {
        return Err(PathError::Malformed {
            path: path.to_string(),
            reason: format!("key '{key}' contains a reserved character"),
        });
    }
    // All-digit keys would be unreachable: the parser reads them back as
    // indices.
    if key.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PathError::Malformed {
            path: path.to_string(),
            reason: format!("key '{key}' is all digits, use an index segment"),
        });
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i == 0 {
                write!(f, "{segment}")?;
            } else {
                write!(f, "[{segment}]")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        if s.len() > MAX_PATH_BYTES {
            return Err(PathError::TooLong {
                path: s.to_string(),
                len: s.len(),
            });
        }

        let malformed = |reason: &str| PathError::Malformed {
            path: s.to_string(),
            reason: reason.to_string(),
        };

        let (base, mut rest) = match s.find('[') {
            Some(at) => (&s[..at], &s[at..]),
            None => (s, ""),
        };
        if base.is_empty() {
            return Err(malformed("missing base key"));
        }
        if base.contains(']') {
            return Err(malformed("']' before any '['"));
        }

        let mut segments = vec![parse_segment(base, s)?];
        while !rest.is_empty() {
            let Some(stripped) = rest.strip_prefix('[') else {
                return Err(malformed("expected '[' between segments"));
            };
            let Some(close) = stripped.find(']') else {
                return Err(malformed("unterminated '['"));
            };
            let inner = &stripped[..close];
            if inner.is_empty() {
                return Err(malformed("empty segment"));
            }
            if inner.contains('[') {
                return Err(malformed("nested '['"));
            }
            segments.push(parse_segment(inner, s)?);
            rest = &stripped[close + 1..];
        }

        Ok(Path { segments })
    }
}

fn parse_segment(text: &str, path: &str) -> Result<Segment, PathError> {
    if text.bytes().all(|b| b.is_ascii_digit()) {
        let idx = text.parse().map_err(|_| PathError::Malformed {
            path: path.to_string(),
            reason: format!("index '{text}' out of range"),
        })?;
        Ok(Segment::Index(idx))
    } else if text.contains('\0') {
        Err(PathError::Malformed {
            path: path.to_string(),
            reason: "segment contains NUL".to_string(),
        })
    } else {
        Ok(Segment::Key(text.to_string()))
    }
}
