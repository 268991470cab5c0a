//! Path pattern matching.
//!
//! # Responsibilities
//! - Parse route, public-path and rule patterns once at load time
//! - Match request paths segment by segment
//! - Rank overlapping patterns by specificity
//!
//! # Design Decisions
//! - Literal segments are case-sensitive
//! - `*` matches exactly one segment, a trailing `**` matches zero or more
//! - Empty segments are ignored, so `/a//b/` and `/a/b` match alike
//! - Request segments are percent-decoded once before comparison; the
//!   upstream sees the same decoded path the patterns were checked against
//! - No regex to guarantee O(n) matching

use std::borrow::Cow;
use std::fmt;

use percent_encoding::percent_decode_str;

/// Error produced when a pattern cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern '{0}' must start with '/'")]
    MissingLeadingSlash(String),
    #[error("pattern '{0}' uses '**' before the last segment")]
    InnerGlob(String),
    #[error("pattern '{0}' mixes '*' with literal text in one segment")]
    PartialWildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// A compiled path pattern such as `/api/v1/users/**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    trailing_glob: bool,
}

/// Ordering key for overlapping patterns; greater is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    literals: usize,
    exact_length: bool,
    single_wildcards: usize,
}

impl PathPattern {
    /// Compile a pattern.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(raw.to_string()));
        }

        let parts: Vec<&str> = path_segments(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut trailing_glob = false;

        for (i, part) in parts.iter().enumerate() {
            match *part {
                "**" if i + 1 == parts.len() => trailing_glob = true,
                "**" => return Err(PatternError::InnerGlob(raw.to_string())),
                "*" => segments.push(Segment::Any),
                p if p.contains('*') => {
                    return Err(PatternError::PartialWildcard(raw.to_string()))
                }
                p => segments.push(Segment::Literal(p.to_string())),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            trailing_glob,
        })
    }

    /// Returns true if `path` (raw, no query string) matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let mut request = path_segments(path);

        for expected in &self.segments {
            match (expected, request.next()) {
                (Segment::Literal(lit), Some(actual)) if *lit == decode_segment(actual) => {}
                (Segment::Any, Some(_)) => {}
                _ => return false,
            }
        }

        self.trailing_glob || request.next().is_none()
    }

    pub fn specificity(&self) -> Specificity {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        Specificity {
            literals,
            exact_length: !self.trailing_glob,
            single_wildcards: self.segments.len() - literals,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.raw)
    }
}

/// Non-empty segments of a path.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn decode_segment(segment: &str) -> Cow<'_, str> {
    percent_decode_str(segment).decode_utf8_lossy()
}

/// True if any segment, once percent-decoded, is `.` or `..`, contains a
/// path separator (`/` or `\`), or is not valid UTF-8.
///
/// Such paths are rejected before any pattern is consulted: the upstream
/// could otherwise resolve them to a path that no rule was checked against.
pub fn has_unsafe_segments(path: &str) -> bool {
    path.contains('\\')
        || path_segments(path).any(|s| match percent_decode_str(s).decode_utf8() {
            Ok(decoded) => {
                matches!(decoded.as_ref(), "." | "..") || decoded.contains(|c: char| c == '/' || c == '\\')
            }
            Err(_) => true,
        })
}
