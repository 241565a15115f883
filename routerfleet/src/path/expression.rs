//! Path expressions with glob-like segments.

use std::fmt;
use std::str::FromStr;

use crate::error::PathError;

/// Marker that turns a segment into a wildcard.
pub const WILDCARD: char = '*';

/// A glob-like segment such as `*`, `mdm*`, `*signal` or `*wan*`.
///
/// Matching is case-insensitive on the candidate; the literal part of the
/// pattern is lower-cased once at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    raw: String,
    leading: bool,
    trailing: bool,
    needle: String,
}

impl WildcardPattern {
    /// Parse a segment, returning `None` if it has no wildcard marker.
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.contains(WILDCARD) {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            leading: raw.starts_with(WILDCARD),
            trailing: raw.ends_with(WILDCARD),
            needle: raw.trim_matches(WILDCARD).to_lowercase(),
        })
    }

    /// `true` for the bare universal wildcard `*`.
    pub fn is_universal(&self) -> bool {
        self.raw.len() == 1
    }

    /// The segment text as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check a candidate key or identifier against this pattern.
    ///
    /// - `*` (or any all-star pattern) matches everything
    /// - `*x*` matches if `x` is a substring
    /// - `*x` matches if the candidate ends with `x`
    /// - `x*` matches if the candidate starts with `x`
    /// - a star in the middle only (`x*y`) is compared literally
    pub fn matches(&self, candidate: &str) -> bool {
        if self.needle.is_empty() {
            return true;
        }
        let candidate = candidate.to_lowercase();
        match (self.leading, self.trailing) {
            (true, true) => candidate.contains(&self.needle),
            (true, false) => candidate.ends_with(&self.needle),
            (false, true) => candidate.starts_with(&self.needle),
            (false, false) => candidate == self.needle,
        }
    }
}

/// One `/`-delimited step of a [`PathExpression`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Exact key (or array index) lookup.
    Literal(String),
    /// Enumerate children and keep the ones that match.
    Wildcard(WildcardPattern),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match WildcardPattern::parse(raw) {
            Some(pattern) => Segment::Wildcard(pattern),
            None => Segment::Literal(raw.to_string()),
        }
    }

    /// Check if this segment is a wildcard.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Segment::Wildcard(_))
    }

    /// The segment text as written.
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Literal(s) => s,
            Segment::Wildcard(p) => p.as_str(),
        }
    }
}

/// A parsed query path such as `status/wan/devices/mdm*/diagnostics`.
///
/// Empty segments (leading, trailing or doubled slashes) are dropped.
/// Parsing never looks at a document; an expression that starts with a
/// wildcard parses fine and is rejected when it is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    raw: String,
    segments: Vec<Segment>,
}

impl PathExpression {
    /// Parse an expression.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let raw = raw.trim();
        let segments: Vec<Segment> = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(Segment::parse)
            .collect();

        if segments.is_empty() {
            return Err(PathError::Empty);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The expression as the caller wrote it. Used as the column name.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Index of the first wildcard segment, if any.
    pub fn first_wildcard(&self) -> Option<usize> {
        self.segments.iter().position(Segment::is_wildcard)
    }

    /// Check if any segment is a wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.first_wildcard().is_some()
    }

    /// The API path to request for this expression.
    ///
    /// For a literal expression this is the whole path. For a wildcard
    /// expression it is the part before the first wildcard, and the
    /// remaining segments are returned for local expansion.
    pub fn split_at_wildcard(&self) -> Result<(String, &[Segment]), PathError> {
        match self.first_wildcard() {
            None => Ok((self.literal_prefix(self.segments.len()), &[])),
            Some(0) => Err(PathError::LeadingWildcard {
                expression: self.raw.clone(),
            }),
            Some(idx) => Ok((self.literal_prefix(idx), &self.segments[idx..])),
        }
    }

    fn literal_prefix(&self, end: usize) -> String {
        self.segments[..end]
            .iter()
            .map(Segment::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl FromStr for PathExpression {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
