//! Dotted path patterns
//!
//! A pattern is split on `.` and compared to a path segment by segment.
//! Each pattern segment is either a literal or `*`, which matches exactly
//! one path segment. A pattern consisting of a lone `*` is global and
//! matches every path. Specificity is the number of literal segments, so
//! `dashboards.main` (2) outranks `dashboards.*` (1), which outranks `*` (0).

use fleetsync_core::ConflictError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, ConflictError> {
        let invalid = |reason: &str| ConflictError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let segments = pattern
            .split('.')
            .map(|segment| match segment {
                "" => Err(invalid("empty segment")),
                "*" => Ok(Segment::Wildcard),
                literal if literal.contains('*') => {
                    Err(invalid("`*` must be a whole segment"))
                }
                literal => Ok(Segment::Literal(literal.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_global(&self) -> bool {
        self.segments == [Segment::Wildcard]
    }

    /// Number of literal segments.
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Specificity of the match, or `None` when `path` does not match.
    pub fn match_path(&self, path: &str) -> Option<usize> {
        if self.is_global() {
            return Some(0);
        }

        let mut parts = path.split('.');
        for segment in &self.segments {
            let part = parts.next()?;
            if let Segment::Literal(literal) = segment {
                if literal != part {
                    return None;
                }
            }
        }
        match parts.next() {
            Some(_) => None,
            None => Some(self.specificity()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.match_path(path).is_some()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for PathPattern {
    type Err = ConflictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn segment() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: every path matches itself as a pattern with full
        /// specificity, and replacing any segment by `*` still matches
        /// with one less.
        #[test]
        fn prop_wildcarding_lowers_specificity(
            segments in prop::collection::vec(segment(), 1..6),
            idx in any::<prop::sample::Index>(),
        ) {
            let path = segments.join(".");
            let exact = PathPattern::parse(&path).unwrap();
            prop_assert_eq!(exact.match_path(&path), Some(segments.len()));

            let mut wild = segments.clone();
            wild[idx.index(segments.len())] = "*".to_string();
            let pattern = PathPattern::parse(&wild.join(".")).unwrap();
            prop_assert_eq!(pattern.match_path(&path), Some(segments.len() - 1));
        }
    }
}
