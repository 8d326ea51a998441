//! Compiled dotted-path expressions.
//!
//! A path like `"user.name"` is validated and split exactly once, when
//! the expression is built. Evaluation then walks the precompiled
//! segments; no per-evaluation string parsing happens anywhere.

use crate::error::{Error, Result};

/// A dotted property path, validated at construction.
///
/// Segments may contain ASCII alphanumerics, `_`, and `$`. Anything else
/// fails with [`Error::InvalidExpression`], including empty segments
/// (`"a..b"`, a leading or trailing dot, the empty string).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    raw: String,
    segments: Vec<String>,
}

fn segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

impl PathExpr {
    /// Compile a dotted path, rejecting malformed input up front.
    pub fn compile(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidExpression(raw.to_owned()));
        }
        let mut segments = Vec::new();
        for segment in raw.split('.') {
            if segment.is_empty() || !segment.chars().all(segment_char) {
                return Err(Error::InvalidExpression(raw.to_owned()));
            }
            segments.push(segment.to_owned());
        }
        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    /// The validated segments, in traversal order. Never empty.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The dotted form as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment() {
        let expr = PathExpr::compile("count").unwrap();
        assert_eq!(expr.segments(), ["count"]);
        assert_eq!(expr.as_str(), "count");
    }

    #[test]
    fn nested_segments_with_permitted_characters() {
        let expr = PathExpr::compile("user.$meta.first_name2").unwrap();
        assert_eq!(expr.segments().len(), 3);
        assert_eq!(expr.segments()[1], "$meta");
    }

    #[test]
    fn rejects_foreign_characters() {
        for bad in ["user name", "a[0]", "a-b", "items()", "a!b"] {
            assert!(
                matches!(PathExpr::compile(bad), Err(Error::InvalidExpression(_))),
                "`{bad}` should be rejected"
            );
        }
    }

    #[test]
    fn rejects_empty_segments() {
        for bad in ["", ".", "a..b", ".a", "a."] {
            assert!(
                matches!(PathExpr::compile(bad), Err(Error::InvalidExpression(_))),
                "`{bad}` should be rejected"
            );
        }
    }
}
