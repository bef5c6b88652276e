//! Label matchers used to select series before summing.

use std::fmt;

use regex::Regex;
use rigging_common::error::{Result, RiggingError};

use crate::parser::Metric;

/// Comparison applied by a [`LabelMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    /// `name="value"`
    Equal,
    /// `name!="value"`
    NotEqual,
    /// `name=~"regex"`
    Regex,
    /// `name!~"regex"`
    NotRegex,
}

impl MatchOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }
}

/// Predicate on one label of a series.
///
/// A series without the label is matched as if the label were empty.
/// Regular expressions are anchored at both ends.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    name: String,
    op: MatchOp,
    value: String,
    regex: Option<Regex>,
}

impl LabelMatcher {
    /// Builds a matcher of any kind.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Config`] if a regex matcher's pattern does
    /// not compile.
    pub fn new(op: MatchOp, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let regex = match op {
            MatchOp::Regex | MatchOp::NotRegex => Some(
                Regex::new(&format!("^(?:{value})$")).map_err(|e| {
                    RiggingError::config(format!("invalid matcher {name}{}{value:?}: {e}", op.as_str()))
                })?,
            ),
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(Self {
            name,
            op,
            value,
            regex,
        })
    }

    /// `name="value"`.
    #[must_use]
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            value: value.into(),
            regex: None,
        }
    }

    /// `name!="value"`.
    #[must_use]
    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: MatchOp::NotEqual,
            ..Self::equal(name, value)
        }
    }

    /// `name=~"pattern"`.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Config`] if the pattern does not compile.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        Self::new(MatchOp::Regex, name, pattern)
    }

    /// `name!~"pattern"`.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Config`] if the pattern does not compile.
    pub fn not_regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        Self::new(MatchOp::NotRegex, name, pattern)
    }

    /// Label name the matcher inspects.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Comparison kind.
    #[must_use]
    pub const fn op(&self) -> MatchOp {
        self.op
    }

    /// Returns whether a label value satisfies the matcher.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match (self.op, &self.regex) {
            (MatchOp::Equal, _) => value == self.value,
            (MatchOp::NotEqual, _) => value != self.value,
            (MatchOp::Regex, Some(re)) => re.is_match(value),
            (MatchOp::NotRegex, Some(re)) => !re.is_match(value),
            (MatchOp::Regex | MatchOp::NotRegex, None) => false,
        }
    }

    /// Returns whether a series satisfies the matcher.
    #[must_use]
    pub fn matches_metric(&self, metric: &Metric) -> bool {
        self.matches(metric.label(&self.name))
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op.as_str(), self.value)
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_matchers() {
        let eq = LabelMatcher::equal("first", "value1");
        assert!(eq.matches("value1"));
        assert!(!eq.matches("value2"));
        let ne = LabelMatcher::not_equal("first", "value1");
        assert!(ne.matches("value2"));
        assert!(ne.matches(""));
    }

    #[test]
    fn regex_is_fully_anchored() {
        let re = LabelMatcher::regex("first", "value.").unwrap();
        assert!(re.matches("value1"));
        assert!(!re.matches("value12"));
        assert!(!re.matches("xvalue1"));
        let nre = LabelMatcher::not_regex("first", "value1|value2").unwrap();
        assert!(!nre.matches("value2"));
        assert!(nre.matches("value3"));
    }

    #[test]
    fn missing_label_is_empty() {
        let empty = LabelMatcher::equal("first", "");
        assert!(empty.matches(""));
        let any = LabelMatcher::regex("first", ".+").unwrap();
        assert!(!any.matches(""));
    }

    #[test]
    fn invalid_regex_is_config_error() {
        let err = LabelMatcher::regex("first", "(unclosed").unwrap_err();
        assert!(matches!(err, RiggingError::Config { .. }), "{err}");
    }

    #[test]
    fn display_uses_selector_syntax() {
        assert_eq!(LabelMatcher::equal("a", "b").to_string(), r#"a="b""#);
        assert_eq!(
            LabelMatcher::not_regex("a", "b.*").unwrap().to_string(),
            r#"a!~"b.*""#
        );
    }
}
