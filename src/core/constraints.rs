//! Tag constraints that decide whether a service or server is exposed.

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// A single `tag==<glob>` or `tag!=<glob>` expression.
///
/// # Examples
///
/// ```rust
/// use routesync::core::Constraint;
///
/// let constraint: Constraint = "tag==us-*".parse().unwrap();
/// assert!(constraint.matches(&["us-east-1".to_string()]));
/// assert!(!constraint.matches(&["eu-west-1".to_string()]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    key: String,
    must_match: bool,
    pattern: String,
}

impl Constraint {
    /// Whether the tag list satisfies this constraint.
    ///
    /// `==` requires at least one matching tag, `!=` requires none.
    pub fn matches(&self, tags: &[String]) -> bool {
        let any = tags.iter().any(|tag| glob_match(&self.pattern, tag));
        any == self.must_match
    }
}

impl FromStr for Constraint {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (key, must_match, pattern) = if let Some((key, pattern)) = raw.split_once("==") {
            (key, true, pattern)
        } else if let Some((key, pattern)) = raw.split_once("!=") {
            (key, false, pattern)
        } else {
            return Err(ValidationError::invalid_field(
                "constraints",
                format!("'{}' is not of the form tag==value or tag!=value", raw),
            ));
        };

        let key = key.trim();
        if key != "tag" {
            return Err(ValidationError::invalid_field(
                "constraints",
                format!("unsupported constraint key '{}' (only 'tag' is supported)", key),
            ));
        }

        Ok(Self {
            key: key.to_string(),
            must_match,
            pattern: pattern.trim().to_string(),
        })
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.must_match { "==" } else { "!=" };
        write!(f, "{}{}{}", self.key, op, self.pattern)
    }
}

/// Parse a list of constraint expressions.
pub fn parse_constraints<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Constraint>, ValidationError> {
    raw.iter().map(|item| item.as_ref().parse()).collect()
}

/// Check every constraint against the tags.
///
/// Returns the first failing constraint, or `None` when all of them hold.
pub fn first_failing<'a>(constraints: &'a [Constraint], tags: &[String]) -> Option<&'a Constraint> {
    constraints.iter().find(|constraint| !constraint.matches(tags))
}

/// Match `value` against a pattern where `*` stands for any run of characters.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remaining) = value.strip_prefix(first) else {
        return false;
    };

    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for part in middle {
        match remaining.find(part) {
            Some(index) => remaining = &remaining[index + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}
