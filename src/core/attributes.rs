//! Prefix-scoped attribute lookup over flat tag lists.
//!
//! A tag is either a bare marker (`traefik.enable`) or a `key=value` pair
//! (`traefik.backend.weight=10`). Lookups never fail: a missing or unparsable
//! value degrades to the caller's default.

use tracing::warn;

/// Default attribute prefix.
pub const DEFAULT_PREFIX: &str = "traefik";

/// Resolves typed attributes from tags of the form `<prefix>.<name>=<value>`.
///
/// Key matching ignores case, but a tag whose key matches exactly is
/// preferred over one that only matches case-insensitively. Among tags of
/// equal rank the first one wins.
///
/// # Examples
///
/// ```rust
/// use routesync::core::AttributeResolver;
///
/// let resolver = AttributeResolver::new("traefik");
/// let tags = vec![
///     "traefik.backend.weight=1".to_string(),
///     "TRAEFIK.BACKEND.WEIGHT=2".to_string(),
/// ];
/// assert_eq!(resolver.get(&tags, "backend.weight", "0"), "1");
/// assert_eq!(resolver.get_int(&tags, "backend.weight", 0), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeResolver {
    prefix: String,
}

impl AttributeResolver {
    /// Create a resolver for the given prefix. An empty prefix looks names up verbatim.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full tag key for an attribute name.
    pub fn prefixed_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Resolve an attribute as a string.
    pub fn get(&self, tags: &[String], name: &str, default: &str) -> String {
        get_tag(tags, &self.prefixed_name(name), default)
    }

    /// Whether any tag carries the attribute, with or without a value.
    pub fn has(&self, tags: &[String], name: &str) -> bool {
        lookup_tag(tags, &self.prefixed_name(name)).is_some()
    }

    /// Resolve an attribute as a boolean.
    pub fn get_bool(&self, tags: &[String], name: &str, default: bool) -> bool {
        match lookup_tag(tags, &self.prefixed_name(name)) {
            None => default,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                warn!(attribute = name, value = raw, default, "Invalid boolean attribute, using default");
                default
            }),
        }
    }

    /// Resolve an attribute as a 32-bit integer.
    pub fn get_int(&self, tags: &[String], name: &str, default: i32) -> i32 {
        self.parse_number(tags, name, default)
    }

    /// Resolve an attribute as a 64-bit integer.
    pub fn get_int64(&self, tags: &[String], name: &str, default: i64) -> i64 {
        self.parse_number(tags, name, default)
    }

    /// Resolve a comma separated attribute.
    ///
    /// Returns `None` when the attribute is absent or resolves to an empty
    /// string, which lets callers tell "no value" apart from a present list.
    pub fn get_slice(&self, tags: &[String], name: &str) -> Option<Vec<String>> {
        split_list(&self.get(tags, name, ""))
    }

    fn parse_number<N>(&self, tags: &[String], name: &str, default: N) -> N
    where
        N: std::str::FromStr + std::fmt::Display + Copy,
    {
        match lookup_tag(tags, &self.prefixed_name(name)) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(attribute = name, value = raw, %default, "Invalid numeric attribute, using default");
                default
            }),
        }
    }
}

impl Default for AttributeResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

/// Find the value of the tag whose key is `name`.
///
/// Bare marker tags resolve to an empty string.
pub fn lookup_tag<'a>(tags: &'a [String], name: &str) -> Option<&'a str> {
    let mut folded: Option<&'a str> = None;
    for tag in tags {
        let (key, value) = match tag.split_once('=') {
            Some((key, value)) => (key, value),
            None => (tag.as_str(), ""),
        };
        if key == name {
            return Some(value);
        }
        if folded.is_none() && key.eq_ignore_ascii_case(name) {
            folded = Some(value);
        }
    }
    folded
}

/// Resolve an unprefixed tag value, falling back to `default`.
pub fn get_tag(tags: &[String], name: &str, default: &str) -> String {
    lookup_tag(tags, name).unwrap_or(default).to_string()
}

/// Whether an unprefixed tag is present.
pub fn has_tag(tags: &[String], name: &str) -> bool {
    lookup_tag(tags, name).is_some()
}

/// Split a comma separated value, trimming items and dropping empty ones.
pub fn split_list(raw: &str) -> Option<Vec<String>> {
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Parse the boolean spellings accepted by Consul-era tooling.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
