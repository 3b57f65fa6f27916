//! Event-name normalization and wildcard pattern matching.
//!
//! Event names and the patterns listeners are registered under share one
//! canonical form: lowercase. A pattern may contain any number of `*`
//! wildcards, each standing for zero or more arbitrary characters. A pattern
//! only matches when it covers the *entire* event name.
//!
//! # Examples
//!
//! ```rust
//! use observer::pattern::{matches, Pattern};
//!
//! assert!(matches("foo*bar*", "FoolishBarFly"));
//! assert!(!matches("foo*bar", "foolishbarfly"));
//!
//! let pattern = Pattern::compile("user:*").unwrap();
//! assert!(pattern.matches("user:login"));
//! ```

use crate::error::{PatternError, PatternResult};
use regex::Regex;

/// The wildcard character recognised in patterns.
pub const WILDCARD: char = '*';

/// Returns the canonical form of an event name or pattern.
pub fn normalize(name: &str) -> String {
    name.to_lowercase()
}

/// Builds the anchored regex source for a normalized pattern.
///
/// Literal segments are escaped, so the only special character a pattern
/// carries is the wildcard.
pub fn escape(pattern: &str) -> String {
    let body = pattern
        .split(WILDCARD)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    format!("^(?s:{body})$")
}

/// Tests whether `pattern` matches the fired `event` name.
///
/// Both sides are normalized first. Exact equality is always tried before
/// the wildcard matcher.
pub fn matches(pattern: &str, event: &str) -> bool {
    Pattern::compile(pattern)
        .map(|compiled| compiled.matches(&normalize(event)))
        .unwrap_or(false)
}

/// A normalized pattern together with its compiled wildcard matcher.
#[derive(Debug, Clone)]
pub struct Pattern {
    key: String,
    matcher: Option<Regex>,
}

impl Pattern {
    /// Normalizes and compiles a pattern.
    ///
    /// Patterns without a wildcard carry no matcher and only match their own
    /// normalized name.
    pub fn compile(pattern: &str) -> PatternResult<Self> {
        let key = normalize(pattern);

        let matcher = if key.contains(WILDCARD) {
            let compiled = Regex::new(&escape(&key)).map_err(|source| PatternError::Compile {
                pattern: key.clone(),
                source,
            })?;
            Some(compiled)
        } else {
            None
        };

        Ok(Self { key, matcher })
    }

    /// Returns the canonical pattern string listeners are stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns whether this pattern contains a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.matcher.is_some()
    }

    /// Tests an already normalized event name against this pattern.
    pub fn matches(&self, event: &str) -> bool {
        if self.key == event {
            return true;
        }

        match &self.matcher {
            Some(matcher) => matcher.is_match(event),
            None => false,
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Pattern {}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases() {
        assert_eq!(normalize("Test:AddObserver"), "test:addobserver");
        assert_eq!(normalize("already:lower"), "already:lower");
    }

    #[test]
    fn test_exact_match() {
        let pattern = Pattern::compile("Test:Event").unwrap();
        assert!(!pattern.is_wildcard());
        assert!(pattern.matches("test:event"));
        assert!(!pattern.matches("test:event2"));
        assert!(!pattern.matches("test:even"));
    }

    #[test]
    fn test_wildcard_matches_whole_name() {
        let pattern = Pattern::compile("foo*bar*").unwrap();
        assert!(pattern.is_wildcard());
        assert!(pattern.matches("foolishbarfly"));
        assert!(pattern.matches("foobar"));
        assert!(!pattern.matches("xfoobar"));

        let anchored = Pattern::compile("foo*bar").unwrap();
        assert!(!anchored.matches("foolishbarfly"));
    }

    #[test]
    fn test_wildcard_literal_name_takes_fast_path() {
        assert!(matches("foo*bar*", "foo*bar*"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = Pattern::compile("a.b*").unwrap();
        assert!(pattern.matches("a.bc"));
        assert!(!pattern.matches("axbc"));

        assert!(!matches("a.b", "axb"));
        assert!(matches("(x)+*", "(x)+yz"));
    }

    #[test]
    fn test_lone_wildcard_matches_everything() {
        let pattern = Pattern::compile("*").unwrap();
        assert!(pattern.matches("anything:at:all"));
        assert!(pattern.matches("line\nbreak"));
    }

    #[test]
    fn test_free_matches_normalizes_both_sides() {
        assert!(matches("User:*", "USER:Login"));
        assert!(!matches("user:*", "admin:login"));
    }
}
