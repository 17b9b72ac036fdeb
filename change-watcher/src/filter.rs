//! Include/exclude pattern filtering.
//!
//! Patterns are unanchored regular expressions searched anywhere in the raw
//! event path. A pattern that fails to compile never matches; it does not
//! stop the remaining patterns from being evaluated.

use regex::Regex;
use tracing::warn;

/// Whether `path` should trigger a reaction.
///
/// True iff `path` matches at least one include pattern and no exclude
/// pattern. An empty include list never accepts anything.
pub fn should_act<S: AsRef<str>>(include: &[S], exclude: &[S], path: &str) -> bool {
    matches_any(include, path) && !matches_any(exclude, path)
}

/// Whether any of `patterns` is found in `path`.
pub fn matches_any<S: AsRef<str>>(patterns: &[S], path: &str) -> bool {
    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref();
        match Regex::new(pattern) {
            Ok(re) => re.is_match(path),
            Err(e) => {
                warn!("Ignoring invalid pattern {pattern:?}: {e}");
                false
            }
        }
    })
}

/// An include/exclude pair taken from one configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl PatternSet {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// See [`should_act`].
    pub fn accepts(&self, path: &str) -> bool {
        should_act(&self.include, &self.exclude, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_and_exclude() {
        let include = [r"\.log$"];
        let exclude = ["tmp"];

        assert!(should_act(&include, &exclude, "/data/a.log"));
        assert!(!should_act(&include, &exclude, "/data/a.tmp"));
        assert!(!should_act(&include, &exclude, "/data/tmp/a.log"));
        assert!(!should_act(&include, &exclude, "/data/a.txt"));
    }

    #[test]
    fn test_empty_include_never_accepts() {
        let none: [&str; 0] = [];
        assert!(!should_act(&none, &none, "/data/a.log"));
        assert!(!should_act(&none, &none, ""));
    }

    #[test]
    fn test_substring_search_not_anchored() {
        assert!(should_act(&["data"], &[], "/srv/data/file"));
        assert!(should_act(&["a.l"], &[], "/x/a.log"));
    }

    #[test]
    fn test_malformed_pattern_is_non_matching() {
        assert!(should_act(&["(unclosed", r"\.log$"], &[], "/data/a.log"));
        assert!(!should_act(&["(unclosed"], &[], "/data/(unclosed"));
        assert!(should_act(&[r"\.log$"], &["[z-a]"], "/data/a.log"));
        assert!(!should_act(&[r"\.log$"], &["[z-a]", "a"], "/data/a.log"));
    }

    #[test]
    fn test_pattern_set() {
        let set = PatternSet::new(vec![r"\.rs$".to_string()], vec!["target".to_string()]);
        assert!(set.accepts("src/main.rs"));
        assert!(!set.accepts("target/debug/build.rs"));
        assert!(!PatternSet::default().accepts("src/main.rs"));
    }
}
