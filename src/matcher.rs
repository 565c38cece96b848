//! Tagged-line expectation patterns.
//!
//! The monitored tool prefixes every line meant for automation with a tag
//! such as `[runmon] `. A caller's pattern only ever matches after that tag,
//! anchored at the start of the line and case-insensitive.

use regex::{Regex, RegexBuilder};

use crate::error::Result;

/// Tag used by the monitored tool when none is configured.
pub const DEFAULT_TAG: &str = "runmon";

/// A compiled `^\[tag\]\s*<pattern>` matcher.
#[derive(Debug, Clone)]
pub struct ExpectPattern {
    regex: Regex,
}

impl ExpectPattern {
    /// Compile `pattern` behind the default `[runmon]` tag.
    pub fn new(pattern: &str) -> Result<Self> {
        Self::with_tag(DEFAULT_TAG, pattern)
    }

    /// Compile `pattern` behind `[tag]`. The tag is matched literally.
    pub fn with_tag(tag: &str, pattern: &str) -> Result<Self> {
        let source = format!(r"^\[{}\]\s*{}", regex::escape(tag), pattern);
        let regex = RegexBuilder::new(&source).case_insensitive(true).build()?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_line_matches_case_insensitively() {
        let p = ExpectPattern::new("started").unwrap();
        assert!(p.is_match("[RUNMON] Started successfully"));
        assert!(p.is_match("[runmon] started"));
    }

    #[test]
    fn untagged_line_is_invisible() {
        let p = ExpectPattern::new("started").unwrap();
        assert!(!p.is_match("Started successfully"));
    }

    #[test]
    fn tag_must_start_the_line() {
        let p = ExpectPattern::new("started").unwrap();
        assert!(!p.is_match("note: [runmon] started"));
    }

    #[test]
    fn whitespace_after_tag_is_optional() {
        let p = ExpectPattern::new("ready").unwrap();
        assert!(p.is_match("[runmon]ready"));
        assert!(p.is_match("[runmon]\t  ready"));
    }

    #[test]
    fn tag_present_but_inner_pattern_missing() {
        let p = ExpectPattern::new("restarting").unwrap();
        assert!(!p.is_match("[runmon] watching 3 files"));
    }

    #[test]
    fn inner_pattern_supports_regex_syntax() {
        let p = ExpectPattern::new(r"watching \d+ files?").unwrap();
        assert!(p.is_match("[runmon] Watching 12 files"));
        assert!(!p.is_match("[runmon] watching many files"));
    }

    #[test]
    fn custom_tag_is_escaped() {
        let p = ExpectPattern::with_tag("a.b", "go").unwrap();
        assert!(p.is_match("[a.b] go"));
        assert!(!p.is_match("[axb] go"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(ExpectPattern::new("(oops").is_err());
    }
}
