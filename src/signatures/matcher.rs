//! Content match verification
//!
//! Single-pattern byte matching against reconstructed application-layer
//! buffers. Multi-pattern pre-filtering happens in the first-pass matcher,
//! before signatures ever reach the stateful engine; here every pattern is
//! verified individually.

/// A content pattern to verify against a buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentMatch {
    /// Pattern bytes to match
    pub pattern: Vec<u8>,

    /// Case insensitive matching
    pub nocase: bool,

    /// Negated match (pattern must NOT occur)
    pub negated: bool,
}

impl ContentMatch {
    /// Create a case-sensitive, non-negated pattern
    pub fn new(pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: pattern.into(),
            nocase: false,
            negated: false,
        }
    }

    /// Match case-insensitively
    pub fn nocase(mut self) -> Self {
        self.nocase = true;
        self
    }

    /// Negate the match
    pub fn negated(mut self) -> Self {
        self.negated = true;
        self
    }

    /// Verify this pattern against a buffer
    pub fn matches(&self, buffer: &[u8]) -> bool {
        let found = if self.nocase {
            find_nocase(buffer, &self.pattern).is_some()
        } else {
            find_bytes(buffer, &self.pattern).is_some()
        };
        found != self.negated
    }
}

/// Verify that every pattern in a list matches the buffer
pub fn match_all(contents: &[ContentMatch], buffer: &[u8]) -> bool {
    contents.iter().all(|cm| cm.matches(buffer))
}

/// Case-sensitive byte pattern search
#[inline]
pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Case-insensitive byte pattern search (ASCII)
#[inline]
pub(crate) fn find_nocase(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}
