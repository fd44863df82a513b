//! Identifier rules for variable and script names.

use std::sync::OnceLock;

use regex::Regex;

/// Longest identifier the engine accepts.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const KEYWORDS: &[&str] = &[
    "break",
    "case",
    "catch",
    "classdef",
    "continue",
    "else",
    "elseif",
    "end",
    "for",
    "function",
    "global",
    "if",
    "otherwise",
    "parfor",
    "persistent",
    "return",
    "spmd",
    "switch",
    "try",
    "while",
];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// A letter followed by letters, digits or underscores, not a keyword.
pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LEN && identifier_pattern().is_match(name) && !is_keyword(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["x", "signal_2", "A1b"] {
            assert!(is_valid_identifier(name), "{name}");
        }
    }

    #[test]
    fn rejects_bad_names() {
        for name in ["", "2x", "_x", "a-b", "a b", "end", "for", "../etc"] {
            assert!(!is_valid_identifier(name), "{name}");
        }
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }
}
