//! # Chart Versions
//!
//! Lenient semantic-version handling for chart repository indexes.
//!
//! Published chart versions are frequently not strict semver (`v1.2`, `2`,
//! `1.0.0.1`). Parsing strips a leading `v` and pads missing components; anything
//! that still fails to parse sorts below every valid version and compares as text.

use semver::{Version, VersionReq};
use std::cmp::Ordering;

/// Parse `raw` as a semantic version, tolerating a `v` prefix and missing components
pub fn parse_lenient(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    // Split off pre-release/build suffix before padding the numeric core
    let suffix_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(suffix_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    let mut padded: Vec<String> = parts
        .iter()
        .map(|p| p.trim_start_matches('0'))
        .map(|p| if p.is_empty() { "0".to_string() } else { p.to_string() })
        .collect();
    padded.resize(3, "0".to_string());
    Version::parse(&format!("{}{}", padded.join("."), suffix)).ok()
}

/// Total order over version strings; semantic when both parse
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_lenient(a), parse_lenient(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Two version strings denote the same version
pub fn versions_equal(a: &str, b: &str) -> bool {
    compare_versions(a, b) == Ordering::Equal
}

/// Sort newest first
pub fn sort_descending<T>(items: &mut [T], version_of: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| compare_versions(version_of(b), version_of(a)));
}

/// Parse a chart-style constraint such as `>= 1.2, < 2` or `^1.0 || ~2.3`.
///
/// Whitespace-separated terms are joined with AND, `||` separates alternatives.
pub fn parse_constraint(raw: &str) -> Result<Vec<VersionReq>, semver::Error> {
    raw.split("||")
        .map(|alternative| VersionReq::parse(&normalize_constraint(alternative)))
        .collect()
}

/// `version` satisfies at least one alternative
pub fn constraint_matches(alternatives: &[VersionReq], version: &str) -> bool {
    let Some(version) = parse_lenient(version) else {
        return false;
    };
    alternatives.iter().any(|req| req.matches(&version))
}

fn normalize_constraint(alternative: &str) -> String {
    let mut terms: Vec<String> = Vec::new();
    let mut pending_operator = String::new();
    for token in alternative
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '!' | '~' | '^')) {
            pending_operator.push_str(token);
            continue;
        }
        let operator = std::mem::take(&mut pending_operator);
        let operator = if operator == "==" { "=".to_string() } else { operator };
        let token = token.strip_prefix('v').unwrap_or(token);
        terms.push(format!("{operator}{token}"));
    }
    if terms.is_empty() {
        "*".to_string()
    } else {
        terms.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lenient_pads_and_strips() {
        assert_eq!(parse_lenient("v1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_lenient("2"), Some(Version::new(2, 0, 0)));
        assert_eq!(parse_lenient("1.0.0"), Some(Version::new(1, 0, 0)));
        assert!(parse_lenient("1.2-rc.1").is_some_and(|v| !v.pre.is_empty()));
        assert_eq!(parse_lenient("latest"), None);
        assert_eq!(parse_lenient("1.0.0.1"), None);
    }

    #[test]
    fn test_sort_descending_semantic() {
        let mut versions = vec!["1.9.0", "1.10.0", "v2", "1.10.0-rc.1", "nightly"];
        sort_descending(&mut versions, |v| v);
        assert_eq!(versions, vec!["v2", "1.10.0", "1.10.0-rc.1", "1.9.0", "nightly"]);
    }

    #[test]
    fn test_versions_equal_semantic() {
        assert!(versions_equal("v1.0", "1.0.0"));
        assert!(!versions_equal("1.0.1", "1.0.0"));
    }

    #[test]
    fn test_constraint_with_spaces_and_alternatives() {
        let reqs = parse_constraint(">= 2.0.0").unwrap();
        assert!(!constraint_matches(&reqs, "1.0.0"));
        assert!(constraint_matches(&reqs, "2.0.0"));

        let reqs = parse_constraint(">= 1.0 < 2.0 || ^3").unwrap();
        assert!(constraint_matches(&reqs, "1.5.0"));
        assert!(!constraint_matches(&reqs, "2.1.0"));
        assert!(constraint_matches(&reqs, "3.4.0"));
    }

    #[test]
    fn test_invalid_constraint_errors() {
        assert!(parse_constraint(">= banana").is_err());
    }
}
