//! Semantic version parsing and total ordering.
//!
//! Version strings coming from developers and hosts are looser than strict
//! SemVer: `v1.2.3`, `8.1` and `7` all appear in practice. [`parse`] pads the
//! numeric core to three components before handing the string to `semver`,
//! and [`compare`] orders anything, parseable or not, so it can back a stable
//! "latest" query.

use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Parse a version string leniently.
///
/// Accepts an optional `v` prefix and one to three numeric core components;
/// pre-release and build suffixes follow SemVer rules.
pub fn parse(input: &str) -> Option<semver::Version> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if parts
        .iter()
        .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    semver::Version::parse(&padded).ok()
}

/// Parse a version string, failing with a validation error naming `field`.
pub fn require(field: &'static str, input: &str) -> Result<semver::Version> {
    parse(input)
        .ok_or_else(|| Error::validation(field, format!("'{input}' is not a semantic version")))
}

/// Canonical string form of a version (`v1.2` becomes `1.2.0`).
pub fn normalize(input: &str) -> Option<String> {
    parse(input).map(|v| v.to_string())
}

/// Total order over version strings.
///
/// Numeric cores compare component-wise; with equal cores a pre-release
/// sorts before the release. Build metadata is ignored. Unparseable strings
/// sort before every parseable one and compare lexically among themselves.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => precedence(&a, &b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.trim().cmp(b.trim()),
    }
}

/// `compare` expressed as -1, 0 or 1.
pub fn compare_sign(a: &str, b: &str) -> i8 {
    match compare(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn precedence(a: &semver::Version, b: &semver::Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_components_compare_in_order() {
        assert_eq!(compare_sign("1.0.0", "1.0.1"), -1);
        assert_eq!(compare_sign("2.0.0", "1.9.9"), 1);
        assert_eq!(compare_sign("1.0.0", "1.0.0"), 0);
        assert_eq!(compare_sign("1.10.0", "1.9.0"), 1);
    }

    #[test]
    fn release_outranks_prerelease() {
        assert_eq!(compare_sign("1.0.0", "1.0.0-beta.1"), 1);
        assert_eq!(compare_sign("1.0.0-alpha", "1.0.0-beta"), -1);
        assert_eq!(compare_sign("1.0.0-beta.2", "1.0.0-beta.11"), -1);
        assert_eq!(compare_sign("1.0.0-rc.1", "0.9.9"), 1);
    }

    #[test]
    fn short_and_prefixed_forms_are_padded() {
        assert_eq!(compare("8.1", "8.1.0"), Ordering::Equal);
        assert_eq!(compare("v2", "2.0.0"), Ordering::Equal);
        assert_eq!(normalize("v1.2").as_deref(), Some("1.2.0"));
        assert_eq!(normalize("1.2-beta").as_deref(), Some("1.2.0-beta"));
    }

    #[test]
    fn build_metadata_does_not_affect_order() {
        assert_eq!(compare("1.0.0+build.5", "1.0.0+build.9"), Ordering::Equal);
    }

    #[test]
    fn garbage_is_ordered_below_versions() {
        assert!(parse("latest").is_none());
        assert!(parse("1..2").is_none());
        assert!(parse("1.2.3.4").is_none());
        assert_eq!(compare("latest", "0.0.1"), Ordering::Less);
        assert_eq!(compare("0.0.1", "latest"), Ordering::Greater);
        assert_eq!(compare("abc", "abd"), Ordering::Less);
    }

    #[test]
    fn ordering_is_antisymmetric_and_transitive() {
        let samples = [
            "0.1.0",
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-beta",
            "1.0.0",
            "1.0.1",
            "1.1",
            "2.0.0-rc.1",
            "2.0.0",
            "nonsense",
        ];
        for a in samples {
            for b in samples {
                assert_eq!(compare_sign(a, b), -compare_sign(b, a), "{a} vs {b}");
                for c in samples {
                    if compare(a, b) != Ordering::Greater && compare(b, c) != Ordering::Greater {
                        assert_ne!(compare(a, c), Ordering::Greater, "{a} <= {b} <= {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn require_names_the_field() {
        let err = require("version", "one point oh").unwrap_err();
        assert!(err.to_string().contains("version"));
    }
}
