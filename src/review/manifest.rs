//! Validation of the package's `manifest.json`.

use serde_json::Value;

use crate::review::{Check, Package, Report};
use crate::version;

/// File name of the package manifest, at the package root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifests larger than this are not parsed.
const MAX_MANIFEST_BYTES: usize = 64 * 1024;

/// Resources a plugin may request access to.
pub const KNOWN_RESOURCES: &[&str] = &[
    "orders", "products", "customers", "inventory", "payments", "shipping", "files",
    "settings", "reports", "webhooks",
];

/// Access levels a plugin may request for a resource.
pub const KNOWN_ACCESS_LEVELS: &[&str] = &["read", "write", "delete"];

/// Constraint a manifest field must satisfy.
#[derive(Debug, Clone, Copy)]
pub enum FieldRule {
    /// A non-blank string.
    Text,
    /// Lowercase letters, digits, `-`, `_` and `.`, starting with a letter.
    Identifier,
    /// A parseable semantic version.
    Version,
    /// An array of `resource.access` permission scopes.
    Scopes,
}

/// Required manifest fields and their constraints, in reporting order.
pub const FIELD_RULES: &[(&str, FieldRule)] = &[
    ("id", FieldRule::Identifier),
    ("name", FieldRule::Text),
    ("version", FieldRule::Version),
    ("description", FieldRule::Text),
    ("author", FieldRule::Text),
    ("license", FieldRule::Text),
    ("category", FieldRule::Text),
    ("permissions", FieldRule::Scopes),
];

impl FieldRule {
    /// Check `value`; `Err` carries a description of the violation.
    pub fn check(self, value: Option<&Value>) -> Result<(), String> {
        let value = match value {
            None | Some(Value::Null) => return Err("is missing".to_string()),
            Some(value) => value,
        };

        match self {
            FieldRule::Text => match value.as_str() {
                Some(s) if !s.trim().is_empty() => Ok(()),
                Some(_) => Err("is blank".to_string()),
                None => Err("must be a string".to_string()),
            },
            FieldRule::Identifier => {
                let s = value.as_str().ok_or("must be a string")?;
                let valid = s.chars().next().is_some_and(|c| c.is_ascii_lowercase())
                    && s.chars().all(|c| {
                        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
                    });
                if valid {
                    Ok(())
                } else {
                    Err(format!("'{s}' is not a valid identifier"))
                }
            }
            FieldRule::Version => {
                let s = value.as_str().ok_or("must be a string")?;
                version::parse(s)
                    .map(|_| ())
                    .ok_or_else(|| format!("'{s}' is not a semantic version"))
            }
            FieldRule::Scopes => {
                let scopes = value.as_array().ok_or("must be an array of scopes")?;
                for scope in scopes {
                    let scope = scope.as_str().ok_or("must contain only strings")?;
                    check_scope(scope)?;
                }
                Ok(())
            }
        }
    }
}

fn check_scope(scope: &str) -> Result<(), String> {
    let (resource, access) = scope
        .split_once('.')
        .ok_or_else(|| format!("scope '{scope}' is not of the form resource.access"))?;
    if !KNOWN_RESOURCES.contains(&resource) {
        return Err(format!("scope '{scope}' names unknown resource '{resource}'"));
    }
    if !KNOWN_ACCESS_LEVELS.contains(&access) {
        return Err(format!("scope '{scope}' names unknown access level '{access}'"));
    }
    Ok(())
}

pub(crate) fn run(package: &Package, expected_version: &str, report: &mut Report) {
    let category = Check::Manifest.category();

    let manifest = match parse(package) {
        Ok(manifest) => {
            report.pass(category, "manifest_present", format!("Found {MANIFEST_FILE}"));
            report.pass(category, "manifest_parses", "Manifest is a JSON object");
            manifest
        }
        Err(Unusable::Missing) => {
            report.fail(category, "manifest_present", format!("Package has no {MANIFEST_FILE}"));
            skip_rest(report, "manifest_parses");
            return;
        }
        Err(Unusable::Malformed(reason)) => {
            report.pass(category, "manifest_present", format!("Found {MANIFEST_FILE}"));
            report.fail(category, "manifest_parses", format!("Manifest is malformed: {reason}"));
            skip_rest(report, "");
            return;
        }
    };

    for (field, rule) in FIELD_RULES {
        let name = format!("manifest_field_{field}");
        match rule.check(manifest.get(*field)) {
            Ok(()) => report.pass(category, &name, format!("Manifest {field} is valid")),
            Err(reason) => report.fail(category, &name, format!("Manifest {field} {reason}")),
        }
    }

    let declared = manifest.get("version").and_then(Value::as_str);
    match declared {
        Some(declared)
            if version::parse(declared).is_some()
                && version::compare(declared, expected_version).is_eq() =>
        {
            report.pass(
                category,
                "manifest_version_matches",
                format!("Manifest declares version {declared}"),
            );
        }
        Some(declared) => report.fail(
            category,
            "manifest_version_matches",
            format!("Manifest declares version {declared}, submission is for {expected_version}"),
        ),
        None => report.skip(category, "manifest_version_matches", "manifest has no version"),
    }
}

enum Unusable {
    Missing,
    Malformed(String),
}

fn parse(package: &Package) -> Result<serde_json::Map<String, Value>, Unusable> {
    let bytes = package.manifest.as_deref().ok_or(Unusable::Missing)?;
    if bytes.len() > MAX_MANIFEST_BYTES {
        return Err(Unusable::Malformed(format!(
            "{} bytes exceeds the {MAX_MANIFEST_BYTES} byte limit",
            bytes.len()
        )));
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Unusable::Malformed("top level is not an object".to_string())),
        Err(e) => Err(Unusable::Malformed(e.to_string())),
    }
}

/// Record every check after `after` as skipped, so a broken manifest scores
/// the same number of checks as a good one.
fn skip_rest(report: &mut Report, after: &str) {
    let category = Check::Manifest.category();
    if !after.is_empty() {
        report.skip(category, after, "manifest unavailable");
    }
    for (field, _) in FIELD_RULES {
        report.skip(category, &format!("manifest_field_{field}"), "manifest unavailable");
    }
    report.skip(category, "manifest_version_matches", "manifest unavailable");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::review::tests::GOOD_MANIFEST;

    fn report_for(manifest: Option<&str>, expected: &str) -> Report {
        let package = Package {
            manifest: manifest.map(|m| m.as_bytes().to_vec()),
            ..Package::default()
        };
        let mut report = Report::default();
        run(&package, expected, &mut report);
        report
    }

    #[test]
    fn good_manifest_passes_every_check() {
        let report = report_for(Some(GOOD_MANIFEST), "1.2.0");
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(report.checks.len(), 2 + FIELD_RULES.len() + 1);
    }

    #[test]
    fn missing_and_malformed_manifests_score_the_same_checks() {
        let missing = report_for(None, "1.2.0");
        let malformed = report_for(Some("{\"id\": "), "1.2.0");
        assert_eq!(missing.checks.len(), malformed.checks.len());
        assert_eq!(missing.issues, vec!["Package has no manifest.json"]);
        assert_eq!(malformed.issues.len(), 1);
        assert!(malformed.issues[0].starts_with("Manifest is malformed"));
    }

    #[test]
    fn version_mismatch_is_blocking() {
        let report = report_for(Some(GOOD_MANIFEST), "2.0.0");
        assert_eq!(
            report.issues,
            vec!["Manifest declares version 1.2.0, submission is for 2.0.0"]
        );
    }

    #[test]
    fn incomplete_manifest_names_each_field() {
        let report = report_for(Some(r#"{"id": "x", "version": "1.0.0", "permissions": []}"#), "1.0.0");
        for field in ["name", "description", "author", "license", "category"] {
            assert!(
                report.issues.contains(&format!("Manifest {field} is missing")),
                "{field}: {:?}",
                report.issues
            );
        }
    }

    #[test]
    fn field_rules() {
        assert!(FieldRule::Identifier.check(Some(&json!("order-export"))).is_ok());
        assert!(FieldRule::Identifier.check(Some(&json!("9lives"))).is_err());
        assert!(FieldRule::Text.check(Some(&json!("  "))).is_err());
        assert!(FieldRule::Text.check(Some(&json!(42))).is_err());
        assert!(FieldRule::Version.check(Some(&json!("1.0"))).is_ok());
        assert!(FieldRule::Scopes.check(Some(&json!(["orders.read"]))).is_ok());
        assert_eq!(
            FieldRule::Scopes.check(Some(&json!(["orders.sudo"]))).unwrap_err(),
            "scope 'orders.sudo' names unknown access level 'sudo'"
        );
        assert!(FieldRule::Scopes.check(Some(&json!("orders.read"))).is_err());
        assert_eq!(FieldRule::Text.check(None).unwrap_err(), "is missing");
    }
}
