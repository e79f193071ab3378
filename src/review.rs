//! Automated review of submitted packages.
//!
//! Runs a fixed battery of checks against an extracted package directory and
//! scores the result. The pipeline treats the package as hostile: nothing in
//! it can make a run fail, every problem is reported as an issue or warning.

use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stallkeep_core::{CheckCategory, CheckResult, ReviewResult, Submission};
use tracing::{info, warn};
use walkdir::WalkDir;

pub mod manifest;
pub mod security;
pub mod structure;

const WEIGHT_SECURITY: u32 = 50;
const WEIGHT_QUALITY: u32 = 30;
const WEIGHT_STRUCTURE: u32 = 20;

/// Resource limits for one review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewLimits {
    /// Files larger than this are not read (default: 1 MiB).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Walking stops after this many files (default: 5000).
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_max_files() -> usize {
    5000
}

impl Default for ReviewLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_files: default_max_files(),
        }
    }
}

/// The checks every review runs, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    SecurityPatterns,
    Manifest,
    Structure,
}

impl Check {
    pub const ALL: [Check; 3] = [Check::SecurityPatterns, Check::Manifest, Check::Structure];

    pub fn category(self) -> CheckCategory {
        match self {
            Check::SecurityPatterns => CheckCategory::Security,
            Check::Manifest => CheckCategory::Quality,
            Check::Structure => CheckCategory::Structure,
        }
    }

    fn run(self, package: &Package, expected_version: &str, report: &mut Report) {
        match self {
            Check::SecurityPatterns => security::run(package, report),
            Check::Manifest => manifest::run(package, expected_version, report),
            Check::Structure => structure::run(package, report),
        }
    }
}

fn weight(category: CheckCategory) -> u32 {
    match category {
        CheckCategory::Security => WEIGHT_SECURITY,
        CheckCategory::Quality => WEIGHT_QUALITY,
        CheckCategory::Structure => WEIGHT_STRUCTURE,
    }
}

/// Accumulates check results while a review runs.
#[derive(Debug, Default)]
pub(crate) struct Report {
    checks: Vec<CheckResult>,
    issues: Vec<String>,
    warnings: Vec<String>,
}

impl Report {
    fn record(&mut self, category: CheckCategory, name: &str, passed: bool, blocking: bool, message: String) {
        self.checks.push(CheckResult {
            category,
            name: name.to_string(),
            passed,
            blocking,
            message,
        });
    }

    pub(crate) fn pass(&mut self, category: CheckCategory, name: &str, message: impl Into<String>) {
        self.record(category, name, true, true, message.into());
    }

    /// A failed blocking check; the message becomes an issue.
    pub(crate) fn fail(&mut self, category: CheckCategory, name: &str, message: impl Into<String>) {
        let message = message.into();
        self.issues.push(message.clone());
        self.record(category, name, false, true, message);
    }

    /// A failed blocking check whose cause was already reported.
    pub(crate) fn skip(&mut self, category: CheckCategory, name: &str, reason: &str) {
        self.record(category, name, false, true, format!("Skipped: {reason}"));
    }

    /// A failed non-blocking check; the message becomes a warning.
    pub(crate) fn warn(&mut self, category: CheckCategory, name: &str, message: impl Into<String>) {
        let message = message.into();
        self.warnings.push(message.clone());
        self.record(category, name, false, false, message);
    }

    pub(crate) fn pass_advisory(&mut self, category: CheckCategory, name: &str, message: impl Into<String>) {
        self.record(category, name, true, false, message.into());
    }

    pub(crate) fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn score(&self) -> u8 {
        let mut total = 0u32;
        for category in CheckCategory::ALL {
            let in_category: Vec<&CheckResult> =
                self.checks.iter().filter(|c| c.category == *category).collect();
            let w = weight(*category);
            if in_category.is_empty() {
                total += w;
                continue;
            }
            let passed = in_category.iter().filter(|c| c.passed).count() as u32;
            total += w * passed / in_category.len() as u32;
        }
        total.min(100) as u8
    }

    fn passed(&self) -> bool {
        self.issues.is_empty() && self.checks.iter().all(|c| c.passed || !c.blocking)
    }
}

/// A source file read from the package.
#[derive(Debug, Clone)]
pub(crate) struct SourceFile {
    /// Path relative to the package root, `/`-separated.
    pub rel: String,
    /// Lossily decoded content.
    pub content: String,
}

/// What one walk of the package directory found.
#[derive(Debug, Default)]
pub(crate) struct Package {
    pub root: PathBuf,
    /// Why the root could not be walked, if it could not.
    pub load_error: Option<String>,
    pub sources: Vec<SourceFile>,
    /// Raw `manifest.json` bytes, if a regular file of that name sits at the root.
    pub manifest: Option<Vec<u8>>,
    /// Source files, or unreadable parts of the tree, that were not scanned.
    pub unscanned: Vec<String>,
    pub file_count: usize,
    pub fingerprint: Option<String>,
}

impl Package {
    /// Walk `root` without following symlinks.
    ///
    /// Non-source entries that cannot be used are reported into `report` as
    /// warnings. Source files that cannot be scanned, whether oversized,
    /// unreadable or past the file limit, land in `unscanned` instead.
    pub(crate) fn load(root: &Path, limits: &ReviewLimits, report: &mut Report) -> Self {
        let mut package = Package {
            root: root.to_path_buf(),
            ..Package::default()
        };

        match std::fs::symlink_metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                package.load_error = Some(format!(
                    "Package path {} is not a directory",
                    root.display()
                ));
                return package;
            }
            Err(e) => {
                package.load_error = Some(format!(
                    "Package path {} is not readable: {e}",
                    root.display()
                ));
                return package;
            }
        }

        let mut entries: Vec<(String, PathBuf, u64)> = Vec::new();
        let mut over_limit = false;
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // An unreadable directory may hide sources.
                    let at = e
                        .path()
                        .map(|p| relative(root, p))
                        .unwrap_or_else(|| "<unknown>".to_string());
                    package.unscanned.push(format!("{at} (unreadable: {e})"));
                    continue;
                }
            };
            let rel = relative(root, entry.path());
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                report.warning(format!("Skipped symlink {rel}"));
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if entries.len() >= limits.max_files {
                if !over_limit {
                    over_limit = true;
                    report.warning(format!(
                        "Stopped reading after {} files",
                        limits.max_files
                    ));
                }
                if security::is_source_file(&rel) {
                    package
                        .unscanned
                        .push(format!("{rel} (past the {} file limit)", limits.max_files));
                }
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push((rel, entry.into_path(), size));
        }

        let mut hasher = Sha256::new();
        for (rel, path, size) in entries {
            package.file_count += 1;
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);

            let source = security::is_source_file(&rel);
            if size > limits.max_file_bytes {
                let reason = format!("{size} bytes exceeds the {} byte limit", limits.max_file_bytes);
                if source {
                    package.unscanned.push(format!("{rel} ({reason})"));
                } else {
                    report.warning(format!("Skipped {rel}: {reason}"));
                }
                hasher.update(size.to_le_bytes());
                continue;
            }

            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if source => {
                    package.unscanned.push(format!("{rel} (unreadable: {e})"));
                    continue;
                }
                Err(e) => {
                    report.warning(format!("Could not read {rel}: {e}"));
                    continue;
                }
            };
            hasher.update(&bytes);
            hasher.update([0u8]);

            if rel == manifest::MANIFEST_FILE {
                package.manifest = Some(bytes.clone());
            }
            if source {
                package.sources.push(SourceFile {
                    rel,
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
        }
        package.fingerprint = Some(hex::encode(hasher.finalize()));
        package
    }
}

fn relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Runs the automated checks against extracted packages.
#[derive(Debug, Clone, Default)]
pub struct ReviewPipeline {
    limits: ReviewLimits,
}

impl ReviewPipeline {
    pub fn new(limits: ReviewLimits) -> Self {
        Self { limits }
    }

    /// Review the package at `package_path` for `submission`.
    pub fn run(&self, submission: &Submission, package_path: &Path) -> ReviewResult {
        self.review(&submission.version, package_path)
    }

    /// Review the package at `package_path`, expecting its manifest to
    /// declare `expected_version`.
    pub fn review(&self, expected_version: &str, package_path: &Path) -> ReviewResult {
        let mut report = Report::default();
        let package = Package::load(package_path, &self.limits, &mut report);

        for check in Check::ALL {
            check.run(&package, expected_version, &mut report);
        }

        let score = report.score();
        let passed = report.passed();
        if passed {
            info!(
                package = %package_path.display(),
                score,
                files = package.file_count,
                warnings = report.warnings.len(),
                "Automated review passed"
            );
        } else {
            warn!(
                package = %package_path.display(),
                score,
                files = package.file_count,
                issues = report.issues.len(),
                "Automated review found blocking issues"
            );
        }

        ReviewResult {
            passed,
            score,
            checks: report.checks,
            issues: report.issues,
            warnings: report.warnings,
            fingerprint: package.fingerprint,
            reviewed_at: Timestamp::now(),
        }
    }
}
