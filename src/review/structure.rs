//! Advisory checks on the package's directory layout.
//!
//! None of these block a submission; a failed check only costs structure
//! score and adds a warning.

use std::path::Path;

use crate::review::{Check, Package, Report};

const SOURCE_ROOT: &str = "src";
const README_FILES: &[&str] = &["README.md", "README"];
const LICENSE_FILES: &[&str] = &["LICENSE", "LICENSE.md", "LICENSE.txt"];

/// Optional directories that must be directories when present.
const OPTIONAL_DIRS: &[(&str, &str)] = &[("config_layout", "config"), ("routes_layout", "routes")];

fn is_dir(root: &Path, rel: &str) -> bool {
    std::fs::symlink_metadata(root.join(rel)).is_ok_and(|m| m.is_dir())
}

fn is_file(root: &Path, rel: &str) -> bool {
    std::fs::symlink_metadata(root.join(rel)).is_ok_and(|m| m.is_file())
}

fn exists(root: &Path, rel: &str) -> bool {
    std::fs::symlink_metadata(root.join(rel)).is_ok()
}

pub(crate) fn run(package: &Package, report: &mut Report) {
    let category = Check::Structure.category();
    let root = package.root.as_path();

    if is_dir(root, SOURCE_ROOT) {
        report.pass_advisory(category, "source_root", "Sources live under src/");
    } else {
        report.warn(category, "source_root", "Package has no src/ directory");
    }

    match README_FILES.iter().find(|f| is_file(root, f)) {
        Some(found) => report.pass_advisory(category, "readme", format!("Found {found}")),
        None => report.warn(category, "readme", "Package has no README"),
    }

    match LICENSE_FILES.iter().find(|f| is_file(root, f)) {
        Some(found) => report.pass_advisory(category, "license_file", format!("Found {found}")),
        None => report.warn(category, "license_file", "Package has no LICENSE file"),
    }

    for (name, dir) in OPTIONAL_DIRS {
        if !exists(root, dir) || is_dir(root, dir) {
            report.pass_advisory(category, name, format!("{dir}/ layout is valid"));
        } else {
            report.warn(category, name, format!("{dir} should be a directory"));
        }
    }
}
