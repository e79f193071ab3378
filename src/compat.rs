//! Host-runtime and platform compatibility checks.

use std::cmp::Ordering;

use stallkeep_core::{Compatibility, CompatibilityBounds, Version};

use crate::version;

/// Check a version's declared bounds against a host runtime and platform.
///
/// Never fails: every violated bound becomes one issue line.
pub fn check(version: &Version, host_version: &str, platform_version: &str) -> Compatibility {
    check_bounds(&version.compatibility, host_version, platform_version)
}

/// [`check`] for bounds that are not attached to a published version yet.
pub fn check_bounds(
    bounds: &CompatibilityBounds,
    host_version: &str,
    platform_version: &str,
) -> Compatibility {
    let mut issues = Vec::new();

    if let Some(min) = non_empty(&bounds.host_min) {
        if version::compare(host_version, min) == Ordering::Less {
            issues.push(format!(
                "Requires host runtime >= {min}, found {host_version}"
            ));
        }
    }

    if let Some(max) = non_empty(&bounds.host_max) {
        if version::compare(host_version, max) == Ordering::Greater {
            issues.push(format!(
                "Requires host runtime <= {max}, found {host_version}"
            ));
        }
    }

    if let Some(min) = non_empty(&bounds.platform_min) {
        if version::compare(platform_version, min) == Ordering::Less {
            issues.push(format!(
                "Requires platform >= {min}, found {platform_version}"
            ));
        }
    }

    Compatibility {
        compatible: issues.is_empty(),
        issues,
    }
}

fn non_empty(bound: &Option<String>) -> Option<&str> {
    bound.as_deref().map(str::trim).filter(|b| !b.is_empty())
}
