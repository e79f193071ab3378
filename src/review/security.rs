//! Blocklist scan for dangerous constructs in package sources.

use std::sync::LazyLock;

use regex::Regex;

use crate::review::{Check, Package, Report};

/// File extensions treated as source code.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "php", "phtml", "inc", "js", "mjs", "cjs", "ts", "py", "rb", "sh",
];

/// Occurrences listed per construct before the list is truncated.
const MAX_SITES_PER_CONSTRUCT: usize = 20;

/// Unscanned files listed before the list is truncated.
const MAX_UNSCANNED_SHOWN: usize = 10;

/// Named call patterns that evaluate code or spawn processes.
///
/// Call-style entries are matched only as free calls: a preceding `.`, `->`,
/// `::` or identifier character (method calls like `regex.exec(`) does not
/// count. Patterns run against whole files in multi-line mode, so a call
/// split across lines still matches.
const DANGEROUS_CONSTRUCTS: &[(&str, &str)] = &[
    ("eval()", r"(?:^|[^.\w$>:])eval\s*\("),
    ("exec()", r"(?:^|[^.\w$>:])exec\s*\("),
    ("shell_exec()", r"(?:^|[^.\w$>:])shell_exec\s*\("),
    ("system()", r"(?:^|[^.\w$>:])system\s*\("),
    ("passthru()", r"(?:^|[^.\w$>:])passthru\s*\("),
    ("proc_open()", r"(?:^|[^.\w$>:])proc_open\s*\("),
    ("popen()", r"(?:^|[^.\w$>:])popen\s*\("),
    ("pcntl_exec()", r"(?:^|[^.\w$>:])pcntl_exec\s*\("),
    ("create_function()", r"(?:^|[^.\w$>:])create_function\s*\("),
    ("Function constructor", r"\bnew\s+Function\s*\("),
    (
        "child_process module",
        r#"(?:require\s*\(\s*|from\s+|import\s+)['"](?:node:)?child_process['"]"#,
    ),
    (
        "subprocess call",
        r"\bsubprocess\.(?:run|call|Popen|check_call|check_output)\s*\(",
    ),
];

static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    DANGEROUS_CONSTRUCTS
        .iter()
        .map(|(name, pattern)| (*name, Regex::new(&format!("(?m){pattern}")).expect("valid regex")))
        .collect()
});

/// Whether `rel` has a source-code extension.
pub fn is_source_file(rel: &str) -> bool {
    rel.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.as_str()))
}

/// Where a construct was found, as `path:line` of the line it starts on.
fn find_sites(package: &Package, pattern: &Regex) -> Vec<String> {
    let mut sites = Vec::new();
    for file in &package.sources {
        let content = file.content.as_str();
        let (mut line, mut counted, mut last) = (1, 0, 0);
        for found in pattern.find_iter(content) {
            // The free-call prefix may have consumed the preceding newline.
            let start = found.start() + usize::from(content.as_bytes()[found.start()] == b'\n');
            line += content[counted..start].matches('\n').count();
            counted = start;
            if line != last {
                sites.push(format!("{}:{line}", file.rel));
                last = line;
            }
        }
    }
    sites
}

pub(crate) fn run(package: &Package, report: &mut Report) {
    let category = Check::SecurityPatterns.category();

    if let Some(reason) = &package.load_error {
        report.fail(category, "package_readable", reason.clone());
        report.skip(category, "sources_scanned", "package could not be read");
        for (name, _) in PATTERNS.iter() {
            report.skip(category, &check_name(name), "package could not be read");
        }
        return;
    }
    report.pass(
        category,
        "package_readable",
        format!("Read {} files", package.file_count),
    );

    if package.unscanned.is_empty() {
        report.pass(
            category,
            "sources_scanned",
            format!("Scanned {} source files", package.sources.len()),
        );
    } else {
        let shown = package.unscanned.len().min(MAX_UNSCANNED_SHOWN);
        let mut message = format!(
            "Sources could not be scanned: {}",
            package.unscanned[..shown].join(", ")
        );
        if package.unscanned.len() > shown {
            message.push_str(&format!(" and {} more", package.unscanned.len() - shown));
        }
        report.fail(category, "sources_scanned", message);
    }

    for (name, pattern) in PATTERNS.iter() {
        let check = check_name(name);
        let sites = find_sites(package, pattern);
        if sites.is_empty() {
            report.pass(category, &check, format!("No use of {name}"));
            continue;
        }

        let shown = sites.len().min(MAX_SITES_PER_CONSTRUCT);
        let mut message = format!(
            "Dangerous construct {name} in {}",
            sites[..shown].join(", ")
        );
        if sites.len() > shown {
            message.push_str(&format!(" and {} more", sites.len() - shown));
        }
        report.fail(category, &check, message);
    }
}

fn check_name(construct: &str) -> String {
    let slug: String = construct
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => Some(c.to_ascii_lowercase()),
            ' ' => Some('_'),
            _ => None,
        })
        .collect();
    format!("construct_{slug}")
}
