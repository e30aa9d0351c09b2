//! Source inspection: script fetch, function splitting, import listing.

use crate::core::context::{AnalysisContext, ContextDelta};
use crate::core::snapshot::{ContentEncoding, PackageSnapshot};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Returned by the function splitter when nothing matches.
pub const NO_FUNCTIONS: &str = "No function definitions found.";
/// Returned by the import lister when nothing matches.
pub const NO_IMPORTS: &str = "No imports found.";

/// `def` header followed by at least one indented body line.
static FUNCTION_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(def\s+\w+\s*\(.*?\):(?:\n[ \t]+.+)+)").expect("valid function regex")
});

static IMPORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*import[ \t]+(.+)$").expect("valid import regex"));

static FROM_IMPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*from[ \t]+([\w\.]+)[ \t]+import[ \t]+(.+)$").expect("valid from regex")
});

static DOTTED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\.]+$").expect("valid name regex"));

/// Content of `file_name` from the current snapshot, or an empty string and a
/// context error when it cannot be found.
pub fn fetch_script(ctx: &AnalysisContext, file_name: &str) -> (String, ContextDelta) {
    let missing = || {
        (
            String::new(),
            ContextDelta::default().with_error(format!(
                "Error: The file {file_name} does not exist in the package."
            )),
        )
    };

    let Some(snapshot_path) = ctx.package_formatted_path.as_deref() else {
        return missing();
    };
    let snapshot = match PackageSnapshot::load(snapshot_path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return (
                String::new(),
                ContextDelta::default().with_error(format!(
                    "Error reading package snapshot {}: {e}",
                    snapshot_path.display()
                )),
            )
        }
    };
    let Some(entry) = snapshot.resolve(file_name) else {
        return missing();
    };

    let content = match entry.encoding {
        ContentEncoding::Utf8 => entry.content.clone(),
        ContentEncoding::Base64 => entry
            .decoded_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|_| entry.content.clone()),
    };
    let delta = ContextDelta {
        inspected: Some(entry.file_path.clone()),
        ..Default::default()
    };
    (content, delta)
}

/// Function definition blocks in source order.
pub fn split_functions(source: &str) -> Vec<String> {
    FUNCTION_BLOCK
        .find_iter(source)
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Numbered rendering handed back to the engine.
pub fn render_functions(functions: &[String]) -> Vec<String> {
    functions
        .iter()
        .enumerate()
        .map(|(i, body)| format!("### Function {} ###\n{}\n", i + 1, body))
        .collect()
}

fn strip_alias(item: &str) -> Option<&str> {
    let name = item
        .trim()
        .trim_matches(|c| c == '(' || c == ')')
        .split_whitespace()
        .next()?;
    DOTTED_NAME.is_match(name).then_some(name)
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or(line)
}

/// Sorted unique dotted names imported by `source`.
///
/// `import a as b, c` yields `a` and `c`; `from x import y` yields `x.y`;
/// a star import yields the module itself.
pub fn list_imports(source: &str) -> Vec<String> {
    let mut found = BTreeSet::new();

    for caps in IMPORT_LINE.captures_iter(source) {
        for item in strip_comment(&caps[1]).split(',') {
            if let Some(name) = strip_alias(item) {
                found.insert(name.to_string());
            }
        }
    }

    for caps in FROM_IMPORT_LINE.captures_iter(source) {
        let module = &caps[1];
        for item in strip_comment(&caps[2]).split(',') {
            let item = item.trim().trim_matches(|c| c == '(' || c == ')').trim();
            if item == "*" {
                found.insert(module.to_string());
                continue;
            }
            if let Some(name) = strip_alias(item) {
                let joined = if module.ends_with('.') {
                    format!("{module}{name}")
                } else {
                    format!("{module}.{name}")
                };
                found.insert(joined);
            }
        }
    }

    found.into_iter().collect()
}
