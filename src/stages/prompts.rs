//! Stage instructions and input messages.

use crate::config::InspectionPolicy;
use crate::core::context::AnalysisContext;

pub fn ingest_instructions() -> String {
    "You prepare a Python package for security review.\n\
     The input is a path to either an archive or a folder.\n\
     1. Decide whether the path is an archive or a folder (check_user_input_is_archive).\n\
     2. Unpack it with unpack_archive_tool or unpack_folders; this writes the package snapshot.\n\
     3. Answer with the snapshot location as `package_formatted_path`, exactly as the unpack tool reported it.\n\
     Do not classify the package and do not read its files."
        .to_string()
}

pub fn ingest_input(ctx: &AnalysisContext) -> String {
    format!("Analyse the package at {}", ctx.package_location.display())
}

pub fn metadata_instructions() -> String {
    "You extract package facts from a package snapshot.\n\
     Call extract_package_information and get_number_of_package_files; they may run in parallel.\n\
     Answer with the metadata fields name, version, author, author_email, home_page, summary, \
     description and metadata_version. Use \"NA\" for any field that could not be recovered.\n\
     Do not explain your actions."
        .to_string()
}

pub fn metadata_input(ctx: &AnalysisContext) -> String {
    match &ctx.package_formatted_path {
        Some(path) => format!("Package snapshot: {}", path.display()),
        None => "Package snapshot: unavailable".to_string(),
    }
}

/// Classification instructions with the inspection policy and optional
/// caller guidelines rendered in.
pub fn classify_instructions(policy: &InspectionPolicy, guidelines: Option<&str>) -> String {
    let entry_points = policy
        .entry_points
        .iter()
        .map(|e| format!("`{e}`"))
        .collect::<Vec<_>>()
        .join(" and ");
    let hop_rule = if policy.max_import_hops == 1 {
        "Follow imports one level only; never follow the imports of an imported file.".to_string()
    } else {
        format!("Follow imports at most {} levels deep.", policy.max_import_hops)
    };

    let mut text = format!(
        "You decide whether a Python package is malicious or benign.\n\
         Start with {entry_points} when they appear in the list of Python files; read them with get_python_script.\n\
         List their imports with get_imported_libraries and compare them with the package's own Python files.\n\
         {hop_rule}\n\
         Beyond the entry points, read at most {max_files} files in total.\n\
         Use get_functions_python_script to review long files function by function.\n\
         Never execute code and never speculate beyond what the files and metadata show.\n\
         Answer with `classification` (\"malicious\" or \"benign\"), a concise `justification` citing concrete evidence, \
         and `suspicious_files` listing only files present in the package, most suspicious first.",
        max_files = policy.max_files,
    );

    if let Some(guidelines) = guidelines.map(str::trim).filter(|g| !g.is_empty()) {
        text.push_str("\n\n## General knowledge\n");
        text.push_str(guidelines);
    }
    text
}

pub fn classify_input(ctx: &AnalysisContext) -> String {
    let snapshot = ctx
        .package_formatted_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unavailable".to_string());
    let metadata = serde_json::to_string_pretty(&ctx.prompt_view()).unwrap_or_default();
    format!(
        "Classify the package as malicious or benign.\nPackage snapshot: {snapshot}\nMetadata:\n{metadata}"
    )
}
