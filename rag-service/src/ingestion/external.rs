//! External document parsers (MinerU, Docling) run as subprocesses.
//!
//! Both tools write Markdown plus extracted images into an output directory,
//! which is then read back with the Markdown parser.

use std::ffi::OsString;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ProcessingError;

use super::markdown::parse_markdown_document;
use super::{IMAGE_EXTENSIONS, ParsedDocument, ParserBackend, markdown_files};

/// Extensions routed to the external parser when one is configured
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx"];

/// Whether files with this extension go to the external parser.
pub fn handles_extension(extension: &str) -> bool {
    DOCUMENT_EXTENSIONS.contains(&extension) || IMAGE_EXTENSIONS.contains(&extension)
}

/// Executable and arguments for a backend
fn command_line(
    backend: ParserBackend,
    path: &Path,
    output_dir: &Path,
) -> Option<(&'static str, Vec<OsString>)> {
    match backend {
        ParserBackend::MinerU => Some((
            "mineru",
            vec![
                "-p".into(),
                path.into(),
                "-o".into(),
                output_dir.into(),
                "-m".into(),
                "auto".into(),
            ],
        )),
        ParserBackend::Docling => Some((
            "docling",
            vec![
                path.into(),
                "--to".into(),
                "md".into(),
                "--output".into(),
                output_dir.into(),
            ],
        )),
        ParserBackend::Builtin => None,
    }
}

/// Run the external parser and collect what it wrote.
pub async fn parse(
    backend: ParserBackend,
    path: &Path,
    output_dir: &Path,
) -> Result<ParsedDocument, ProcessingError> {
    let Some((program, args)) = command_line(backend, path, output_dir) else {
        return Err(ProcessingError::UnsupportedFormat {
            format: format!("parser `{backend}`"),
        });
    };

    tokio::fs::create_dir_all(output_dir).await?;
    run(program, &args).await?;

    let parsed = collect_markdown(output_dir).await?;
    info!(
        parser = program,
        sections = parsed.sections.len(),
        items = parsed.items.len(),
        "External parser finished"
    );
    Ok(parsed)
}

async fn run(program: &str, args: &[OsString]) -> Result<(), ProcessingError> {
    debug!(program, ?args, "Running external parser");

    // Dropping the future (cancelled processing) kills the parser
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProcessingError::ExternalParser {
            parser: program.to_string(),
            message: format!("failed to start: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(program, status = %output.status, "External parser failed");
        return Err(ProcessingError::ExternalParser {
            parser: program.to_string(),
            message: if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            },
        });
    }

    Ok(())
}

/// Merge every Markdown file below `output_dir` into one document.
async fn collect_markdown(output_dir: &Path) -> Result<ParsedDocument, ProcessingError> {
    let mut merged = ParsedDocument::default();

    for file in markdown_files(output_dir) {
        let content = tokio::fs::read_to_string(&file).await?;
        let parsed = parse_markdown_document(&content, file.parent())?;
        merged.sections.extend(parsed.sections);
        merged.items.extend(parsed.items);
    }

    Ok(merged)
}
