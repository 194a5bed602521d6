//! Document parsing and chunking.
//!
//! A document is parsed into text [`Section`]s plus [`ModalItem`]s (images,
//! tables, display equations) that are described by a model before indexing.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use strum::{Display, EnumString};
use tracing::{debug, info};

use crate::error::ProcessingError;

pub mod epub;
pub mod external;
pub mod hash;
pub mod markdown;
pub mod pdf;

/// Extensions handled as standalone images
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp"];

/// A run of document text with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: Option<String>,
    pub content: String,
    pub page_number: Option<u32>,
}

/// Non-text content found in a document
#[derive(Debug, Clone, PartialEq)]
pub enum ModalItem {
    Image {
        bytes: Vec<u8>,
        /// Alt text or caption found next to the image
        caption: Option<String>,
        page_number: Option<u32>,
    },
    Table {
        markdown: String,
        page_number: Option<u32>,
    },
    Equation {
        latex: String,
        page_number: Option<u32>,
    },
}

impl ModalItem {
    pub fn page_number(&self) -> Option<u32> {
        match self {
            ModalItem::Image { page_number, .. }
            | ModalItem::Table { page_number, .. }
            | ModalItem::Equation { page_number, .. } => *page_number,
        }
    }
}

/// Everything extracted from one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub sections: Vec<Section>,
    pub items: Vec<ModalItem>,
}

impl ParsedDocument {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.sections.iter().all(|s| s.content.trim().is_empty())
    }
}

/// Which parser turns uploads into content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ParserBackend {
    /// In-process parsers only
    Builtin,
    /// `mineru` CLI
    MinerU,
    /// `docling` CLI
    Docling,
}

/// Parses uploaded documents according to their extension and the backend.
pub struct DocumentParser {
    backend: ParserBackend,
    render_scanned_pages: bool,
}

impl DocumentParser {
    /// `render_scanned_pages` turns text-less PDF pages into image items.
    pub fn new(backend: &str, render_scanned_pages: bool) -> Result<Self, ProcessingError> {
        let backend =
            ParserBackend::from_str(backend).map_err(|_| ProcessingError::UnsupportedFormat {
                format: format!("parser `{backend}`"),
            })?;
        Ok(Self {
            backend,
            render_scanned_pages,
        })
    }

    pub fn backend(&self) -> ParserBackend {
        self.backend
    }

    /// Parse `path`, writing any intermediate output into `output_dir`.
    pub async fn parse(
        &self,
        path: &Path,
        output_dir: &Path,
    ) -> Result<ParsedDocument, ProcessingError> {
        let extension = file_extension(path);
        info!(
            path = %path.display(),
            extension = %extension,
            parser = %self.backend,
            "Parsing document"
        );

        let parsed = match self.backend {
            ParserBackend::MinerU | ParserBackend::Docling
                if external::handles_extension(&extension) =>
            {
                external::parse(self.backend, path, output_dir).await?
            }
            _ => {
                let path = path.to_path_buf();
                let render_scanned_pages = self.render_scanned_pages;
                tokio::task::spawn_blocking(move || {
                    parse_builtin(&path, &extension, render_scanned_pages)
                })
                .await
                .map_err(|e| ProcessingError::TextExtraction {
                    message: format!("parser task failed: {e}"),
                })??
            }
        };

        if parsed.is_empty() {
            return Err(ProcessingError::NoContent);
        }

        debug!(
            sections = parsed.sections.len(),
            items = parsed.items.len(),
            "Document parsed"
        );
        Ok(parsed)
    }
}

/// In-process parsing by extension
fn parse_builtin(
    path: &Path,
    extension: &str,
    render_scanned_pages: bool,
) -> Result<ParsedDocument, ProcessingError> {
    match extension {
        "pdf" => pdf::extract_pdf(path, render_scanned_pages),
        "epub" => Ok(ParsedDocument {
            sections: epub::extract_epub(path)?,
            items: Vec::new(),
        }),
        "md" | "markdown" => markdown::extract_markdown(path),
        "txt" | "text" => Ok(ParsedDocument {
            sections: extract_text(path)?,
            items: Vec::new(),
        }),
        "html" | "htm" => {
            let html = std::fs::read_to_string(path)?;
            Ok(ParsedDocument {
                sections: vec![Section {
                    title: None,
                    content: epub::strip_html_tags(&html).trim().to_string(),
                    page_number: None,
                }],
                items: Vec::new(),
            })
        }
        ext if IMAGE_EXTENSIONS.contains(&ext) => Ok(ParsedDocument {
            sections: Vec::new(),
            items: vec![ModalItem::Image {
                bytes: std::fs::read(path)?,
                caption: path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned()),
                page_number: None,
            }],
        }),
        other => Err(ProcessingError::UnsupportedFormat {
            format: other.to_string(),
        }),
    }
}

/// Extract content from a plain text file.
fn extract_text(path: &Path) -> Result<Vec<Section>, ProcessingError> {
    let content = std::fs::read_to_string(path)?;

    Ok(vec![Section {
        title: None,
        content: content.trim().to_string(),
        page_number: None,
    }])
}

/// Lower-cased file extension, or an empty string
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Split text into overlapping windows of `chunk_size` words.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.is_empty() {
        return Vec::new();
    }
    if words.len() <= chunk_size {
        return vec![words.join(" ")];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));

        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Sanitize a string for use as a filename
pub fn sanitize_filename(name: &str) -> String {
    // Keep only the final path component
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let sanitized = name
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches(|c| c == '_' || c == '.')
        .to_string();

    if sanitized.is_empty() {
        "document".to_string()
    } else {
        sanitized
    }
}

/// Markdown files below `dir`, in path order
pub(crate) fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| file_extension(path) == "md")
        .collect();
    files.sort();
    files
}
