//! Markdown document extraction.

use std::path::{Path, PathBuf};

use markdown::mdast::Node;
use markdown::{Constructs, ParseOptions};
use tracing::warn;

use crate::error::ProcessingError;

use super::{ModalItem, ParsedDocument, Section};

/// Extract sections and modal content from a Markdown file.
pub fn extract_markdown(path: &Path) -> Result<ParsedDocument, ProcessingError> {
    let content = std::fs::read_to_string(path)?;
    parse_markdown_document(&content, path.parent())
}

/// Parse Markdown text.
///
/// Relative image references are resolved against `base_dir` and must stay
/// inside it; images that cannot be read are skipped.
pub fn parse_markdown_document(
    content: &str,
    base_dir: Option<&Path>,
) -> Result<ParsedDocument, ProcessingError> {
    let options = ParseOptions {
        constructs: Constructs {
            math_flow: true,
            math_text: true,
            ..Constructs::gfm()
        },
        ..ParseOptions::gfm()
    };
    let tree = markdown::to_mdast(content, &options)
        .map_err(|e| ProcessingError::Markdown(e.to_string()))?;

    let mut items = Vec::new();
    collect_modal_items(&tree, content, base_dir, &mut items);

    Ok(ParsedDocument {
        sections: markdown_sections(&tree, content),
        items,
    })
}

fn collect_modal_items(
    node: &Node,
    source: &str,
    base_dir: Option<&Path>,
    items: &mut Vec<ModalItem>,
) {
    match node {
        Node::Table(table) => {
            let markdown = table
                .position
                .as_ref()
                .and_then(|pos| source.get(pos.start.offset..pos.end.offset))
                .unwrap_or_default()
                .trim()
                .to_string();
            if !markdown.is_empty() {
                items.push(ModalItem::Table {
                    markdown,
                    page_number: None,
                });
            }
            // Cells hold inline content only
            return;
        }
        Node::Math(math) => {
            let latex = math.value.trim();
            if !latex.is_empty() {
                items.push(ModalItem::Equation {
                    latex: latex.to_string(),
                    page_number: None,
                });
            }
        }
        Node::Image(image) => {
            if let Some(bytes) = base_dir.and_then(|dir| load_local_image(&image.url, dir)) {
                items.push(ModalItem::Image {
                    bytes,
                    caption: Some(image.alt.clone()).filter(|alt| !alt.trim().is_empty()),
                    page_number: None,
                });
            }
        }
        _ => {}
    }

    if let Some(children) = node.children() {
        for child in children {
            collect_modal_items(child, source, base_dir, items);
        }
    }
}

/// Read an image referenced by the document, only from inside `base_dir`.
fn load_local_image(url: &str, base_dir: &Path) -> Option<Vec<u8>> {
    if url.contains("://") || url.starts_with("data:") {
        return None;
    }

    let path = match resolve_within(base_dir, url) {
        Ok(path) => path,
        Err(e) => {
            warn!(url = %url, error = %e, "Skipping image reference");
            return None;
        }
    };
    match std::fs::read(&path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable image reference");
            None
        }
    }
}

/// Canonical path of `reference` relative to `base_dir`, rejecting anything
/// that resolves outside of it (absolute paths, `..`, symlinks).
fn resolve_within(base_dir: &Path, reference: &str) -> std::io::Result<PathBuf> {
    let base = base_dir.canonicalize()?;
    let resolved = base.join(reference).canonicalize()?;
    if resolved.starts_with(&base) {
        Ok(resolved)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "reference points outside the document directory",
        ))
    }
}

/// Split the document into sections at heading nodes.
fn markdown_sections(tree: &Node, source: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current_section = String::new();
    let mut current_title: Option<String> = None;

    for node in tree.children().map(Vec::as_slice).unwrap_or_default() {
        if let Node::Heading(_) = node {
            if !current_section.trim().is_empty() {
                sections.push(Section {
                    title: current_title.take(),
                    content: current_section.trim().to_string(),
                    page_number: None,
                });
                current_section = String::new();
            }
            current_title = Some(node.to_string().trim().to_string());
            continue;
        }

        let text = node
            .position()
            .and_then(|pos| source.get(pos.start.offset..pos.end.offset))
            .unwrap_or_default();
        current_section.push_str(text);
        current_section.push_str("\n\n");
    }

    if !current_section.trim().is_empty() {
        sections.push(Section {
            title: current_title,
            content: current_section.trim().to_string(),
            page_number: None,
        });
    }

    // Headers only
    if sections.is_empty() && !source.trim().is_empty() {
        sections.push(Section {
            title: None,
            content: source.trim().to_string(),
            page_number: None,
        });
    }

    sections
}
