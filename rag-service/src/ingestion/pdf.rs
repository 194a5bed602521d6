//! PDF text extraction through PDFium.

use std::io::Cursor;
use std::path::Path;

use image::ImageFormat;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

use crate::error::ProcessingError;

use super::{ModalItem, ParsedDocument, Section};

/// Width scanned pages are rendered at for the vision model
const SCAN_RENDER_WIDTH: i32 = 1280;

/// Bind to the PDFium library.
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::TextExtraction {
            message: format!("Failed to load PDFium library: {e}"),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Extract one section per page with a text layer.
///
/// Pages without text (scans) are rendered to PNG and returned as image
/// items when `render_scanned_pages` is set.
pub fn extract_pdf(
    path: &Path,
    render_scanned_pages: bool,
) -> Result<ParsedDocument, ProcessingError> {
    let pdfium = create_pdfium()?;
    let document =
        pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| ProcessingError::TextExtraction {
                message: format!("Failed to load PDF: {e}"),
            })?;

    info!(pages = document.pages().len(), "Processing PDF pages");

    let mut parsed = ParsedDocument::default();
    for (index, page) in document.pages().iter().enumerate() {
        let page_number = index as u32 + 1;
        let text = page.text().map_err(|e| {
            warn!(page = page_number, error = ?e, "Failed to get text object for page");
            ProcessingError::TextExtraction {
                message: format!("page {page_number}: {e}"),
            }
        })?;

        let content = text.all().trim().to_string();
        if !content.is_empty() {
            parsed.sections.push(Section {
                title: None,
                content,
                page_number: Some(page_number),
            });
        } else if render_scanned_pages {
            debug!(page = page_number, "Page has no text layer, rendering for vision");
            parsed.items.push(ModalItem::Image {
                bytes: render_page_png(&page, page_number)?,
                caption: Some(format!("Scanned page {page_number}")),
                page_number: Some(page_number),
            });
        }
    }

    Ok(parsed)
}

fn render_page_png(page: &PdfPage, page_number: u32) -> Result<Vec<u8>, ProcessingError> {
    let config = PdfRenderConfig::new().set_target_width(SCAN_RENDER_WIDTH);
    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| ProcessingError::TextExtraction {
            message: format!("Failed to render page {page_number}: {e}"),
        })?;

    let mut bytes = Vec::new();
    bitmap
        .as_image()
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ProcessingError::TextExtraction {
            message: format!("Failed to encode page {page_number}: {e}"),
        })?;
    Ok(bytes)
}
