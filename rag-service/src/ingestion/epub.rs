//! EPUB document extraction.

use std::path::Path;

use tracing::debug;

use crate::error::ProcessingError;

use super::Section;

/// Extract one section per spine chapter.
pub fn extract_epub(path: &Path) -> Result<Vec<Section>, ProcessingError> {
    let mut archive =
        epub::doc::EpubDoc::new(path).map_err(|e| ProcessingError::EpubRead(e.to_string()))?;

    let mut sections = Vec::new();
    let mut chapter: u32 = 0;

    loop {
        if let Some((content, _mime)) = archive.get_current_str() {
            let text = strip_html_tags(&content).trim().to_string();
            if !text.is_empty() {
                chapter += 1;
                sections.push(Section {
                    title: archive.get_current_id(),
                    content: text,
                    page_number: Some(chapter),
                });
            }
        }
        if !archive.go_next() {
            break;
        }
    }

    if sections.is_empty() {
        return Err(ProcessingError::EpubRead(
            "No content could be extracted from EPUB".to_string(),
        ));
    }

    debug!(chapters = sections.len(), "EPUB extracted");
    Ok(sections)
}

/// Strip HTML tags and decode the common entities.
pub fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut last_was_space = true;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                if !last_was_space {
                    result.push(' ');
                    last_was_space = true;
                }
            }
            _ if !in_tag => {
                if c.is_whitespace() {
                    if !last_was_space {
                        result.push(' ');
                        last_was_space = true;
                    }
                } else {
                    result.push(c);
                    last_was_space = false;
                }
            }
            _ => {}
        }
    }

    result
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
