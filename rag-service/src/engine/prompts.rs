//! Prompt templates for modal descriptions and answers.

use crate::vector_store::ScoredChunk;

const ANSWER_INSTRUCTIONS: &str = "Answer the question using only the context below. \
If the context does not contain the answer, say so.";

const MULTIMODAL_ANSWER_INSTRUCTIONS: &str = "Answer the question using only the context below. \
The context contains document text as well as descriptions of images, tables and \
equations taken from the same documents; use all of them. \
If the context does not contain the answer, say so.";

pub fn image_prompt(caption: Option<&str>) -> String {
    format!(
        "Describe this image in detail for a search index. \
         Mention any visible text, labels, numbers, axes and trends. \
         Context from the document: {}",
        caption.unwrap_or("none")
    )
}

pub fn table_prompt(table: &str) -> String {
    format!(
        "Summarize the following table for a search index. \
         State what it measures, its columns, and the notable values or trends.\n\n{table}"
    )
}

pub fn equation_prompt(latex: &str) -> String {
    format!(
        "Explain the following equation for a search index. \
         Name the quantities involved and what the equation expresses.\n\n$$\n{latex}\n$$"
    )
}

/// Final prompt over the retrieved chunks
pub fn answer_prompt(question: &str, hits: &[ScoredChunk], multimodal: bool) -> String {
    let instructions = if multimodal {
        MULTIMODAL_ANSWER_INSTRUCTIONS
    } else {
        ANSWER_INSTRUCTIONS
    };
    let context = format_context(hits);
    format!("{instructions}\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:")
}

fn format_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let payload = &hit.payload;
            let mut header = format!("[{}] {} from {}", i + 1, payload.kind, payload.source);
            if let Some(page) = payload.page_number {
                header.push_str(&format!(", page {page}"));
            }
            if let Some(title) = &payload.section_title {
                header.push_str(&format!(", section \"{title}\""));
            }
            format!("{header}\n{}", payload.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
