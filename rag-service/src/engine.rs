//! Retrieval engine.
//!
//! [`RagEngine`] is the seam the HTTP service talks to. [`MultimodalRag`] is
//! the built-in implementation: documents are parsed, images, tables and
//! equations are described by the models, everything is embedded through the
//! inference server and stored in Qdrant. Queries embed the question, pull
//! the nearest chunks according to the [`QueryMode`] and ask the text model
//! to answer from them.

mod prompts;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::{EngineResult, LlmError, ProcessingError};
use crate::ingestion::hash::compute_content_hash;
use crate::ingestion::{DocumentParser, ModalItem, Section, chunk_text};
use crate::llm::OpenAiClient;
use crate::vector_store::{ChunkKind, ChunkPayload, ChunkPoint, QdrantStore, ScoredChunk};

/// Reply used when retrieval finds nothing, without calling the model
pub const NO_CONTEXT_ANSWER: &str =
    "I could not find any relevant information in the indexed documents to answer this question.";

/// Chunk manifest written into each document's output directory
pub const MANIFEST_FILE: &str = "chunks.json";

/// Candidates fetched per requested result in global mode
const GLOBAL_OVERFETCH: usize = 3;

/// Chunks a single document may contribute to a global result
const MAX_CHUNKS_PER_DOCUMENT: usize = 2;

/// Progress callback, called with values in `[0, 1]`
pub type ProgressFn<'a> = dyn Fn(f32) + Send + Sync + 'a;

/// Retrieval strategy
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QueryMode {
    /// Nearest chunks by vector similarity
    Naive,
    /// Nearest chunks, focused on the closest passages
    Local,
    /// Breadth across documents
    Global,
    /// Local and global results merged
    #[default]
    Hybrid,
}

#[async_trait]
pub trait RagEngine: Send + Sync {
    /// Parse, describe, embed and index one document.
    ///
    /// Returns the number of chunks stored.
    async fn process_document_complete(
        &self,
        file_path: &Path,
        output_dir: &Path,
        doc_id: &str,
        progress: &ProgressFn<'_>,
    ) -> EngineResult<usize>;

    /// Index raw text under `doc_id`.
    async fn insert(
        &self,
        content: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
        doc_id: &str,
    ) -> EngineResult<usize>;

    /// Answer from text chunks only.
    async fn query(&self, question: &str, mode: QueryMode, top_k: usize) -> EngineResult<String>;

    /// Answer from text, image, table and equation chunks.
    async fn query_multimodal(
        &self,
        question: &str,
        mode: QueryMode,
        top_k: usize,
    ) -> EngineResult<String>;

    /// Remove every indexed chunk of a document.
    async fn delete_document(&self, doc_id: &str) -> EngineResult<()>;
}

/// A chunk before it is embedded
#[derive(Debug, Clone)]
struct ChunkDraft {
    content: String,
    kind: ChunkKind,
    page_number: Option<u32>,
    section_title: Option<String>,
}

pub struct MultimodalRag {
    llm: OpenAiClient,
    store: QdrantStore,
    parser: DocumentParser,
    chunk_size: usize,
    chunk_overlap: usize,
    describe_images: bool,
    describe_tables: bool,
    describe_equations: bool,
    modal_cache_dir: PathBuf,
}

impl MultimodalRag {
    pub fn new(config: &RagConfig) -> EngineResult<Self> {
        let parser = DocumentParser::new(&config.parser, config.enable_image_processing)?;
        info!(
            parser = %parser.backend(),
            llm_model = %config.llm_model,
            vision_model = %config.vision_model,
            embedding_model = %config.embedding_model,
            collection = %config.qdrant_collection,
            "Multimodal RAG engine configured"
        );

        Ok(Self {
            llm: OpenAiClient::new(config)?,
            store: QdrantStore::new(config)?,
            parser,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            describe_images: config.enable_image_processing,
            describe_tables: config.enable_table_processing,
            describe_equations: config.enable_equation_processing,
            modal_cache_dir: config.cache_dir.join("modal"),
        })
    }

    fn text_drafts(&self, sections: &[Section]) -> Vec<ChunkDraft> {
        sections
            .iter()
            .flat_map(|section| {
                chunk_text(&section.content, self.chunk_size, self.chunk_overlap)
                    .into_iter()
                    .map(|content| ChunkDraft {
                        content,
                        kind: ChunkKind::Text,
                        page_number: section.page_number,
                        section_title: section.title.clone(),
                    })
            })
            .collect()
    }

    fn modal_enabled(&self, item: &ModalItem) -> bool {
        match item {
            ModalItem::Image { .. } => self.describe_images,
            ModalItem::Table { .. } => self.describe_tables,
            ModalItem::Equation { .. } => self.describe_equations,
        }
    }

    /// Describe a modal item, going through the on-disk cache.
    async fn describe(&self, item: &ModalItem) -> EngineResult<ChunkDraft> {
        let key = modal_cache_key(item);
        let cache_path = self.modal_cache_dir.join(format!("{key}.txt"));

        let description = match tokio::fs::read_to_string(&cache_path).await {
            Ok(cached) => {
                debug!(key = %key, "Modal description cache hit");
                cached
            }
            Err(_) => {
                let (text, cacheable) = self.generate_description(item).await?;
                if cacheable {
                    self.store_description(&cache_path, &text).await;
                }
                text
            }
        };

        Ok(ChunkDraft {
            content: modal_chunk_content(item, description.trim()),
            kind: modal_kind(item),
            page_number: item.page_number(),
            section_title: None,
        })
    }

    /// Returns the description and whether it may be cached.
    async fn generate_description(&self, item: &ModalItem) -> EngineResult<(String, bool)> {
        match item {
            ModalItem::Image { bytes, caption, .. } => {
                let reply = self
                    .llm
                    .describe_images(
                        &prompts::image_prompt(caption.as_deref()),
                        std::slice::from_ref(bytes),
                    )
                    .await?;
                if reply.degraded {
                    warn!(
                        caption = caption.as_deref().unwrap_or(""),
                        "Image described without vision, result not cached"
                    );
                }
                Ok((reply.text, !reply.degraded))
            }
            ModalItem::Table { markdown, .. } => Ok((
                self.llm.complete(&prompts::table_prompt(markdown)).await?,
                true,
            )),
            ModalItem::Equation { latex, .. } => Ok((
                self.llm.complete(&prompts::equation_prompt(latex)).await?,
                true,
            )),
        }
    }

    async fn store_description(&self, path: &Path, text: &str) {
        let result = async {
            tokio::fs::create_dir_all(&self.modal_cache_dir).await?;
            tokio::fs::write(path, text).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to cache modal description");
        }
    }

    /// Embed drafts and upsert them, returning the stored payloads.
    async fn index(
        &self,
        doc_id: &str,
        source: &str,
        drafts: Vec<ChunkDraft>,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> EngineResult<Vec<ChunkPayload>> {
        let texts: Vec<String> = drafts.iter().map(|d| d.content.clone()).collect();
        let vectors = self.llm.embed(&texts).await?;

        let points: Vec<ChunkPoint> = drafts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (draft, vector))| ChunkPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: ChunkPayload {
                    doc_id: doc_id.to_string(),
                    content: draft.content,
                    kind: draft.kind,
                    chunk_index,
                    page_number: draft.page_number,
                    section_title: draft.section_title,
                    source: source.to_string(),
                    metadata: metadata.clone(),
                },
            })
            .collect();

        self.store.upsert(&points).await?;
        Ok(points.into_iter().map(|p| p.payload).collect())
    }

    async fn answer(
        &self,
        question: &str,
        mode: QueryMode,
        top_k: usize,
        kinds: &[ChunkKind],
        multimodal: bool,
    ) -> EngineResult<String> {
        let vector = self
            .llm
            .embed(&[question.to_string()])
            .await?
            .pop()
            .ok_or_else(|| LlmError::InvalidResponse {
                message: "no embedding returned for query".to_string(),
            })?;

        let hits = self.retrieve(&vector, mode, top_k.max(1), kinds).await?;
        debug!(mode = %mode, hits = hits.len(), multimodal, "Retrieved context");

        if hits.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let prompt = prompts::answer_prompt(question, &hits, multimodal);
        Ok(self.llm.complete(&prompt).await?)
    }

    async fn retrieve(
        &self,
        vector: &[f32],
        mode: QueryMode,
        top_k: usize,
        kinds: &[ChunkKind],
    ) -> EngineResult<Vec<ScoredChunk>> {
        let hits = match mode {
            QueryMode::Naive | QueryMode::Local => {
                self.store.search(vector, top_k, kinds).await?
            }
            QueryMode::Global => {
                let candidates = self
                    .store
                    .search(vector, top_k * GLOBAL_OVERFETCH, kinds)
                    .await?;
                diversify(candidates, top_k)
            }
            QueryMode::Hybrid => {
                let candidates = self
                    .store
                    .search(vector, top_k * GLOBAL_OVERFETCH, kinds)
                    .await?;
                let local: Vec<ScoredChunk> = candidates.iter().take(top_k).cloned().collect();
                let global = diversify(candidates, top_k);
                merge_hits(local, global, top_k * 2)
            }
        };
        Ok(hits)
    }
}

#[async_trait]
impl RagEngine for MultimodalRag {
    async fn process_document_complete(
        &self,
        file_path: &Path,
        output_dir: &Path,
        doc_id: &str,
        progress: &ProgressFn<'_>,
    ) -> EngineResult<usize> {
        tokio::fs::create_dir_all(output_dir).await?;

        let parsed = self.parser.parse(file_path, output_dir).await?;
        progress(0.3);

        let source = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| doc_id.to_string());

        let mut drafts = self.text_drafts(&parsed.sections);
        let items: Vec<&ModalItem> = parsed
            .items
            .iter()
            .filter(|item| self.modal_enabled(item))
            .collect();
        debug!(
            doc_id = %doc_id,
            text_chunks = drafts.len(),
            modal_items = items.len(),
            skipped_items = parsed.items.len() - items.len(),
            "Document parsed"
        );

        for (done, item) in items.iter().enumerate() {
            drafts.push(self.describe(item).await?);
            progress(0.3 + 0.4 * (done + 1) as f32 / items.len() as f32);
        }

        if drafts.is_empty() {
            return Err(ProcessingError::NoContent.into());
        }
        progress(0.7);

        let payloads = self
            .index(doc_id, &source, drafts, &serde_json::Map::new())
            .await?;
        progress(0.9);

        let manifest = serde_json::to_vec_pretty(&payloads).map_err(std::io::Error::from)?;
        tokio::fs::write(output_dir.join(MANIFEST_FILE), manifest).await?;

        info!(doc_id = %doc_id, chunks = payloads.len(), "Document indexed");
        Ok(payloads.len())
    }

    async fn insert(
        &self,
        content: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
        doc_id: &str,
    ) -> EngineResult<usize> {
        let drafts = self.text_drafts(&[Section {
            title: None,
            content: content.to_string(),
            page_number: None,
        }]);
        if drafts.is_empty() {
            return Err(ProcessingError::NoContent.into());
        }

        let payloads = self.index(doc_id, "insert", drafts, metadata).await?;
        info!(doc_id = %doc_id, chunks = payloads.len(), "Content inserted");
        Ok(payloads.len())
    }

    async fn query(&self, question: &str, mode: QueryMode, top_k: usize) -> EngineResult<String> {
        self.answer(question, mode, top_k, &[ChunkKind::Text], false)
            .await
    }

    async fn query_multimodal(
        &self,
        question: &str,
        mode: QueryMode,
        top_k: usize,
    ) -> EngineResult<String> {
        self.answer(question, mode, top_k, &ChunkKind::ALL, true)
            .await
    }

    async fn delete_document(&self, doc_id: &str) -> EngineResult<()> {
        self.store.delete_document(doc_id).await?;
        info!(doc_id = %doc_id, "Document vectors deleted");
        Ok(())
    }
}

fn modal_kind(item: &ModalItem) -> ChunkKind {
    match item {
        ModalItem::Image { .. } => ChunkKind::Image,
        ModalItem::Table { .. } => ChunkKind::Table,
        ModalItem::Equation { .. } => ChunkKind::Equation,
    }
}

/// Cache key over the item's kind and raw content
fn modal_cache_key(item: &ModalItem) -> String {
    let content: &[u8] = match item {
        ModalItem::Image { bytes, .. } => bytes,
        ModalItem::Table { markdown, .. } => markdown.as_bytes(),
        ModalItem::Equation { latex, .. } => latex.as_bytes(),
    };
    let mut keyed = modal_kind(item).as_ref().as_bytes().to_vec();
    keyed.push(b':');
    keyed.extend_from_slice(content);
    compute_content_hash(&keyed)
}

/// Indexed text for a modal item: the original content plus its description
fn modal_chunk_content(item: &ModalItem, description: &str) -> String {
    match item {
        ModalItem::Image {
            caption: Some(caption),
            ..
        } => format!("Image: {caption}\n{description}"),
        ModalItem::Image { caption: None, .. } => format!("Image:\n{description}"),
        ModalItem::Table { markdown, .. } => format!("Table:\n{markdown}\n\nSummary: {description}"),
        ModalItem::Equation { latex, .. } => {
            format!("Equation: $${latex}$$\n\nExplanation: {description}")
        }
    }
}

/// Keep at most [`MAX_CHUNKS_PER_DOCUMENT`] hits per document, up to `limit`.
fn diversify(hits: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    let mut per_document: HashMap<String, usize> = HashMap::new();
    hits.into_iter()
        .filter(|hit| {
            let count = per_document.entry(hit.payload.doc_id.clone()).or_default();
            *count += 1;
            *count <= MAX_CHUNKS_PER_DOCUMENT
        })
        .take(limit)
        .collect()
}

/// Concatenate, dropping repeated point ids, up to `limit`.
fn merge_hits(
    primary: Vec<ScoredChunk>,
    secondary: Vec<ScoredChunk>,
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut seen = HashSet::new();
    primary
        .into_iter()
        .chain(secondary)
        .filter(|hit| seen.insert(hit.id.to_string()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::load;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use std::sync::Mutex;

    fn scored(id: &str, doc_id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            id: serde_json::json!(id),
            score,
            payload: ChunkPayload {
                doc_id: doc_id.to_string(),
                content: format!("content of {id}"),
                kind: ChunkKind::Text,
                chunk_index: 0,
                page_number: None,
                section_title: None,
                source: format!("{doc_id}.txt"),
                metadata: serde_json::Map::new(),
            },
        }
    }

    fn ids(hits: &[ScoredChunk]) -> Vec<String> {
        hits.iter()
            .map(|h| h.id.as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn engine_for(server: &Server, cache_dir: &Path) -> MultimodalRag {
        let mut config = load(&[]).unwrap();
        config.localai_url = format!("{}/v1", server.url());
        config.qdrant_url = server.url();
        config.cache_dir = cache_dir.to_path_buf();
        config.embedding_dim = 2;
        MultimodalRag::new(&config).unwrap()
    }

    async fn mock_collection(server: &mut ServerGuard) -> Mock {
        server
            .mock("GET", "/collections/rag_chunks")
            .with_status(200)
            .with_body(r#"{"result": {}}"#)
            .create_async()
            .await
    }

    async fn mock_embeddings(server: &mut ServerGuard, count: usize) -> Mock {
        let data: Vec<_> = (0..count)
            .map(|i| serde_json::json!({ "index": i, "embedding": [i as f32, 1.0] }))
            .collect();
        server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(serde_json::json!({ "data": data }).to_string())
            .create_async()
            .await
    }

    async fn mock_upsert(server: &mut ServerGuard) -> Mock {
        server
            .mock("PUT", "/collections/rag_chunks/points")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"result": {"status": "completed"}}"#)
            .create_async()
            .await
    }

    fn chat_body(text: &str) -> String {
        serde_json::json!({ "choices": [{ "message": { "content": text } }] }).to_string()
    }

    #[test]
    fn test_diversify_limits_chunks_per_document() {
        let hits = vec![
            scored("a1", "a", 0.9),
            scored("a2", "a", 0.8),
            scored("a3", "a", 0.7),
            scored("b1", "b", 0.6),
            scored("c1", "c", 0.5),
        ];
        assert_eq!(ids(&diversify(hits, 3)), ["a1", "a2", "b1"]);
    }

    #[test]
    fn test_merge_hits_dedups_and_caps() {
        let local = vec![scored("a1", "a", 0.9), scored("a2", "a", 0.8)];
        let global = vec![
            scored("a1", "a", 0.9),
            scored("b1", "b", 0.6),
            scored("c1", "c", 0.5),
        ];
        assert_eq!(ids(&merge_hits(local, global, 3)), ["a1", "a2", "b1"]);
    }

    #[test]
    fn test_query_mode_names() {
        assert_eq!("global".parse::<QueryMode>().unwrap(), QueryMode::Global);
        assert!("semantic".parse::<QueryMode>().is_err());
        assert_eq!(QueryMode::default(), QueryMode::Hybrid);
        assert_eq!(QueryMode::Naive.to_string(), "naive");
    }

    #[test]
    fn test_modal_cache_key_depends_on_kind() {
        let table = ModalItem::Table {
            markdown: "x".into(),
            page_number: None,
        };
        let equation = ModalItem::Equation {
            latex: "x".into(),
            page_number: Some(1),
        };
        assert_ne!(modal_cache_key(&table), modal_cache_key(&equation));
        assert_eq!(modal_cache_key(&table).len(), 64);
    }

    #[tokio::test]
    async fn test_process_markdown_document() {
        let mut server = Server::new_async().await;
        mock_collection(&mut server).await;
        let summary = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::Regex("Summarize the following table".to_string()))
            .with_status(200)
            .with_body(chat_body("quarterly sales table"))
            .expect(1)
            .create_async()
            .await;
        mock_embeddings(&mut server, 2).await;
        let upsert = mock_upsert(&mut server).await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sales.md");
        std::fs::write(
            &input,
            "# Sales\nQuarterly numbers.\n\n| q | v |\n|---|---|\n| 1 | 2 |\n",
        )
        .unwrap();
        let output_dir = dir.path().join("out");
        let cache_dir = dir.path().join("cache");

        let reported = Mutex::new(Vec::new());
        let record = |p: f32| reported.lock().unwrap().push(p);
        let engine = engine_for(&server, &cache_dir);
        let chunks = engine
            .process_document_complete(&input, &output_dir, "doc-1", &record)
            .await
            .unwrap();

        assert_eq!(chunks, 2);
        summary.assert_async().await;
        upsert.assert_async().await;

        let manifest: Vec<ChunkPayload> = serde_json::from_slice(
            &std::fs::read(output_dir.join(MANIFEST_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest[0].kind, ChunkKind::Text);
        assert_eq!(manifest[0].section_title.as_deref(), Some("Sales"));
        assert_eq!(manifest[1].kind, ChunkKind::Table);
        assert!(manifest[1].content.ends_with("Summary: quarterly sales table"));
        assert_eq!(manifest[1].source, "sales.md");

        assert_eq!(std::fs::read_dir(cache_dir.join("modal")).unwrap().count(), 1);

        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 4);
        assert_eq!(reported.first().copied(), Some(0.3));
        assert_eq!(reported.last().copied(), Some(0.9));
    }

    #[tokio::test]
    async fn test_cached_description_skips_model() {
        let mut server = Server::new_async().await;
        mock_collection(&mut server).await;
        let chat = server
            .mock("POST", "/v1/chat/completions")
            .expect(0)
            .create_async()
            .await;
        mock_embeddings(&mut server, 2).await;
        mock_upsert(&mut server).await;

        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let key = modal_cache_key(&ModalItem::Equation {
            latex: "x = 1".into(),
            page_number: None,
        });
        std::fs::create_dir_all(cache_dir.join("modal")).unwrap();
        std::fs::write(cache_dir.join(format!("modal/{key}.txt")), "unit value").unwrap();

        let input = dir.path().join("eq.md");
        std::fs::write(&input, "$$\nx = 1\n$$\n").unwrap();

        let engine = engine_for(&server, &cache_dir);
        engine
            .process_document_complete(&input, &dir.path().join("out"), "doc-2", &|_: f32| {})
            .await
            .unwrap();
        chat.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_description_fails_document() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("eq.md");
        std::fs::write(&input, "$$\ny = 2\n$$\n").unwrap();

        let engine = engine_for(&server, &dir.path().join("cache"));
        let err = engine
            .process_document_complete(&input, &dir.path().join("out"), "doc-3", &|_: f32| {})
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Llm(_)));
        assert!(!dir.path().join("out").join(MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn test_query_without_hits_skips_model() {
        let mut server = Server::new_async().await;
        mock_collection(&mut server).await;
        mock_embeddings(&mut server, 1).await;
        let search = server
            .mock("POST", "/collections/rag_chunks/points/search")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "limit": 4,
                "filter": { "must": [{ "key": "kind", "match": { "any": ["text"] } }] }
            })))
            .with_status(200)
            .with_body(r#"{"result": []}"#)
            .create_async()
            .await;
        let chat = server
            .mock("POST", "/v1/chat/completions")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let answer = engine_for(&server, dir.path())
            .query("anything?", QueryMode::Local, 4)
            .await
            .unwrap();

        assert_eq!(answer, NO_CONTEXT_ANSWER);
        search.assert_async().await;
        chat.assert_async().await;
    }

    #[tokio::test]
    async fn test_multimodal_query_searches_all_kinds() {
        let mut server = Server::new_async().await;
        mock_collection(&mut server).await;
        mock_embeddings(&mut server, 1).await;
        let hits = serde_json::json!({
            "result": [
                { "id": "p1", "score": 0.9, "payload": scored("p1", "a", 0.9).payload },
                { "id": "p2", "score": 0.8, "payload": scored("p2", "b", 0.8).payload }
            ]
        });
        let search = server
            .mock("POST", "/collections/rag_chunks/points/search")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "limit": 6,
                "filter": { "must": [{ "key": "kind", "match": {
                    "any": ["text", "image", "table", "equation"]
                } }] }
            })))
            .with_status(200)
            .with_body(hits.to_string())
            .create_async()
            .await;
        let chat = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::Regex("content of p2".to_string()))
            .with_status(200)
            .with_body(chat_body("forty-two"))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let answer = engine_for(&server, dir.path())
            .query_multimodal("meaning?", QueryMode::Hybrid, 2)
            .await
            .unwrap();

        assert_eq!(answer, "forty-two");
        search.assert_async().await;
        chat.assert_async().await;
    }
}
