//! Direct insertion, queries and product analysis.

use std::str::FromStr;
use std::time::Instant;

use metrics::histogram;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::engine::QueryMode;
use crate::error::{ServiceError, ServiceResult};
use crate::ingestion::hash::compute_content_hash;
use crate::service::{DEFAULT_TOP_K, RagService};

/// Hex digits of the content hash used in generated ids
const DOC_ID_HASH_LEN: usize = 16;

/// Question used by product analysis when the caller gives none
pub const DEFAULT_PRODUCT_QUERY: &str = "Analyze this product for arbitrage opportunity";

/// Fields quoted in the product analysis prompt, with their labels
const PRODUCT_FIELDS: [(&str, &str); 6] = [
    ("ASIN", "asin"),
    ("Title", "title"),
    ("Category", "category"),
    ("Price US", "price_us"),
    ("Price CA", "price_ca"),
    ("BSR", "bsr"),
];

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub mode: QueryMode,
    /// Wall-clock seconds spent in the engine
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductAnalysis {
    pub analysis: String,
    pub product_asin: Option<Value>,
}

impl RagService {
    /// Index text directly, returning the document id used.
    pub async fn insert_content(
        &self,
        content: &str,
        metadata: Option<Map<String, Value>>,
        doc_id: Option<String>,
    ) -> ServiceResult<String> {
        let engine = self.engine()?;
        if content.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "content must not be empty".to_string(),
            });
        }

        let doc_id = doc_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| content_doc_id(content));
        engine
            .insert(content, &metadata.unwrap_or_default(), &doc_id)
            .await?;

        info!(doc_id = %doc_id, length = content.len(), "Content inserted");
        Ok(doc_id)
    }

    /// Answer a question, from text chunks or from every chunk kind.
    pub async fn query(
        &self,
        question: &str,
        mode: &str,
        multimodal: bool,
        top_k: usize,
    ) -> ServiceResult<QueryOutcome> {
        let engine = self.engine()?;
        let mode = QueryMode::from_str(mode).map_err(|_| ServiceError::InvalidRequest {
            message: format!("unknown query mode `{mode}`, expected naive, local, global or hybrid"),
        })?;
        if top_k == 0 {
            return Err(ServiceError::InvalidRequest {
                message: "top_k must be at least 1".to_string(),
            });
        }
        if question.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "query must not be empty".to_string(),
            });
        }

        let started = Instant::now();
        let answer = if multimodal {
            engine.query_multimodal(question, mode, top_k).await?
        } else {
            engine.query(question, mode, top_k).await?
        };
        let processing_time = started.elapsed().as_secs_f64();

        histogram!(
            "rag_query_seconds",
            "mode" => mode.to_string(),
            "multimodal" => multimodal.to_string()
        )
        .record(processing_time);
        debug!(%mode, multimodal, processing_time, "Query answered");

        Ok(QueryOutcome {
            answer,
            mode,
            processing_time,
        })
    }

    /// Ask the engine about a product in hybrid mode.
    pub async fn analyze_product(
        &self,
        product_info: &Map<String, Value>,
        context_query: Option<&str>,
    ) -> ServiceResult<ProductAnalysis> {
        let engine = self.engine()?;
        let prompt = product_prompt(product_info, context_query.unwrap_or(DEFAULT_PRODUCT_QUERY));

        let analysis = engine
            .query(&prompt, QueryMode::Hybrid, DEFAULT_TOP_K)
            .await?;

        Ok(ProductAnalysis {
            analysis,
            product_asin: product_info.get("asin").filter(|v| !v.is_null()).cloned(),
        })
    }
}

/// `doc-` plus a prefix of the content's SHA-256
fn content_doc_id(content: &str) -> String {
    let hash = compute_content_hash(content.as_bytes());
    format!("doc-{}", &hash[..DOC_ID_HASH_LEN])
}

fn product_prompt(product_info: &Map<String, Value>, context_query: &str) -> String {
    let fields = PRODUCT_FIELDS
        .iter()
        .map(|(label, key)| format!("- {label}: {}", product_field(product_info, key)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{context_query}\n\nProduct Information:\n{fields}\n\n\
         Based on historical data and patterns, provide analysis."
    )
}

fn product_field(product_info: &Map<String, Value>, key: &str) -> String {
    match product_info.get(key) {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
