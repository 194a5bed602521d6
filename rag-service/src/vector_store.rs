//! Qdrant vector store over its REST API.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::RagConfig;
use crate::error::VectorStoreError;

/// Points per upsert request
const UPSERT_BATCH_SIZE: usize = 256;

/// What a stored chunk was derived from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChunkKind {
    Text,
    Image,
    Table,
    Equation,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 4] = [
        ChunkKind::Text,
        ChunkKind::Image,
        ChunkKind::Table,
        ChunkKind::Equation,
    ];
}

/// Payload stored with every vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub doc_id: String,
    pub content: String,
    pub kind: ChunkKind,
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoredChunk {
    pub id: serde_json::Value,
    pub score: f32,
    pub payload: ChunkPayload,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

/// Qdrant REST client bound to one collection
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dimension: usize,
    collection_ready: OnceCell<()>,
}

impl QdrantStore {
    pub fn new(config: &RagConfig) -> Result<Self, VectorStoreError> {
        let base_url = config.qdrant_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| VectorStoreError::Connection {
                url: base_url.clone(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: config.qdrant_api_key.clone().filter(|k| !k.is_empty()),
            collection: config.qdrant_collection.clone(),
            dimension: config.embedding_dim,
            collection_ready: OnceCell::new(),
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, VectorStoreError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| VectorStoreError::Connection {
                url: url.to_string(),
                source: e,
            })
    }

    /// Create the collection on first use.
    pub async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        self.collection_ready
            .get_or_try_init(|| self.create_collection_if_missing())
            .await?;
        Ok(())
    }

    async fn create_collection_if_missing(&self) -> Result<(), VectorStoreError> {
        let url = self.collection_url("");
        let response = self.send(&url, self.client.get(&url)).await?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response).await?;
            return Ok(());
        }

        let body = serde_json::json!({
            "vectors": { "size": self.dimension, "distance": "Cosine" }
        });
        let response = self.send(&url, self.client.put(&url).json(&body)).await?;
        check_status(response).await?;

        info!(
            collection = %self.collection,
            dimension = self.dimension,
            "Created vector collection"
        );
        Ok(())
    }

    /// Insert or replace points.
    pub async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }
        self.ensure_collection().await?;

        let url = self.collection_url("/points?wait=true");
        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            let body = serde_json::json!({ "points": batch });
            let response = self.send(&url, self.client.put(&url).json(&body)).await?;
            check_status(response).await?;
        }

        debug!(count = points.len(), collection = %self.collection, "Upserted points");
        Ok(())
    }

    /// Nearest chunks to `vector`, restricted to the given kinds.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        kinds: &[ChunkKind],
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        self.ensure_collection().await?;

        let kinds: Vec<&str> = kinds.iter().map(|k| k.as_ref()).collect();
        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "filter": {
                "must": [{ "key": "kind", "match": { "any": kinds } }]
            }
        });

        let url = self.collection_url("/points/search");
        let response = self.send(&url, self.client.post(&url).json(&body)).await?;
        let parsed: QdrantResponse<Vec<ScoredChunk>> = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| VectorStoreError::InvalidResponse {
                message: e.to_string(),
            })?;

        Ok(parsed.result)
    }

    /// Remove every point belonging to a document.
    pub async fn delete_document(&self, doc_id: &str) -> Result<(), VectorStoreError> {
        let url = self.collection_url("/points/delete?wait=true");
        let body = serde_json::json!({
            "filter": {
                "must": [{ "key": "doc_id", "match": { "value": doc_id } }]
            }
        });

        let response = self.send(&url, self.client.post(&url).json(&body)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Nothing was ever indexed
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    /// Probe the server by listing collections.
    pub async fn probe(&self, timeout: Duration) -> Result<(), VectorStoreError> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .send(&url, self.client.get(&url).timeout(timeout))
            .await?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, VectorStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(VectorStoreError::Request {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::load;
    use mockito::{Matcher, Server};

    fn store_for(server: &Server, api_key: Option<&str>) -> QdrantStore {
        let mut config = load(&[]).unwrap();
        config.qdrant_url = server.url();
        config.qdrant_api_key = api_key.map(str::to_string);
        config.embedding_dim = 3;
        QdrantStore::new(&config).unwrap()
    }

    fn payload(doc_id: &str, kind: ChunkKind) -> ChunkPayload {
        ChunkPayload {
            doc_id: doc_id.to_string(),
            content: "some text".to_string(),
            kind,
            chunk_index: 0,
            page_number: Some(2),
            section_title: None,
            source: "report.pdf".to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_creates_missing_collection_once() {
        let mut server = Server::new_async().await;
        let lookup = server
            .mock("GET", "/collections/rag_chunks")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let create = server
            .mock("PUT", "/collections/rag_chunks")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "vectors": { "size": 3, "distance": "Cosine" }
            })))
            .with_status(200)
            .with_body(r#"{"result": true, "status": "ok"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = store_for(&server, None);
        store.ensure_collection().await.unwrap();
        store.ensure_collection().await.unwrap();

        lookup.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_sends_api_key_and_points() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/collections/rag_chunks")
            .match_header("api-key", "secret")
            .with_status(200)
            .with_body(r#"{"result": {}}"#)
            .create_async()
            .await;
        let upsert = server
            .mock("PUT", "/collections/rag_chunks/points")
            .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
            .match_header("api-key", "secret")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "points": [{ "id": "p1", "payload": { "doc_id": "doc-1", "kind": "text" } }]
            })))
            .with_status(200)
            .with_body(r#"{"result": {"status": "completed"}}"#)
            .create_async()
            .await;

        let store = store_for(&server, Some("secret"));
        store
            .upsert(&[ChunkPoint {
                id: "p1".to_string(),
                vector: vec![0.1, 0.2, 0.3],
                payload: payload("doc-1", ChunkKind::Text),
            }])
            .await
            .unwrap();
        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_filters_kinds_and_parses_hits() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/collections/rag_chunks")
            .with_status(200)
            .with_body(r#"{"result": {}}"#)
            .create_async()
            .await;
        let hit = serde_json::json!({
            "result": [{
                "id": "4c2d7a0e-1111-4222-8333-444455556666",
                "version": 3,
                "score": 0.91,
                "payload": payload("doc-9", ChunkKind::Table)
            }],
            "status": "ok"
        });
        let search = server
            .mock("POST", "/collections/rag_chunks/points/search")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "limit": 4,
                "filter": { "must": [{ "key": "kind", "match": { "any": ["text", "table"] } }] }
            })))
            .with_status(200)
            .with_body(hit.to_string())
            .create_async()
            .await;

        let store = store_for(&server, None);
        let hits = store
            .search(&[0.0, 1.0, 0.0], 4, &[ChunkKind::Text, ChunkKind::Table])
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.doc_id, "doc-9");
        assert_eq!(hits[0].payload.kind, ChunkKind::Table);
        assert!((hits[0].score - 0.91).abs() < 1e-6);
        search.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_document_filters_by_doc_id() {
        let mut server = Server::new_async().await;
        let delete = server
            .mock("POST", "/collections/rag_chunks/points/delete")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "filter": { "must": [{ "key": "doc_id", "match": { "value": "doc-3" } }] }
            })))
            .with_status(200)
            .with_body(r#"{"result": {"status": "completed"}}"#)
            .create_async()
            .await;

        store_for(&server, None).delete_document("doc-3").await.unwrap();
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_without_collection_is_ok() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/collections/rag_chunks/points/delete")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        assert!(store_for(&server, None).delete_document("doc-3").await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_reports_failure_status() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/collections")
            .with_status(502)
            .create_async()
            .await;

        let err = store_for(&server, None)
            .probe(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Request { status: 502, .. }));
    }

    #[test]
    fn test_chunk_kind_names() {
        assert_eq!(ChunkKind::Equation.as_ref(), "equation");
        assert_eq!("table".parse::<ChunkKind>().unwrap(), ChunkKind::Table);
        assert_eq!(
            serde_json::to_value(ChunkKind::Image).unwrap(),
            serde_json::json!("image")
        );
    }
}
