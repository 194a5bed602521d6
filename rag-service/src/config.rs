use config::{Config, Environment};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

/// Service configuration, read from the process environment at startup.
///
/// Every field maps to the upper-case variable of the same name
/// (`localai_url` ← `LOCALAI_URL`).
#[derive(Debug, Clone, Deserialize)]
pub struct RagConfig {
    // Inference server (OpenAI-compatible)
    #[serde(default = "default_localai_url")]
    pub localai_url: String,

    #[serde(default = "default_localai_api_key")]
    pub localai_api_key: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Texts per `/embeddings` request
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,

    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,

    #[serde(default = "default_vision_max_tokens")]
    pub vision_max_tokens: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Vector database
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    #[serde(default)]
    pub qdrant_api_key: Option<String>,

    #[serde(default = "default_qdrant_collection")]
    pub qdrant_collection: String,

    // Storage
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    // Document processing
    /// `builtin`, `mineru` or `docling`
    #[serde(default = "default_parser")]
    pub parser: String,

    #[serde(default = "default_true")]
    pub enable_image_processing: bool,

    #[serde(default = "default_true")]
    pub enable_table_processing: bool,

    #[serde(default = "default_true")]
    pub enable_equation_processing: bool,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_processing_workers")]
    pub processing_workers: usize,

    #[serde(default = "default_processing_queue_capacity")]
    pub processing_queue_capacity: usize,

    #[serde(default = "default_max_document_size_bytes")]
    pub max_document_size_bytes: u64,

    #[serde(default = "default_health_probe_timeout_secs")]
    pub health_probe_timeout_secs: u64,

    // Server
    #[serde(default = "default_host")]
    pub server_host: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_localai_url() -> String {
    "http://localai:8080/v1".to_string()
}

fn default_localai_api_key() -> String {
    "not-needed".to_string()
}

fn default_llm_model() -> String {
    "llama3".to_string()
}

fn default_vision_model() -> String {
    "llava".to_string()
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}

fn default_embedding_dim() -> usize {
    384
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_llm_temperature() -> f32 {
    0.7
}

fn default_llm_max_tokens() -> u32 {
    2048
}

fn default_vision_max_tokens() -> u32 {
    1024
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_qdrant_url() -> String {
    "http://qdrant:6333".to_string()
}

fn default_qdrant_collection() -> String {
    "rag_chunks".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/data/rag")
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("/data/documents")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/data/cache")
}

fn default_parser() -> String {
    "builtin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    64
}

fn default_processing_workers() -> usize {
    2
}

fn default_processing_queue_capacity() -> usize {
    64
}

fn default_max_document_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_health_probe_timeout_secs() -> u64 {
    5
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl RagConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> ServiceResult<Self> {
        Self::from_source(Environment::default().try_parsing(true))
    }

    pub(crate) fn from_source(source: Environment) -> ServiceResult<Self> {
        let config: Self = Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ServiceError::Config {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ServiceResult<()> {
        if self.chunk_size == 0 {
            return Err(ServiceError::Config {
                message: "CHUNK_SIZE must be positive".to_string(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ServiceError::Config {
                message: "CHUNK_OVERLAP must be smaller than CHUNK_SIZE".to_string(),
            });
        }
        if self.processing_workers == 0 || self.processing_queue_capacity == 0 {
            return Err(ServiceError::Config {
                message: "PROCESSING_WORKERS and PROCESSING_QUEUE_CAPACITY must be positive"
                    .to_string(),
            });
        }
        if self.embedding_batch_size == 0 {
            return Err(ServiceError::Config {
                message: "EMBEDDING_BATCH_SIZE must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Inference server root, without the trailing `/v1` API prefix
    pub fn localai_root(&self) -> &str {
        let url = self.localai_url.trim_end_matches('/');
        url.strip_suffix("/v1").unwrap_or(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Where an upload is stored: `{DOCUMENTS_DIR}/{id}`
    pub fn document_dir(&self, document_id: &str) -> PathBuf {
        self.documents_dir.join(document_id)
    }

    /// Where processing output for a document goes: `{WORKING_DIR}/{id}`
    pub fn output_dir(&self, document_id: &str) -> PathBuf {
        self.working_dir.join(document_id)
    }
}
