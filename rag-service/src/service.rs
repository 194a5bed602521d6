//! Application context shared by all handlers.
//!
//! [`RagService`] owns the configuration, the retrieval engine (absent when
//! it failed to initialize), the document status tracker and the bounded
//! processing queue. Operations are split across submodules by concern.

mod documents;
mod queries;
pub mod tracker;
mod workers;

pub use queries::ProductAnalysis;
pub use tracker::{DocumentState, DocumentStatus, DocumentTracker};
pub use workers::ProcessingJob;

use std::fmt::Display;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RagConfig;
use crate::engine::RagEngine;
use crate::error::{EngineError, ServiceError, ServiceResult};
use crate::llm::OpenAiClient;
use crate::vector_store::QdrantStore;

/// Result count used when a request does not specify one
pub const DEFAULT_TOP_K: usize = 5;

/// Health report, never an error
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub localai_connected: bool,
    pub qdrant_connected: bool,
    pub rag_initialized: bool,
    pub documents_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub localai_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qdrant_error: Option<String>,
}

/// Main service coordinator
pub struct RagService {
    config: RagConfig,
    engine: Option<Arc<dyn RagEngine>>,
    tracker: DocumentTracker,
    job_tx: mpsc::Sender<ProcessingJob>,
    job_rx: Mutex<mpsc::Receiver<ProcessingJob>>,
    /// Tokens for documents currently being processed
    processing_tokens: DashMap<String, CancellationToken>,
    localai: OpenAiClient,
    qdrant: QdrantStore,
}

impl RagService {
    /// Build the service. `engine` is `None` when the engine failed to
    /// initialize; dependent operations then answer `EngineUnavailable`.
    pub fn new(config: RagConfig, engine: Option<Arc<dyn RagEngine>>) -> ServiceResult<Self> {
        let (job_tx, job_rx) = mpsc::channel(config.processing_queue_capacity);
        let localai = OpenAiClient::new(&config).map_err(EngineError::from)?;
        let qdrant = QdrantStore::new(&config).map_err(EngineError::from)?;

        info!(
            rag_initialized = engine.is_some(),
            workers = config.processing_workers,
            queue_capacity = config.processing_queue_capacity,
            "RAG service created"
        );

        Ok(Self {
            config,
            engine,
            tracker: DocumentTracker::new(),
            job_tx,
            job_rx: Mutex::new(job_rx),
            processing_tokens: DashMap::new(),
            localai,
            qdrant,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    fn engine(&self) -> ServiceResult<&Arc<dyn RagEngine>> {
        self.engine.as_ref().ok_or(ServiceError::EngineUnavailable)
    }

    /// Probe the inference server and the vector store concurrently.
    pub async fn health(&self) -> HealthReport {
        let timeout = self.config.health_probe_timeout();
        let (localai, qdrant) = tokio::join!(
            self.localai.readiness(timeout),
            self.qdrant.probe(timeout)
        );

        let localai_error = probe_failure("localai", localai);
        let qdrant_error = probe_failure("qdrant", qdrant);
        let rag_initialized = self.is_initialized();

        HealthReport {
            status: if rag_initialized {
                "healthy"
            } else {
                "initializing"
            },
            localai_connected: localai_error.is_none(),
            qdrant_connected: qdrant_error.is_none(),
            rag_initialized,
            documents_processed: self.tracker.len(),
            localai_error,
            qdrant_error,
        }
    }
}

fn probe_failure<E: Display>(dependency: &'static str, result: Result<(), E>) -> Option<String> {
    let error = result.err()?;
    warn!(dependency, error = %error, "Health probe failed");
    counter!("rag_health_probe_failures_total", "target" => dependency).increment(1);
    Some(error.to_string())
}
