//! Document processing worker pool.
//!
//! Uploads are queued on a bounded channel; a fixed number of workers share
//! the receiving end. Each running document has a cancellation token derived
//! from the shutdown token, so both deletion and shutdown stop it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::EngineError;
use crate::service::RagService;

/// An upload waiting for a worker
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub document_id: String,
    pub file_path: PathBuf,
}

impl RagService {
    /// Spawn the processing workers.
    ///
    /// Workers exit when `shutdown` is cancelled.
    pub fn start_processing_workers(
        service: Arc<RagService>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..service.config.processing_workers)
            .map(|worker| {
                let service = service.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(worker, "Document processing worker started");
                    loop {
                        let job = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            job = service.next_job() => match job {
                                Some(job) => job,
                                None => break,
                            },
                        };
                        service.process_job(job, &shutdown).await;
                    }
                    info!(worker, "Document processing worker stopped");
                })
            })
            .collect()
    }

    pub(crate) async fn next_job(&self) -> Option<ProcessingJob> {
        self.job_rx.lock().await.recv().await
    }

    /// Run one job to a terminal state.
    pub(crate) async fn process_job(&self, job: ProcessingJob, shutdown: &CancellationToken) {
        let doc_id = job.document_id.as_str();

        if !self.tracker.contains(doc_id) {
            info!(doc_id = %doc_id, "Skipping document deleted while queued");
            return;
        }
        let Some(engine) = self.engine.clone() else {
            self.tracker
                .mark_failed(doc_id, &crate::error::ServiceError::EngineUnavailable.to_string());
            return;
        };

        let token = self.register_processing_token(doc_id, shutdown);
        self.tracker.mark_processing(doc_id);
        info!(doc_id = %doc_id, path = %job.file_path.display(), "Processing document");

        let started = Instant::now();
        let output_dir = self.config.output_dir(doc_id);
        let tracker = &self.tracker;
        let progress = |value: f32| tracker.set_progress(doc_id, value);

        let result = tokio::select! {
            _ = token.cancelled() => Err(EngineError::Cancelled),
            result = engine.process_document_complete(&job.file_path, &output_dir, doc_id, &progress) => result,
        };
        self.unregister_processing_token(doc_id);

        match result {
            Ok(chunks) => {
                self.tracker.mark_completed(doc_id);
                counter!("rag_documents_completed_total").increment(1);
                info!(
                    doc_id = %doc_id,
                    chunks,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Document processed successfully"
                );
            }
            Err(EngineError::Cancelled) => {
                self.tracker
                    .mark_failed(doc_id, &EngineError::Cancelled.to_string());
                info!(doc_id = %doc_id, "Document processing cancelled");
            }
            Err(e) => {
                self.tracker.mark_failed(doc_id, &e.to_string());
                counter!("rag_documents_failed_total").increment(1);
                error!(doc_id = %doc_id, error = %e, "Failed to process document");
            }
        }
    }

    fn register_processing_token(
        &self,
        document_id: &str,
        shutdown: &CancellationToken,
    ) -> CancellationToken {
        let token = shutdown.child_token();
        self.processing_tokens
            .insert(document_id.to_string(), token.clone());
        token
    }

    /// Cancel processing for a document if in progress.
    pub(crate) fn cancel_document_processing(&self, document_id: &str) -> bool {
        if let Some((_, token)) = self.processing_tokens.remove(document_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    fn unregister_processing_token(&self, document_id: &str) {
        self.processing_tokens.remove(document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::DocumentState;
    use crate::service::tests::{MockEngine, test_service};
    use std::time::Duration;

    async fn wait_for_state(service: &RagService, id: &str, state: DocumentState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while service.document_status(id).map(|s| s.status).ok() != Some(state) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("document never reached expected state");
    }

    #[tokio::test]
    async fn test_successful_processing_completes() {
        let engine = Arc::new(MockEngine::default());
        let (service, _dir) = test_service(&[], Some(engine.clone()));
        let status = service.upload_document("a.txt", b"hello").await.unwrap();

        let job = service.next_job().await.unwrap();
        assert!(job.file_path.ends_with("a.txt"));
        service.process_job(job, &CancellationToken::new()).await;

        let done = service.document_status(&status.document_id).unwrap();
        assert_eq!(done.status, DocumentState::Completed);
        assert_eq!(done.progress, 1.0);
        assert_eq!(engine.calls(), [format!("process:{}", status.document_id)]);
    }

    #[tokio::test]
    async fn test_failed_processing_records_error() {
        let engine = Arc::new(MockEngine {
            fail_processing: true,
            ..Default::default()
        });
        let (service, _dir) = test_service(&[], Some(engine));
        let status = service.upload_document("a.txt", b"hello").await.unwrap();

        let job = service.next_job().await.unwrap();
        service.process_job(job, &CancellationToken::new()).await;

        let failed = service.document_status(&status.document_id).unwrap();
        assert_eq!(failed.status, DocumentState::Failed);
        assert!(failed.error.unwrap().contains("cannot read"));
        assert_eq!(failed.progress, 0.5);
    }

    #[tokio::test]
    async fn test_document_deleted_while_queued_is_skipped() {
        let engine = Arc::new(MockEngine::default());
        let (service, _dir) = test_service(&[], Some(engine.clone()));
        let status = service.upload_document("a.txt", b"hello").await.unwrap();
        service.delete_document(&status.document_id).await.unwrap();

        let job = service.next_job().await.unwrap();
        service.process_job(job, &CancellationToken::new()).await;

        assert!(!engine.calls().iter().any(|c| c.starts_with("process:")));
    }

    #[tokio::test]
    async fn test_delete_cancels_running_document() {
        let engine = Arc::new(MockEngine {
            block_processing: true,
            ..Default::default()
        });
        let (service, _dir) = test_service(&[], Some(engine.clone()));
        let shutdown = CancellationToken::new();
        let workers = RagService::start_processing_workers(service.clone(), shutdown.clone());

        let status = service.upload_document("a.txt", b"hello").await.unwrap();
        let id = status.document_id;
        wait_for_state(&service, &id, DocumentState::Processing).await;

        service.delete_document(&id).await.unwrap();
        assert!(service.document_status(&id).is_err());
        assert!(service.processing_tokens.is_empty());

        shutdown.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
        assert!(engine.calls().contains(&format!("delete:{id}")));
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_document() {
        let engine = Arc::new(MockEngine {
            block_processing: true,
            ..Default::default()
        });
        let (service, _dir) = test_service(&[("PROCESSING_WORKERS", "1")], Some(engine));
        let shutdown = CancellationToken::new();
        let workers = RagService::start_processing_workers(service.clone(), shutdown.clone());

        let status = service.upload_document("a.txt", b"hello").await.unwrap();
        wait_for_state(&service, &status.document_id, DocumentState::Processing).await;

        shutdown.cancel();
        for worker in workers {
            worker.await.unwrap();
        }

        let stopped = service.document_status(&status.document_id).unwrap();
        assert_eq!(stopped.status, DocumentState::Failed);
        assert_eq!(stopped.error.as_deref(), Some("Processing cancelled"));
    }
}
