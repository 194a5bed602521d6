//! Document upload, status and deletion.

use std::path::Path;

use metrics::counter;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::ingestion::sanitize_filename;
use crate::service::{DocumentStatus, ProcessingJob, RagService};

impl RagService {
    /// Store an upload and queue it for processing.
    ///
    /// Queue capacity is reserved before anything is written, so a rejected
    /// upload leaves nothing behind.
    pub async fn upload_document(
        &self,
        filename: &str,
        content: &[u8],
    ) -> ServiceResult<DocumentStatus> {
        self.engine()?;

        let size = content.len() as u64;
        let max = self.config.max_document_size_bytes;
        if size > max {
            counter!("rag_uploads_rejected_total", "reason" => "too_large").increment(1);
            return Err(ServiceError::FileTooLarge { size, max });
        }

        let permit = self.job_tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => {
                counter!("rag_uploads_rejected_total", "reason" => "queue_full").increment(1);
                warn!(filename = %filename, "Processing queue full, rejecting upload");
                ServiceError::QueueFull {
                    capacity: self.config.processing_queue_capacity,
                }
            }
            TrySendError::Closed(()) => ServiceError::Internal {
                message: "processing queue is closed".to_string(),
            },
        })?;

        let document_id = Uuid::new_v4().to_string();
        let document_dir = self.config.document_dir(&document_id);
        let file_path = document_dir.join(sanitize_filename(filename));

        tokio::fs::create_dir_all(&document_dir)
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("Failed to create document directory: {e}"),
            })?;
        tokio::fs::write(&file_path, content)
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("Failed to store upload: {e}"),
            })?;

        let status = self.tracker.register(&document_id, filename);
        permit.send(ProcessingJob {
            document_id: document_id.clone(),
            file_path,
        });
        counter!("rag_documents_uploaded_total").increment(1);

        info!(
            doc_id = %document_id,
            filename = %filename,
            size,
            "Document uploaded and queued for processing"
        );
        Ok(status)
    }

    pub fn document_status(&self, document_id: &str) -> ServiceResult<DocumentStatus> {
        self.tracker
            .get(document_id)
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    /// All tracked documents, oldest first
    pub fn list_documents(&self) -> Vec<DocumentStatus> {
        self.tracker.list()
    }

    /// Delete a document, its files and its indexed chunks.
    ///
    /// A filesystem failure is returned before the record is touched.
    pub async fn delete_document(&self, document_id: &str) -> ServiceResult<()> {
        if !self.tracker.contains(document_id) {
            return Err(ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            });
        }

        if self.cancel_document_processing(document_id) {
            info!(doc_id = %document_id, "Cancelled in-progress processing for deleted document");
        }

        remove_dir_if_exists(&self.config.document_dir(document_id)).await?;
        remove_dir_if_exists(&self.config.output_dir(document_id)).await?;

        if let Some(engine) = &self.engine {
            if let Err(e) = engine.delete_document(document_id).await {
                warn!(doc_id = %document_id, error = %e, "Failed to purge document vectors");
            }
        }

        self.tracker.remove(document_id);
        info!(doc_id = %document_id, "Document deleted");
        Ok(())
    }
}

async fn remove_dir_if_exists(path: &Path) -> ServiceResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ServiceError::Internal {
            message: format!("Failed to remove {}: {e}", path.display()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::DocumentState;
    use crate::service::tests::{MockEngine, test_service};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_upload_registers_pending_record() {
        let (service, _dir) = test_service(&[], Some(Arc::new(MockEngine::default())));

        let status = service
            .upload_document("../Q3 report.txt", b"quarterly numbers")
            .await
            .unwrap();
        assert_eq!(status.status, DocumentState::Pending);
        assert_eq!(status.filename, "../Q3 report.txt");

        let stored = service
            .config()
            .document_dir(&status.document_id)
            .join("Q3_report.txt");
        assert_eq!(std::fs::read(stored).unwrap(), b"quarterly numbers");

        let observed = service.document_status(&status.document_id).unwrap();
        assert_eq!(observed.status, DocumentState::Pending);
    }

    #[tokio::test]
    async fn test_upload_requires_engine() {
        let (service, _dir) = test_service(&[], None);
        let err = service.upload_document("a.txt", b"x").await.unwrap_err();
        assert!(matches!(err, ServiceError::EngineUnavailable));
        assert!(service.list_documents().is_empty());
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_file() {
        let (service, _dir) = test_service(
            &[("MAX_DOCUMENT_SIZE_BYTES", "4")],
            Some(Arc::new(MockEngine::default())),
        );
        let err = service.upload_document("a.txt", b"12345").await.unwrap_err();
        assert!(matches!(err, ServiceError::FileTooLarge { size: 5, max: 4 }));
    }

    #[tokio::test]
    async fn test_full_queue_rejects_upload_without_writing() {
        let (service, _dir) = test_service(
            &[("PROCESSING_QUEUE_CAPACITY", "1")],
            Some(Arc::new(MockEngine::default())),
        );

        service.upload_document("a.txt", b"first").await.unwrap();
        let err = service.upload_document("b.txt", b"second").await.unwrap_err();

        assert!(matches!(err, ServiceError::QueueFull { capacity: 1 }));
        assert_eq!(service.list_documents().len(), 1);
        let stored = std::fs::read_dir(&service.config().documents_dir)
            .unwrap()
            .count();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_files() {
        let engine = Arc::new(MockEngine::default());
        let (service, _dir) = test_service(&[], Some(engine.clone()));

        let status = service.upload_document("a.txt", b"x").await.unwrap();
        let id = status.document_id;
        let output_dir = service.config().output_dir(&id);
        std::fs::create_dir_all(&output_dir).unwrap();
        std::fs::write(output_dir.join("chunks.json"), "[]").unwrap();

        service.delete_document(&id).await.unwrap();

        assert!(!service.config().document_dir(&id).exists());
        assert!(!output_dir.exists());
        assert!(matches!(
            service.document_status(&id),
            Err(ServiceError::DocumentNotFound { .. })
        ));
        assert_eq!(engine.calls(), [format!("delete:{id}")]);
    }

    #[tokio::test]
    async fn test_delete_unknown_document() {
        let (service, _dir) = test_service(&[], Some(Arc::new(MockEngine::default())));
        let err = service.delete_document("missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::DocumentNotFound { document_id } if document_id == "missing"));
    }

    #[tokio::test]
    async fn test_list_keeps_upload_order() {
        let (service, _dir) = test_service(&[], Some(Arc::new(MockEngine::default())));
        let first = service.upload_document("one.txt", b"1").await.unwrap();
        let second = service.upload_document("two.txt", b"2").await.unwrap();

        let ids: Vec<String> = service
            .list_documents()
            .into_iter()
            .map(|d| d.document_id)
            .collect();
        assert_eq!(ids, [first.document_id, second.document_id]);
    }
}
