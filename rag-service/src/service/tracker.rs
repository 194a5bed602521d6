//! In-memory document status records.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Lifecycle of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DocumentState {
    /// Stored and waiting for a worker
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Status record exposed by the status and list endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub document_id: String,
    pub filename: String,
    pub status: DocumentState,
    pub progress: f32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

struct TrackedDocument {
    sequence: u64,
    status: DocumentStatus,
}

/// Status records keyed by document id.
///
/// Updates for ids that are not tracked (deleted documents) are ignored.
#[derive(Default)]
pub struct DocumentTracker {
    documents: DashMap<String, TrackedDocument>,
    next_sequence: AtomicU64,
}

impl DocumentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new upload in the `pending` state.
    pub fn register(&self, document_id: &str, filename: &str) -> DocumentStatus {
        let status = DocumentStatus {
            document_id: document_id.to_string(),
            filename: filename.to_string(),
            status: DocumentState::Pending,
            progress: 0.0,
            error: None,
            created_at: Utc::now(),
        };
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.documents.insert(
            document_id.to_string(),
            TrackedDocument {
                sequence,
                status: status.clone(),
            },
        );
        status
    }

    pub fn get(&self, document_id: &str) -> Option<DocumentStatus> {
        self.documents
            .get(document_id)
            .map(|entry| entry.status.clone())
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.documents.contains_key(document_id)
    }

    /// All records, oldest first
    pub fn list(&self) -> Vec<DocumentStatus> {
        let mut entries: Vec<(u64, DocumentStatus)> = self
            .documents
            .iter()
            .map(|entry| (entry.sequence, entry.status.clone()))
            .collect();
        entries.sort_by(|a, b| {
            a.1.created_at
                .cmp(&b.1.created_at)
                .then_with(|| a.0.cmp(&b.0))
        });
        entries.into_iter().map(|(_, status)| status).collect()
    }

    pub fn mark_processing(&self, document_id: &str) {
        self.update(document_id, |status| {
            status.status = DocumentState::Processing;
            status.progress = 0.1;
            status.error = None;
        });
    }

    /// Record intermediate progress, clamped to `[0, 1]`.
    pub fn set_progress(&self, document_id: &str, progress: f32) {
        self.update(document_id, |status| {
            status.progress = progress.clamp(0.0, 1.0);
        });
    }

    pub fn mark_completed(&self, document_id: &str) {
        self.update(document_id, |status| {
            status.status = DocumentState::Completed;
            status.progress = 1.0;
            status.error = None;
        });
    }

    pub fn mark_failed(&self, document_id: &str, error: &str) {
        self.update(document_id, |status| {
            status.status = DocumentState::Failed;
            status.error = Some(error.to_string());
        });
    }

    pub fn remove(&self, document_id: &str) -> Option<DocumentStatus> {
        self.documents
            .remove(document_id)
            .map(|(_, entry)| entry.status)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn update(&self, document_id: &str, apply: impl FnOnce(&mut DocumentStatus)) {
        if let Some(mut entry) = self.documents.get_mut(document_id) {
            apply(&mut entry.status);
        }
    }
}
