//! Record store for [`Document`]s.
//!
//! [`DocumentStore`] is the seam between the pipeline / HTTP layer and the
//! storage engine. Callers hold an `Arc<dyn DocumentStore>` constructed once
//! at startup, so a durable backend can replace [`MemoryDocumentStore`]
//! without touching them.
//!
//! Every method is a single atomic read or read-modify-write keyed by id.
//! Lifecycle rules live in [`MemoryDocumentStore::update`]: status changes
//! outside the graph are rejected and `processed_at` is stamped on the first
//! success. `extracted_data` may only be set on a `processed` record and an
//! error message only on a `failed` one.

use crate::document::{
    Document, DocumentFilter, DocumentStats, DocumentStatus, DocumentUpdate, NewDocument,
};
use crate::error::LoanScanError;
use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Keyed store of document records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: u64) -> Option<Document>;

    /// Documents matching `filter`, newest upload first.
    async fn list(&self, filter: &DocumentFilter) -> Vec<Document>;

    /// Insert a new `queued` record with a fresh id.
    async fn create(&self, new: NewDocument) -> Document;

    /// Merge a partial update into an existing record.
    ///
    /// Returns `Ok(None)` if no record has this id.
    async fn update(
        &self,
        id: u64,
        update: DocumentUpdate,
    ) -> Result<Option<Document>, LoanScanError>;

    async fn delete(&self, id: u64) -> bool;

    async fn stats(&self) -> DocumentStats;
}

struct Inner {
    next_id: u64,
    documents: HashMap<u64, Document>,
}

/// In-process [`DocumentStore`]. Contents do not survive a restart.
pub struct MemoryDocumentStore {
    inner: RwLock<Inner>,
    /// Timezone in which `upload_date` filters are evaluated.
    reference_tz: FixedOffset,
}

impl MemoryDocumentStore {
    /// Store that evaluates date filters in UTC.
    pub fn new() -> Self {
        Self::with_reference_tz(Utc.fix())
    }

    pub fn with_reference_tz(reference_tz: FixedOffset) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                documents: HashMap::new(),
            }),
            reference_tz,
        }
    }

    pub fn reference_tz(&self) -> FixedOffset {
        self.reference_tz
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `update` to `doc`, enforcing lifecycle invariants.
///
/// Validation runs before any field is touched so a rejected update leaves
/// the record unchanged.
fn apply_update(doc: &mut Document, update: DocumentUpdate) -> Result<(), LoanScanError> {
    let next_status = update.status.unwrap_or(doc.status);

    if let Some(to) = update.status {
        if !doc.status.can_transition_to(to) {
            return Err(LoanScanError::IllegalTransition {
                id: doc.id,
                from: doc.status,
                to,
            });
        }
    }
    if let Some(Some(_)) = update.extracted_data {
        if next_status != DocumentStatus::Processed {
            return Err(LoanScanError::ExtractedDataWithoutSuccess {
                id: doc.id,
                status: next_status,
            });
        }
    }
    if let Some(Some(_)) = update.error_message {
        if next_status != DocumentStatus::Failed {
            return Err(LoanScanError::ErrorMessageWithoutFailure {
                id: doc.id,
                status: next_status,
            });
        }
    }

    if let Some(data) = update.extracted_data {
        doc.extracted_data = data;
    }
    if let Some(message) = update.error_message {
        doc.error_message = message;
    }
    if let Some(ms) = update.processing_time {
        doc.processing_time = Some(ms);
    }
    if let Some(confidence) = update.confidence {
        doc.confidence = Some(confidence.min(100));
    }

    if let Some(to) = update.status {
        doc.status = to;
        match to {
            DocumentStatus::Processed => {
                if doc.processed_at.is_none() {
                    doc.processed_at = Some(Utc::now());
                }
            }
            DocumentStatus::Queued => {
                doc.error_message = None;
                doc.extracted_data = None;
            }
            DocumentStatus::Processing | DocumentStatus::Failed => {
                doc.extracted_data = None;
            }
        }
    }

    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: u64) -> Option<Document> {
        self.inner.read().await.documents.get(&id).cloned()
    }

    async fn list(&self, filter: &DocumentFilter) -> Vec<Document> {
        let inner = self.inner.read().await;
        let mut docs: Vec<Document> = inner
            .documents
            .values()
            .filter(|d| filter.matches(d, &self.reference_tz))
            .cloned()
            .collect();
        docs.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        docs
    }

    async fn create(&self, new: NewDocument) -> Document {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let doc = Document {
            id,
            filename: new.filename,
            original_name: new.original_name,
            file_type: new.file_type,
            mime_type: new.mime_type,
            file_size: new.file_size,
            file_path: new.file_path,
            status: DocumentStatus::Queued,
            uploaded_at: Utc::now(),
            processed_at: None,
            extracted_data: None,
            error_message: None,
            processing_time: None,
            confidence: None,
        };
        inner.documents.insert(id, doc.clone());
        debug!("Created document {} ({})", id, doc.original_name);
        doc
    }

    async fn update(
        &self,
        id: u64,
        update: DocumentUpdate,
    ) -> Result<Option<Document>, LoanScanError> {
        let mut inner = self.inner.write().await;
        let Some(doc) = inner.documents.get_mut(&id) else {
            return Ok(None);
        };
        apply_update(doc, update)?;
        Ok(Some(doc.clone()))
    }

    async fn delete(&self, id: u64) -> bool {
        self.inner.write().await.documents.remove(&id).is_some()
    }

    async fn stats(&self) -> DocumentStats {
        let inner = self.inner.read().await;
        let mut stats = DocumentStats {
            total: inner.documents.len(),
            ..Default::default()
        };
        for doc in inner.documents.values() {
            match doc.status {
                DocumentStatus::Queued => stats.queued += 1,
                DocumentStatus::Processing => stats.processing += 1,
                DocumentStatus::Processed => stats.processed += 1,
                DocumentStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}
