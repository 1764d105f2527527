//! Document processing orchestrator.
//!
//! [`Pipeline`] drives one document id through its lifecycle:
//!
//! ```text
//! 1. queued → processing     persisted before any heavy work
//! 2. re-fetch record         DocumentNotFound if it vanished
//! 3. read stored file        timer starts here
//! 4. normalise               PDF pages / re-encoded image
//! 5. extract every page      failed pages are logged and skipped
//! 6. merge                   NoDataExtracted if no page succeeded
//! 7. processing → processed  with data, timing and confidence
//! 8. processing → failed     on any error from 2–6, with its message
//! ```
//!
//! The orchestrator only ever holds a document id. Every read and write goes
//! through the [`DocumentStore`].
//!
//! ## Scheduling
//!
//! [`Pipeline::spawn`] is fire-and-forget: it returns a `JoinHandle` at once
//! and never fails. A semaphore bounds how many documents run at the same
//! time; the rest wait in `queued`, so the queued → processing flip stays
//! the observable start of work. Callers must not spawn the same id twice
//! concurrently; a duplicate run is refused by the store's transition check
//! and exits without touching the record.

use crate::config::PipelineConfig;
use crate::document::{Document, DocumentFilter, DocumentStatus, DocumentUpdate, NewDocument};
use crate::error::{LoanScanError, PageError};
use crate::fields::ExtractedFields;
use crate::pipeline::llm::{FieldExtractor, VisionExtractor};
use crate::pipeline::merge::{merge_pages, MergedFields};
use crate::pipeline::normalize::{PageNormalizer, RasterNormalizer};
use crate::pipeline::{input, PageImage};
use crate::store::DocumentStore;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Drives documents from `queued` to a terminal state.
pub struct Pipeline {
    store: Arc<dyn DocumentStore>,
    normalizer: Arc<dyn PageNormalizer>,
    extractor: Arc<dyn FieldExtractor>,
    config: PipelineConfig,
    permits: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        normalizer: Arc<dyn PageNormalizer>,
        extractor: Arc<dyn FieldExtractor>,
        config: PipelineConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_documents.max(1)));
        Self {
            store,
            normalizer,
            extractor,
            config,
            permits,
        }
    }

    /// Pipeline with the pdfium normaliser and a VLM extractor resolved from
    /// `config` and the environment.
    pub fn from_config(
        store: Arc<dyn DocumentStore>,
        config: PipelineConfig,
    ) -> Result<Self, LoanScanError> {
        let extractor = VisionExtractor::from_config(&config)?;
        let normalizer = RasterNormalizer::new(config.clone());
        Ok(Self::new(
            store,
            Arc::new(normalizer),
            Arc::new(extractor),
            config,
        ))
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create a `queued` record for an uploaded file and schedule it.
    pub async fn enqueue(self: &Arc<Self>, new: NewDocument) -> (Document, JoinHandle<()>) {
        let doc = self.store.create(new).await;
        info!("Document {} queued ({})", doc.id, doc.original_name);
        let handle = self.spawn(doc.id);
        (doc, handle)
    }

    /// Schedule a run for `id` and return immediately.
    pub fn spawn(self: &Arc<Self>, id: u64) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match Arc::clone(&this.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Document {}: scheduler closed: {}", id, e);
                    return;
                }
            };
            this.run(id).await;
        })
    }

    /// Reset a `failed` document to `queued` and schedule a new run.
    ///
    /// Returns the record as it was right after the reset.
    pub async fn retry(
        self: &Arc<Self>,
        id: u64,
    ) -> Result<(Document, JoinHandle<()>), LoanScanError> {
        let doc = self
            .store
            .update(id, DocumentUpdate::requeue())
            .await?
            .ok_or(LoanScanError::DocumentNotFound { id })?;
        info!("Document {} re-queued for retry", id);
        let handle = self.spawn(id);
        Ok((doc, handle))
    }

    /// Retry every document currently `failed`, each as an independent run.
    pub async fn retry_all_failed(self: &Arc<Self>) -> Vec<(u64, JoinHandle<()>)> {
        let filter = DocumentFilter {
            status: Some(DocumentStatus::Failed),
            upload_date: None,
        };
        let failed = self.store.list(&filter).await;
        info!("Retrying {} failed document(s)", failed.len());

        let mut handles = Vec::with_capacity(failed.len());
        for doc in failed {
            match self.retry(doc.id).await {
                Ok((_, handle)) => handles.push((doc.id, handle)),
                Err(e) => warn!("Document {}: retry skipped: {}", doc.id, e),
            }
        }
        handles
    }

    /// Process `id` to a terminal state and return the final record.
    ///
    /// Never fails: errors are persisted as `failed` with their message.
    /// Returns `None` only if the record is gone.
    pub async fn run(&self, id: u64) -> Option<Document> {
        match self
            .store
            .update(id, DocumentUpdate::status(DocumentStatus::Processing))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Document {} not found; nothing to process", id);
                return None;
            }
            Err(e) => {
                warn!("Document {} not started: {}", id, e);
                return self.store.get(id).await;
            }
        }
        info!("Processing document {}", id);

        let update = match self.process(id).await {
            Ok((merged, elapsed_ms)) => {
                info!(
                    "Document {} processed: {}/{} fields, confidence {}, {}ms",
                    id,
                    merged.fields.fields_found.len(),
                    merged.fields.fields_found.len() + merged.fields.fields_not_found.len(),
                    merged.average_confidence,
                    elapsed_ms
                );
                DocumentUpdate::processed(merged.fields, elapsed_ms, merged.average_confidence)
            }
            Err(e) => {
                warn!("Document {} failed: {}", id, e);
                DocumentUpdate::failed(e.to_string())
            }
        };

        match self.store.update(id, update).await {
            Ok(Some(doc)) => Some(doc),
            Ok(None) => {
                error!("Document {} vanished before its result could be saved", id);
                None
            }
            Err(e) => {
                error!("Document {}: could not save result: {}", id, e);
                None
            }
        }
    }

    /// Steps 2–6. Returns the merged result and elapsed milliseconds.
    async fn process(&self, id: u64) -> Result<(MergedFields, u64), LoanScanError> {
        let doc = self
            .store
            .get(id)
            .await
            .ok_or(LoanScanError::DocumentNotFound { id })?;

        let start = Instant::now();
        let bytes = input::read_file(&doc.file_path).await?;
        let pages = self.normalizer.normalize(bytes, doc.file_type).await?;
        let total_pages = pages.len();
        debug!("Document {}: {} page(s) to extract", id, total_pages);

        let mut extracted = Vec::with_capacity(total_pages);
        let mut first_error: Option<String> = None;
        for result in self.extract_pages(&pages).await {
            match result {
                Ok(fields) => extracted.push(fields),
                Err(e) => {
                    warn!("Document {}: skipping {}", id, e);
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if extracted.is_empty() {
            return Err(LoanScanError::NoDataExtracted {
                pages: total_pages,
                first_error,
            });
        }

        let merged = merge_pages(&extracted)?;
        Ok((merged, start.elapsed().as_millis() as u64))
    }

    /// Extract every page with a timeout. Calls may overlap, but results come
    /// back in page order so the merge tie-break stays deterministic.
    async fn extract_pages(&self, pages: &[PageImage]) -> Vec<Result<ExtractedFields, PageError>> {
        let secs = self.config.api_timeout_secs;
        let timeout = Duration::from_secs(secs);

        let calls: Vec<_> = pages
            .iter()
            .map(|page| async move {
                match tokio::time::timeout(timeout, self.extractor.extract(page)).await {
                    Ok(Ok(fields)) => {
                        debug!(
                            "Page {}: {} field(s) found",
                            page.page_num,
                            fields.fields_found.len()
                        );
                        Ok(fields)
                    }
                    Ok(Err(e)) => Err(PageError::ExtractionFailed {
                        page: page.page_num,
                        detail: e.to_string(),
                    }),
                    Err(_) => Err(PageError::Timeout {
                        page: page.page_num,
                        secs,
                    }),
                }
            })
            .collect();

        stream::iter(calls)
            .buffered(self.config.page_concurrency.max(1))
            .collect()
            .await
    }
}
