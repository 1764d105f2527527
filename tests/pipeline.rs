//! Lifecycle tests for the document pipeline.
//!
//! The normaliser and extractor are replaced with scripted stand-ins so the
//! tests need neither pdfium nor an LLM provider. Everything else (store,
//! orchestrator, merge) is the real implementation.

use async_trait::async_trait;
use loanscan::{
    Document, DocumentStatus, DocumentStore, ExtractedFields, FieldExtractor, FileKind, LoanField,
    LoanScanError, MemoryDocumentStore, NewDocument, PageImage, PageNormalizer, Pipeline,
    PipelineConfig,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ── Stand-ins ────────────────────────────────────────────────────────────────

/// Produces `pages` blank pages, or a conversion error when `pages == 0`.
struct FakeNormalizer {
    pages: usize,
}

#[async_trait]
impl PageNormalizer for FakeNormalizer {
    async fn normalize(
        &self,
        _bytes: Vec<u8>,
        _kind: FileKind,
    ) -> Result<Vec<PageImage>, LoanScanError> {
        if self.pages == 0 {
            return Err(LoanScanError::Conversion {
                detail: "PDF has no pages".into(),
            });
        }
        Ok((1..=self.pages)
            .map(|page_num| PageImage {
                page_num,
                jpeg: vec![0xFF, 0xD8, 0xFF],
                width: 10,
                height: 10,
            })
            .collect())
    }
}

/// Yields only the listed pages, as when the others failed to rasterise.
struct SurvivingPages {
    page_nums: Vec<usize>,
}

#[async_trait]
impl PageNormalizer for SurvivingPages {
    async fn normalize(
        &self,
        _bytes: Vec<u8>,
        _kind: FileKind,
    ) -> Result<Vec<PageImage>, LoanScanError> {
        Ok(self
            .page_nums
            .iter()
            .map(|&page_num| PageImage {
                page_num,
                jpeg: vec![0xFF, 0xD8, 0xFF],
                width: 10,
                height: 10,
            })
            .collect())
    }
}

enum Script {
    Fields(ExtractedFields),
    Fail(&'static str),
    Hang,
}

/// Answers per page number; pages without a script fail.
#[derive(Default)]
struct ScriptedExtractor {
    pages: HashMap<usize, Script>,
    /// When set, every call waits for a notification before answering.
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExtractor {
    fn page(mut self, page_num: usize, script: Script) -> Self {
        self.pages.insert(page_num, script);
        self
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl FieldExtractor for ScriptedExtractor {
    async fn extract(&self, page: &PageImage) -> Result<ExtractedFields, LoanScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(ref gate) = self.gate {
            gate.notified().await;
        }
        let result = match self.pages.get(&page.page_num) {
            Some(Script::Fields(f)) => Ok(f.clone()),
            Some(Script::Fail(msg)) => Err(LoanScanError::ExtractionService {
                message: (*msg).to_string(),
            }),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ExtractedFields::default())
            }
            None => Err(LoanScanError::ExtractionService {
                message: "no script".into(),
            }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn fields(values: &[(LoanField, &str, u8)]) -> ExtractedFields {
    let mut f = ExtractedFields::default();
    for &(field, value, confidence) in values {
        f.set_value(field, Some(value.to_string()));
        f.confidence.insert(field, confidence);
    }
    f.rebuild_field_lists();
    f
}

fn stored_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.7\n").unwrap();
    path
}

fn new_doc(path: PathBuf) -> NewDocument {
    NewDocument {
        filename: path.file_name().unwrap().to_string_lossy().into_owned(),
        original_name: "contract.pdf".into(),
        file_type: FileKind::Pdf,
        mime_type: "application/pdf".into(),
        file_size: 9,
        file_path: path,
    }
}

fn pipeline_with(
    pages: usize,
    extractor: Arc<ScriptedExtractor>,
    config: PipelineConfig,
) -> Arc<Pipeline> {
    pipeline_over(Arc::new(FakeNormalizer { pages }), extractor, config)
}

fn pipeline_over(
    normalizer: Arc<dyn PageNormalizer>,
    extractor: Arc<ScriptedExtractor>,
    config: PipelineConfig,
) -> Arc<Pipeline> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    Arc::new(Pipeline::new(store, normalizer, extractor, config))
}

fn assert_send<T: Send>(_: T) {}

async fn finish(pipeline: &Pipeline, id: u64, handle: tokio::task::JoinHandle<()>) -> Document {
    handle.await.unwrap();
    pipeline.store().get(id).await.unwrap()
}

fn assert_consistent(doc: &Document) {
    assert_eq!(
        doc.extracted_data.is_some(),
        doc.status == DocumentStatus::Processed,
        "extracted data must be present exactly when processed: {doc:?}"
    );
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn late_page_success_after_failed_pages() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(
        ScriptedExtractor::default()
            .page(1, Script::Fail("HTTP 500"))
            .page(2, Script::Fail("rate limited"))
            .page(
                3,
                Script::Fields(fields(&[
                    (LoanField::Cif, "CIF-778", 92),
                    (LoanField::LoanAmount, "250,000,000", 80),
                ])),
            ),
    );
    let pipeline = pipeline_with(3, Arc::clone(&extractor), PipelineConfig::default());

    let (doc, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "a.pdf")))
        .await;
    assert_eq!(doc.status, DocumentStatus::Queued);

    let done = finish(&pipeline, doc.id, handle).await;
    assert_eq!(done.status, DocumentStatus::Processed);
    assert_consistent(&done);
    assert!(done.error_message.is_none());
    assert!(done.processed_at.is_some());
    assert!(done.processing_time.is_some());
    assert_eq!(done.confidence, Some(86));

    let data = done.extracted_data.unwrap();
    assert_eq!(data.value(LoanField::Cif), Some("CIF-778"));
    assert_eq!(data.fields_found, vec![LoanField::Cif, LoanField::LoanAmount]);
    assert_eq!(data.fields_not_found.len(), 4);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn only_last_page_rendered_still_processes() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(ScriptedExtractor::default().page(
        3,
        Script::Fields(fields(&[
            (LoanField::LoanAmount, "250,000,000", 80),
            (LoanField::Cif, "CIF-778", 92),
        ])),
    ));
    let pipeline = pipeline_over(
        Arc::new(SurvivingPages { page_nums: vec![3] }),
        Arc::clone(&extractor),
        PipelineConfig::default(),
    );

    let (doc, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "a3.pdf")))
        .await;
    let done = finish(&pipeline, doc.id, handle).await;

    assert_eq!(done.status, DocumentStatus::Processed);
    assert_consistent(&done);
    assert!(done.error_message.is_none());
    assert_eq!(done.confidence, Some(86));

    let data = done.extracted_data.unwrap();
    assert_eq!(data.fields_found, vec![LoanField::Cif, LoanField::LoanAmount]);
    assert_eq!(data.fields_not_found.len(), 4);
    assert!(!data.fields_not_found.contains(&LoanField::Cif));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn every_page_failing_marks_document_failed() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(
        ScriptedExtractor::default()
            .page(1, Script::Fail("bad gateway"))
            .page(2, Script::Fail("bad gateway")),
    );
    let pipeline = pipeline_with(2, extractor, PipelineConfig::default());

    let (doc, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "b.pdf")))
        .await;
    let done = finish(&pipeline, doc.id, handle).await;

    assert_eq!(done.status, DocumentStatus::Failed);
    assert_consistent(&done);
    let message = done.error_message.unwrap();
    assert!(
        message.contains("No data could be extracted"),
        "unexpected message: {message}"
    );
    assert!(message.contains("bad gateway"));
}

#[tokio::test]
async fn merge_prefers_higher_confidence_then_earlier_page() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(
        ScriptedExtractor::default()
            .page(
                1,
                Script::Fields(fields(&[
                    (LoanField::FullName, "NGUYEN VAN A", 70),
                    (LoanField::IdNumber, "001", 60),
                ])),
            )
            .page(
                2,
                Script::Fields(fields(&[
                    (LoanField::FullName, "Nguyen Van A", 95),
                    (LoanField::IdNumber, "002", 60),
                ])),
            ),
    );
    let pipeline = pipeline_with(2, extractor, PipelineConfig::default());

    let (doc, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "c.pdf")))
        .await;
    let data = finish(&pipeline, doc.id, handle)
        .await
        .extracted_data
        .unwrap();

    assert_eq!(data.value(LoanField::FullName), Some("Nguyen Van A"));
    assert_eq!(data.value(LoanField::IdNumber), Some("001"));
    assert_eq!(data.confidence_of(LoanField::FullName), 95);
}

#[tokio::test]
async fn stats_reflect_queued_then_processing() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let extractor = Arc::new(
        ScriptedExtractor::default()
            .page(1, Script::Fields(fields(&[(LoanField::Cif, "C1", 90)])))
            .gated(Arc::clone(&gate)),
    );
    let pipeline = pipeline_with(1, Arc::clone(&extractor), PipelineConfig::default());

    let doc = pipeline
        .store()
        .create(new_doc(stored_file(dir.path(), "d.pdf")))
        .await;
    let stats = pipeline.store().stats().await;
    assert_eq!((stats.total, stats.queued), (1, 1));

    let handle = pipeline.spawn(doc.id);
    while extractor.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stats = pipeline.store().stats().await;
    assert_eq!((stats.queued, stats.processing), (0, 1));
    assert_eq!(
        pipeline.store().get(doc.id).await.unwrap().status,
        DocumentStatus::Processing
    );

    gate.notify_one();
    let done = finish(&pipeline, doc.id, handle).await;
    assert_eq!(done.status, DocumentStatus::Processed);
    let stats = pipeline.store().stats().await;
    assert_eq!((stats.processing, stats.processed), (0, 1));
}

#[tokio::test]
async fn retry_resets_and_reprocesses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e.pdf");
    let extractor = Arc::new(
        ScriptedExtractor::default().page(1, Script::Fields(fields(&[(LoanField::Cif, "C9", 88)]))),
    );
    let pipeline = pipeline_with(1, extractor, PipelineConfig::default());

    // First attempt: the stored file is missing.
    let (doc, handle) = pipeline.enqueue(new_doc(path.clone())).await;
    let failed = finish(&pipeline, doc.id, handle).await;
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_consistent(&failed);
    assert!(failed.error_message.as_deref().unwrap().contains("e.pdf"));

    std::fs::write(&path, b"%PDF-1.7\n").unwrap();
    let (requeued, handle) = pipeline.retry(doc.id).await.unwrap();
    assert_eq!(requeued.status, DocumentStatus::Queued);
    assert!(requeued.error_message.is_none());
    assert!(requeued.extracted_data.is_none());

    let done = finish(&pipeline, doc.id, handle).await;
    assert_eq!(done.status, DocumentStatus::Processed);
    assert_consistent(&done);
    assert_eq!(done.confidence, Some(88));
}

#[tokio::test]
async fn retry_is_refused_unless_failed() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(
        ScriptedExtractor::default().page(1, Script::Fields(fields(&[(LoanField::Cif, "C", 50)]))),
    );
    let pipeline = pipeline_with(1, extractor, PipelineConfig::default());

    let (doc, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "f.pdf")))
        .await;
    finish(&pipeline, doc.id, handle).await;

    let err = pipeline.retry(doc.id).await.unwrap_err();
    assert!(matches!(err, LoanScanError::IllegalTransition { .. }));
    let err = pipeline.retry(4242).await.unwrap_err();
    assert!(matches!(err, LoanScanError::DocumentNotFound { id: 4242 }));
}

#[tokio::test]
async fn retry_all_failed_requeues_each_failed_document() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(
        ScriptedExtractor::default().page(1, Script::Fields(fields(&[(LoanField::Cif, "C", 77)]))),
    );
    let pipeline = pipeline_with(1, extractor, PipelineConfig::default());

    let mut ids = Vec::new();
    for name in ["g1.pdf", "g2.pdf"] {
        let (doc, handle) = pipeline.enqueue(new_doc(dir.path().join(name))).await;
        assert_eq!(
            finish(&pipeline, doc.id, handle).await.status,
            DocumentStatus::Failed
        );
        stored_file(dir.path(), name);
        ids.push(doc.id);
    }
    let (ok, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "g3.pdf")))
        .await;
    finish(&pipeline, ok.id, handle).await;

    let handles = pipeline.retry_all_failed().await;
    let mut retried: Vec<u64> = handles.iter().map(|(id, _)| *id).collect();
    retried.sort_unstable();
    assert_eq!(retried, ids);

    for (id, handle) in handles {
        let done = finish(&pipeline, id, handle).await;
        assert_eq!(done.status, DocumentStatus::Processed);
    }
    assert!(pipeline.retry_all_failed().await.is_empty());
}

#[tokio::test]
async fn normalizer_error_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(
        0,
        Arc::new(ScriptedExtractor::default()),
        PipelineConfig::default(),
    );

    let (doc, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "h.pdf")))
        .await;
    let done = finish(&pipeline, doc.id, handle).await;
    assert_eq!(done.status, DocumentStatus::Failed);
    assert!(done
        .error_message
        .as_deref()
        .unwrap()
        .contains("PDF has no pages"));
}

#[tokio::test]
async fn slow_page_times_out_and_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(
        ScriptedExtractor::default()
            .page(1, Script::Hang)
            .page(2, Script::Fields(fields(&[(LoanField::LoanNumber, "LN-1", 99)]))),
    );
    let config = PipelineConfig::builder().api_timeout_secs(1).build().unwrap();
    let pipeline = pipeline_with(2, extractor, config);

    let (doc, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "i.pdf")))
        .await;
    let done = finish(&pipeline, doc.id, handle).await;
    assert_eq!(done.status, DocumentStatus::Processed);
    assert_eq!(
        done.extracted_data.unwrap().value(LoanField::LoanNumber),
        Some("LN-1")
    );
}

#[tokio::test]
async fn document_concurrency_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(
        ScriptedExtractor::default().page(1, Script::Fields(fields(&[(LoanField::Cif, "C", 60)]))),
    );
    let config = PipelineConfig::builder()
        .max_concurrent_documents(2)
        .build()
        .unwrap();
    let pipeline = pipeline_with(1, Arc::clone(&extractor), config);

    let mut handles = Vec::new();
    for i in 0..6 {
        let (doc, handle) = pipeline
            .enqueue(new_doc(stored_file(dir.path(), &format!("j{i}.pdf"))))
            .await;
        handles.push((doc.id, handle));
    }
    for (id, handle) in handles {
        let done = finish(&pipeline, id, handle).await;
        assert_eq!(done.status, DocumentStatus::Processed);
        assert_consistent(&done);
    }
    assert!(extractor.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn run_on_unknown_id_is_a_no_op() {
    let pipeline = pipeline_with(
        1,
        Arc::new(ScriptedExtractor::default()),
        PipelineConfig::default(),
    );
    assert!(pipeline.run(77).await.is_none());
    assert_eq!(pipeline.store().stats().await.total, 0);
}

#[tokio::test]
async fn duplicate_run_does_not_touch_a_finished_record() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(
        ScriptedExtractor::default().page(1, Script::Fields(fields(&[(LoanField::Cif, "C", 40)]))),
    );
    let pipeline = pipeline_with(1, Arc::clone(&extractor), PipelineConfig::default());

    let (doc, handle) = pipeline
        .enqueue(new_doc(stored_file(dir.path(), "k.pdf")))
        .await;
    let done = finish(&pipeline, doc.id, handle).await;

    let again = pipeline.run(doc.id).await.unwrap();
    assert_eq!(again, done);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pipeline_futures_can_be_spawned() {
    let pipeline = pipeline_with(
        1,
        Arc::new(ScriptedExtractor::default()),
        PipelineConfig::default(),
    );
    assert_send(pipeline.run(1));
    assert_send(pipeline.retry(1));
    assert_send(pipeline.retry_all_failed());

    let spawned = Arc::clone(&pipeline);
    let outcome = tokio::spawn(async move { spawned.run(1).await })
        .await
        .unwrap();
    assert!(outcome.is_none());
}
