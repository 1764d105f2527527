//! # loanscan
//!
//! Extract structured loan fields from scanned contracts and ID documents
//! using Vision Language Models (VLMs).
//!
//! Uploaded PDFs and images are rasterised into JPEG pages, each page is sent
//! to a VLM with a fixed six-field JSON contract, and the per-page answers
//! are merged field by field on confidence. Each upload is tracked as a
//! [`Document`] record moving through `queued → processing → processed |
//! failed`, with `failed → queued` for retries.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (PDF / JPEG / PNG)
//!  │
//!  ├─ 1. Store      create a `queued` record, schedule a run
//!  ├─ 2. Normalise  rasterise PDF pages via pdfium, or re-encode the image
//!  ├─ 3. Encode     JPEG → base64 ImageData
//!  ├─ 4. VLM        one call per page, timeout per call
//!  ├─ 5. Merge      highest confidence wins per field, earlier page on ties
//!  └─ 6. Persist    `processed` with data + confidence, or `failed` + message
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loanscan::{DocumentStore, MemoryDocumentStore, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from EDGEQUAKE_LLM_PROVIDER / OPENAI_API_KEY / …
//!     let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
//!     let pipeline = Arc::new(Pipeline::from_config(store, PipelineConfig::default())?);
//!
//!     let new = loanscan::NewDocument {
//!         filename: "contract.pdf".into(),
//!         original_name: "contract.pdf".into(),
//!         file_type: loanscan::FileKind::Pdf,
//!         mime_type: "application/pdf".into(),
//!         file_size: std::fs::metadata("contract.pdf")?.len(),
//!         file_path: "contract.pdf".into(),
//!     };
//!     let (doc, handle) = pipeline.enqueue(new).await;
//!     handle.await?;
//!
//!     let done = pipeline.store().get(doc.id).await.unwrap();
//!     println!("{}", serde_json::to_string_pretty(&done)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `loanscan` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding the library:
//! ```toml
//! loanscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod fields;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, ServerConfig};
pub use document::{
    Document, DocumentFilter, DocumentStats, DocumentStatus, DocumentUpdate, FileKind,
    NewDocument,
};
pub use error::{LoanScanError, PageError};
pub use fields::{ExtractedFields, LoanField};
pub use orchestrator::Pipeline;
pub use pipeline::llm::{FieldExtractor, VisionExtractor};
pub use pipeline::merge::{merge_pages, MergedFields};
pub use pipeline::normalize::{PageNormalizer, RasterNormalizer};
pub use pipeline::PageImage;
pub use store::{DocumentStore, MemoryDocumentStore};
