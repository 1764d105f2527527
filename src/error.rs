//! Error types for the loanscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LoanScanError`], **document level**: the document cannot be processed
//!   in this attempt (unreadable file, PDF produced no pages, every page
//!   failed extraction). The orchestrator catches these and persists them as
//!   a `failed` status with the error's display text as the message.
//!
//! * [`PageError`], **page level**: a single page failed (render glitch,
//!   transient API error, timeout) but the other pages are fine. The
//!   orchestrator logs and skips it; the document only fails when no page
//!   produced a result.

use crate::document::DocumentStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Document-level errors returned by the loanscan library.
#[derive(Debug, Error)]
pub enum LoanScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The stored source file could not be read.
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Normalisation errors ──────────────────────────────────────────────
    /// The PDF could not be opened or produced zero usable pages.
    #[error("PDF conversion failed: {detail}")]
    Conversion { detail: String },

    /// An image could not be decoded or re-encoded.
    #[error("Image encoding failed: {detail}")]
    Encoding { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBinding(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The external extraction call itself failed (network, auth, model).
    #[error("Extraction service error: {message}")]
    ExtractionService { message: String },

    /// No page yielded an extraction result.
    #[error("No data could be extracted from {pages} page(s){}", .first_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    NoDataExtracted {
        pages: usize,
        first_error: Option<String>,
    },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// The record vanished between enqueue and processing.
    #[error("Document {id} not found")]
    DocumentNotFound { id: u64 },

    /// A status change outside the lifecycle graph was requested.
    #[error("Illegal status transition for document {id}: {from} -> {to}")]
    IllegalTransition {
        id: u64,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    /// A partial update tried to attach extracted data to a record that is
    /// not `processed`.
    #[error("Document {id} cannot hold extracted data while {status}")]
    ExtractedDataWithoutSuccess { id: u64, status: DocumentStatus },

    /// A partial update tried to set an error message on a record that is
    /// not `failed`.
    #[error("Document {id} cannot hold an error message while {status}")]
    ErrorMessageWithoutFailure { id: u64, status: DocumentStatus },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// Page rasterisation or re-encoding failed; the page is dropped.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The extraction call failed for this page.
    #[error("Page {page}: extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    /// The extraction call did not finish within the configured timeout.
    #[error("Page {page}: extraction timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}
