//! Pipeline stages for turning one uploaded file into extracted loan fields.
//!
//! Each submodule implements exactly one transformation step so each is
//! independently testable and the orchestrator can swap implementations
//! (e.g. stub the VLM in tests) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ llm ──▶ merge
//! (bytes)   (render +     (VLM)   (per-field best
//!            encode)               confidence)
//! ```
//!
//! 1. [`input`]      read the stored file and check its magic bytes
//! 2. [`render`]     rasterise PDF pages via pdfium; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]     JPEG-encode page images; base64-wrap them for the API
//! 4. [`normalize`]  the [`normalize::PageNormalizer`] seam combining 2 and 3
//! 5. [`llm`]        the [`llm::FieldExtractor`] seam and the VLM call; the
//!    only stage with network I/O
//! 6. [`merge`]      fold per-page results into one record

pub mod encode;
pub mod input;
pub mod llm;
pub mod merge;
pub mod normalize;
pub mod render;

/// One normalised page: a JPEG image ready for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed page number within the source document.
    pub page_num: usize,
    /// JPEG bytes.
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}
