//! Normalisation: turn an uploaded file into ordered JPEG pages.
//!
//! | Kind    | Output                                              |
//! |---------|-----------------------------------------------------|
//! | `pdf`   | one page per rasterised PDF page, failures dropped  |
//! | `image` | exactly one page, re-encoded                        |
//!
//! The orchestrator depends on the [`PageNormalizer`] trait rather than on
//! pdfium directly, so tests can feed synthetic pages.

use super::encode::encode_page;
use super::input::is_pdf;
use super::render::render_pdf;
use super::PageImage;
use crate::config::PipelineConfig;
use crate::document::FileKind;
use crate::error::LoanScanError;
use async_trait::async_trait;
use tracing::debug;

/// Converts raw file bytes into page images.
#[async_trait]
pub trait PageNormalizer: Send + Sync {
    /// Produce the ordered pages of a file, page 1 first.
    ///
    /// Errors are document level: [`LoanScanError::Conversion`] when a PDF
    /// yields no pages, [`LoanScanError::Encoding`] when an image cannot be
    /// re-encoded.
    async fn normalize(
        &self,
        bytes: Vec<u8>,
        kind: FileKind,
    ) -> Result<Vec<PageImage>, LoanScanError>;
}

/// pdfium + `image` backed normaliser.
#[derive(Debug, Clone)]
pub struct RasterNormalizer {
    config: PipelineConfig,
}

impl RasterNormalizer {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageNormalizer for RasterNormalizer {
    async fn normalize(
        &self,
        bytes: Vec<u8>,
        kind: FileKind,
    ) -> Result<Vec<PageImage>, LoanScanError> {
        match kind {
            FileKind::Pdf => {
                if !is_pdf(&bytes) {
                    return Err(LoanScanError::Conversion {
                        detail: "file does not start with a %PDF header".into(),
                    });
                }
                render_pdf(bytes, &self.config).await
            }
            FileKind::Image => {
                let quality = self.config.jpeg_quality;
                let page = tokio::task::spawn_blocking(move || reencode_image(&bytes, quality))
                    .await
                    .map_err(|e| {
                        LoanScanError::Internal(format!("Encode task panicked: {}", e))
                    })??;
                Ok(vec![page])
            }
        }
    }
}

/// Decode an uploaded image and re-encode it as a single JPEG page.
pub fn reencode_image(bytes: &[u8], quality: u8) -> Result<PageImage, LoanScanError> {
    let img = image::load_from_memory(bytes).map_err(|e| LoanScanError::Encoding {
        detail: format!("could not decode image: {}", e),
    })?;
    debug!("Decoded image {}x{}", img.width(), img.height());

    encode_page(1, &img, quality).map_err(|e| LoanScanError::Encoding {
        detail: format!("could not encode JPEG: {}", e),
    })
}
