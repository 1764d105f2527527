//! PDF rasterisation: render every page to a JPEG via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! async workers keep serving other documents during CPU-heavy rendering.
//!
//! ## Scale, then cap
//!
//! Pages are scaled to the configured DPI, then clamped to
//! `max_width × max_height`. An A0 poster at 200 DPI would otherwise produce
//! a 6,600 × 9,300 px image.
//!
//! A page that fails to render or encode is dropped; the document only
//! fails here when no page survives.

use super::encode::encode_page;
use super::PageImage;
use crate::config::PipelineConfig;
use crate::error::{LoanScanError, PageError};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The subset of [`PipelineConfig`] the blocking renderer needs.
#[derive(Debug, Clone)]
struct RenderSettings {
    scale: f32,
    max_width: u32,
    max_height: u32,
    jpeg_quality: u8,
    pdfium_lib_path: Option<PathBuf>,
}

/// Rasterise every page of an in-memory PDF, page 1 first.
pub async fn render_pdf(
    bytes: Vec<u8>,
    config: &PipelineConfig,
) -> Result<Vec<PageImage>, LoanScanError> {
    let settings = RenderSettings {
        scale: config.render_scale(),
        max_width: config.max_width,
        max_height: config.max_height,
        jpeg_quality: config.jpeg_quality,
        pdfium_lib_path: config.pdfium_lib_path.clone(),
    };

    tokio::task::spawn_blocking(move || render_pdf_blocking(&bytes, &settings))
        .await
        .map_err(|e| LoanScanError::Internal(format!("Render task panicked: {}", e)))?
}

/// Bind to pdfium, preferring an explicitly configured library.
///
/// `lib_path` may name the library file itself or the directory holding it.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, LoanScanError> {
    let bindings = match lib_path {
        Some(path) => {
            let lib = if path.is_dir() {
                PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(path))
            } else {
                path.to_path_buf()
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(lib)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| LoanScanError::PdfiumBinding(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
fn render_pdf_blocking(
    bytes: &[u8],
    settings: &RenderSettings,
) -> Result<Vec<PageImage>, LoanScanError> {
    let pdfium = bind_pdfium(settings.pdfium_lib_path.as_deref())?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| LoanScanError::Conversion {
            detail: format!("could not open PDF: {:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(settings.scale)
        .set_maximum_width(settings.max_width as i32)
        .set_maximum_height(settings.max_height as i32);

    let rendered = pages.iter().enumerate().map(|(idx, page)| {
        let page_num = idx + 1;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| PageError::RenderFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );

        encode_page(page_num, &image, settings.jpeg_quality).map_err(|e| {
            PageError::RenderFailed {
                page: page_num,
                detail: format!("JPEG encoding failed: {}", e),
            }
        })
    });

    collect_pages(total_pages, rendered)
}

/// Keep the pages that rendered, in order; fail only if none did.
pub(crate) fn collect_pages(
    total_pages: usize,
    rendered: impl IntoIterator<Item = Result<PageImage, PageError>>,
) -> Result<Vec<PageImage>, LoanScanError> {
    let mut pages = Vec::with_capacity(total_pages);
    let mut first_error: Option<PageError> = None;

    for result in rendered {
        match result {
            Ok(page) => pages.push(page),
            Err(e) => {
                warn!("Dropping page: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    if pages.is_empty() {
        let detail = match first_error {
            Some(e) => format!("none of {} page(s) could be rasterised; {}", total_pages, e),
            None => "PDF has no pages".to_string(),
        };
        return Err(LoanScanError::Conversion { detail });
    }

    if pages.len() < total_pages {
        warn!(
            "Rasterised {}/{} pages; continuing with the rest",
            pages.len(),
            total_pages
        );
    }
    Ok(pages)
}
