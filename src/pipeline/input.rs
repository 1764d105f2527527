//! Input: read a stored upload and sanity-check its contents.
//!
//! The upload handler trusts the client's declared MIME type, so the magic
//! bytes are checked here before pdfium sees the data. A mislabelled file
//! then fails with a readable message rather than a pdfium error code.

use crate::document::FileKind;
use crate::error::LoanScanError;
use std::path::Path;
use tracing::debug;

/// Read the stored file at `path`.
pub async fn read_file(path: &Path) -> Result<Vec<u8>, LoanScanError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| LoanScanError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Whether `bytes` starts with the `%PDF` header.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

/// Guess the kind of a file from its first bytes.
///
/// Used by the CLI, which has no declared MIME type to go on.
pub fn sniff_kind(bytes: &[u8]) -> Option<(FileKind, &'static str)> {
    if is_pdf(bytes) {
        return Some((FileKind::Pdf, "application/pdf"));
    }
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some((FileKind::Image, "image/png")),
        image::ImageFormat::Jpeg => Some((FileKind::Image, "image/jpeg")),
        _ => None,
    }
}
