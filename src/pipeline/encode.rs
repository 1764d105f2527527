//! Image encoding: `DynamicImage` → JPEG bytes → base64 `ImageData`.
//!
//! Every page, whether it came from a PDF or an uploaded photo, is
//! re-encoded as JPEG at a fixed quality so the VLM always sees the same
//! format. Quality 90 keeps small digits legible while a full page stays
//! well under typical API upload limits.

use super::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Encode `img` as a JPEG at `quality` (1–100).
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    debug!(
        "Encoded {}x{} image → {} bytes JPEG (q={})",
        img.width(),
        img.height(),
        buf.len(),
        quality
    );
    Ok(buf)
}

/// Encode `img` as page `page_num`.
pub fn encode_page(
    page_num: usize,
    img: &DynamicImage,
    quality: u8,
) -> Result<PageImage, image::ImageError> {
    Ok(PageImage {
        page_num,
        jpeg: encode_jpeg(img, quality)?,
        width: img.width(),
        height: img.height(),
    })
}

/// Wrap a page as a base64 attachment for the VLM request.
///
/// `detail: "high"` makes GPT-4-class models use the full tile budget;
/// without it small printed numbers are lost.
pub fn to_image_data(page: &PageImage) -> ImageData {
    ImageData::new(STANDARD.encode(&page.jpeg), "image/jpeg").with_detail("high")
}
