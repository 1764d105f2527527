//! Merge: fold per-page extraction results into one record.
//!
//! Each field is resolved independently. Walking pages in order, a page's
//! value is adopted when it is non-empty and either nothing has been adopted
//! yet or its confidence is strictly greater than the current one. Equal
//! confidence keeps the earlier page, which makes the result deterministic
//! for a given page order.

use crate::error::LoanScanError;
use crate::fields::{ExtractedFields, LoanField};

/// A merged result and its average confidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedFields {
    pub fields: ExtractedFields,
    /// Rounded mean of the final per-field confidences; 0 if none found.
    pub average_confidence: u8,
}

/// Merge `pages` (in page order) into one [`ExtractedFields`].
///
/// # Errors
/// [`LoanScanError::NoDataExtracted`] if `pages` is empty.
pub fn merge_pages(pages: &[ExtractedFields]) -> Result<MergedFields, LoanScanError> {
    if pages.is_empty() {
        return Err(LoanScanError::NoDataExtracted {
            pages: 0,
            first_error: None,
        });
    }

    let mut merged = ExtractedFields::default();

    for field in LoanField::ALL {
        let mut best: Option<(&str, u8)> = None;
        for page in pages {
            let Some(value) = page.value(field) else {
                continue;
            };
            let confidence = page.confidence_of(field);
            match best {
                Some((_, current)) if confidence <= current => {}
                _ => best = Some((value, confidence)),
            }
        }
        if let Some((value, confidence)) = best {
            merged.set_value(field, Some(value.to_string()));
            merged.confidence.insert(field, confidence);
        }
    }

    merged.rebuild_field_lists();
    let average_confidence = merged.average_confidence();

    Ok(MergedFields {
        fields: merged,
        average_confidence,
    })
}
