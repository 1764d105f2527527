//! Document records and their lifecycle.
//!
//! A [`Document`] is one uploaded file plus its processing state. The
//! lifecycle is a small closed graph:
//!
//! ```text
//! queued ──▶ processing ──▶ processed
//!   ▲            │
//!   └── failed ◀─┘
//! ```
//!
//! [`DocumentStatus::can_transition_to`] is the single source of truth for
//! that graph; the store rejects any update that leaves it.

use crate::fields::ExtractedFields;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Queued => "queued",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Processing, Processed) | (Processing, Failed) | (Failed, Queued)
        )
    }

    /// `processed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Processed | DocumentStatus::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(DocumentStatus::Queued),
            "processing" => Ok(DocumentStatus::Processing),
            "processed" => Ok(DocumentStatus::Processed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Kind of uploaded file, which decides how it is normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    /// Classify a MIME type. Only PDF, JPEG and PNG are accepted.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "application/pdf" => Some(FileKind::Pdf),
            "image/jpeg" | "image/jpg" | "image/png" => Some(FileKind::Image),
            _ => None,
        }
    }
}

/// One uploaded artifact and its processing lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: u64,
    /// Name of the file as stored on disk.
    pub filename: String,
    /// Name the file had when uploaded.
    pub original_name: String,
    pub file_type: FileKind,
    pub mime_type: String,
    pub file_size: u64,
    pub file_path: PathBuf,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub extracted_data: Option<ExtractedFields>,
    pub error_message: Option<String>,
    /// Wall-clock milliseconds of the last successful run.
    pub processing_time: Option<u64>,
    /// Average field confidence (0–100) of the last successful run.
    pub confidence: Option<u8>,
}

/// The immutable fields supplied when a document is enqueued.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub original_name: String,
    pub file_type: FileKind,
    pub mime_type: String,
    pub file_size: u64,
    pub file_path: PathBuf,
}

/// A partial update. `None` leaves a field untouched; for nullable fields
/// `Some(None)` clears them.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub status: Option<DocumentStatus>,
    pub extracted_data: Option<Option<ExtractedFields>>,
    pub error_message: Option<Option<String>>,
    pub processing_time: Option<u64>,
    pub confidence: Option<u8>,
}

impl DocumentUpdate {
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Terminal success with the merged result.
    pub fn processed(data: ExtractedFields, processing_time: u64, confidence: u8) -> Self {
        Self {
            status: Some(DocumentStatus::Processed),
            extracted_data: Some(Some(data)),
            error_message: Some(None),
            processing_time: Some(processing_time),
            confidence: Some(confidence),
        }
    }

    /// Terminal failure; every other field is left as it was.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(DocumentStatus::Failed),
            error_message: Some(Some(message.into())),
            ..Default::default()
        }
    }

    /// Reset a failed document for another attempt.
    pub fn requeue() -> Self {
        Self {
            status: Some(DocumentStatus::Queued),
            error_message: Some(None),
            ..Default::default()
        }
    }
}

/// Document counts by current status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Listing filter. Both criteria are optional and combined with AND.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub status: Option<DocumentStatus>,
    /// Calendar day of `uploaded_at`, evaluated in the store's reference
    /// timezone.
    pub upload_date: Option<NaiveDate>,
}

impl DocumentFilter {
    /// Build a filter from raw query values. `"all"` or an empty status
    /// means no status filter; dates are `YYYY-MM-DD`.
    pub fn parse(status: Option<&str>, upload_date: Option<&str>) -> Result<Self, String> {
        let status = match status.map(str::trim) {
            None | Some("") => None,
            Some(s) if s.eq_ignore_ascii_case("all") => None,
            Some(s) => Some(s.parse::<DocumentStatus>()?),
        };
        let upload_date = match upload_date.map(str::trim) {
            None | Some("") => None,
            Some(d) => Some(
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| format!("invalid uploadDate '{d}': {e}"))?,
            ),
        };
        Ok(Self {
            status,
            upload_date,
        })
    }

    pub fn matches(&self, doc: &Document, tz: &FixedOffset) -> bool {
        if let Some(status) = self.status {
            if doc.status != status {
                return false;
            }
        }
        if let Some(day) = self.upload_date {
            if doc.uploaded_at.with_timezone(tz).date_naive() != day {
                return false;
            }
        }
        true
    }
}
