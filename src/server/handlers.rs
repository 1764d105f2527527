//! HTTP request handlers for the JSON API.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::document::{DocumentFilter, FileKind, NewDocument};
use crate::error::LoanScanError;

/// JSON error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Document not found")
    }
}

impl From<LoanScanError> for ApiError {
    fn from(e: LoanScanError) -> Self {
        let status = match &e {
            LoanScanError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            LoanScanError::IllegalTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    status: Option<String>,
    #[serde(rename = "uploadDate")]
    upload_date: Option<String>,
}

/// `GET /api/documents`
pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = DocumentFilter::parse(params.status.as_deref(), params.upload_date.as_deref())
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(state.store.list(&filter).await))
}

/// `GET /api/documents/:id`
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let doc = state.store.get(id).await.ok_or_else(ApiError::not_found)?;
    Ok(Json(doc))
}

/// `DELETE /api/documents/:id`. The stored file is removed best-effort.
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let doc = state.store.get(id).await.ok_or_else(ApiError::not_found)?;
    if !state.store.delete(id).await {
        return Err(ApiError::not_found());
    }
    if let Err(e) = tokio::fs::remove_file(&doc.file_path).await {
        tracing::warn!(
            "Document {}: could not remove {}: {}",
            id,
            doc.file_path.display(),
            e
        );
    }
    tracing::info!("Document {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/documents/:id/retry`
pub async fn retry_document(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let (doc, _) = state.pipeline.retry(id).await?;
    Ok((StatusCode::ACCEPTED, Json(doc)))
}

/// `POST /api/documents/retry-failed`
pub async fn retry_failed_documents(State(state): State<AppState>) -> impl IntoResponse {
    let retried = state.pipeline.retry_all_failed().await.len();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "retried": retried })),
    )
}

/// `GET /api/stats`
pub async fn document_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.stats().await)
}

/// `POST /api/documents`: accept one multipart `file` field, store it under
/// a fresh name and enqueue it.
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field
            .content_type()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| m != "application/octet-stream")
            .or_else(|| mime_from_name(&original_name).map(str::to_string))
            .unwrap_or_default();

        let file_type = FileKind::from_mime(&mime_type).ok_or_else(|| {
            ApiError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!(
                    "Unsupported file type '{}'; expected PDF, JPEG or PNG",
                    mime_type
                ),
            )
        })?;

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        if data.is_empty() {
            return Err(ApiError::new(StatusCode::BAD_REQUEST, "Uploaded file is empty"));
        }
        if data.len() > state.config.max_upload_bytes {
            return Err(ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "File exceeds the {} byte upload limit",
                    state.config.max_upload_bytes
                ),
            ));
        }

        let filename = format!("{}.{}", Uuid::new_v4(), extension_for(&mime_type));
        let file_path = state.config.upload_dir.join(&filename);
        let stored = async {
            tokio::fs::create_dir_all(&state.config.upload_dir).await?;
            tokio::fs::write(&file_path, &data).await
        }
        .await;
        stored.map_err(|e| {
            tracing::error!("Failed to store upload {}: {}", file_path.display(), e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload")
        })?;

        let (doc, _) = state
            .pipeline
            .enqueue(NewDocument {
                filename,
                original_name,
                file_type,
                mime_type,
                file_size: data.len() as u64,
                file_path,
            })
            .await;
        return Ok((StatusCode::CREATED, Json(doc)));
    }

    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        "Missing multipart field 'file'",
    ))
}

fn mime_from_name(name: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(name).extension()?.to_str()?;
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "image/png" => "png",
        _ => "jpg",
    }
}
