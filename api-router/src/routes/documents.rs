use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Form, Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use common::storage::types::{
    analysis::AnalysisResult,
    chat_session::{ChatRole, ChatSession},
    document::{DocumentRecord, DocumentStatus},
};
use ingestion_pipeline::NewDocumentUpload;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "50000000")]
    pub file: FieldData<Bytes>,
    pub title: String,
    pub description: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub filename: String,
    pub file_size: u64,
    pub file_type: String,
    pub storage_path: String,
    pub owner_id: String,
    pub tags: Vec<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<DocumentRecord> for DocumentResponse {
    fn from(record: DocumentRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            description: record.description,
            filename: record.file_name,
            file_size: record.file_size,
            file_type: record.media_type,
            storage_path: record.storage_path,
            owner_id: record.owner_id,
            tags: record.tags,
            status: record.status.as_str().to_string(),
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentStatusResponse {
    pub document_id: String,
    pub status: String,
    pub description: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub document_id: String,
    pub summary: String,
    pub entities: Vec<String>,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub model_used: String,
    pub created_at: String,
}

impl From<AnalysisResult> for AnalysisResponse {
    fn from(result: AnalysisResult) -> Self {
        Self {
            document_id: result.document_id,
            summary: result.summary,
            entities: result.entities,
            risk_factors: result.risk_factors,
            recommendations: result.recommendations,
            model_used: result.model_used,
            created_at: result.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeParams {
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateParams {
    pub status_value: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageResponse {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub document_id: String,
    pub messages: Vec<ChatMessageResponse>,
    pub created_at: String,
}

impl ChatResponse {
    fn from_session(session: ChatSession) -> Self {
        Self {
            document_id: session.document_id,
            messages: session
                .messages
                .into_iter()
                .map(|message| ChatMessageResponse {
                    role: match message.role {
                        ChatRole::User => "user".to_string(),
                        ChatRole::Assistant => "assistant".to_string(),
                    },
                    content: message.content,
                    created_at: message.created_at.to_rfc3339(),
                })
                .collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Accepts `["a","b"]` as well as `a, b`; malformed JSON falls back to
/// comma splitting rather than rejecting the upload.
fn parse_tags(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(parsed) = serde_json::from_str::<Vec<String>>(trimmed) {
            return parsed;
        }
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub async fn create_document(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = input
        .file
        .metadata
        .file_name
        .clone()
        .ok_or_else(|| ApiError::ValidationError("File name missing in upload".into()))?;
    let media_type = input
        .file
        .metadata
        .content_type
        .clone()
        .unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first_or(mime::APPLICATION_OCTET_STREAM)
                .to_string()
        });
    let tags = parse_tags(input.tags.as_deref());

    info!(
        title = %input.title,
        file_name = %file_name,
        media_type = %media_type,
        "Upload document request"
    );

    let record = state
        .lifecycle
        .create_document(NewDocumentUpload {
            bytes: input.file.contents,
            file_name,
            media_type,
            title: input.title,
            description: input.description,
            tags,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(DocumentResponse::from(record))))
}

pub async fn list_documents(
    State(state): State<ApiState>,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let records = state.lifecycle.list_documents().await?;
    Ok(Json(records.into_iter().map(DocumentResponse::from).collect()))
}

pub async fn get_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let record = state.lifecycle.get_document(&document_id).await?;
    Ok(Json(DocumentResponse::from(record)))
}

pub async fn get_document_status(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentStatusResponse>, ApiError> {
    let (status, description, updated_at) = state.lifecycle.get_status(&document_id).await?;
    Ok(Json(DocumentStatusResponse {
        document_id,
        status: status.as_str().to_string(),
        description: description.to_string(),
        updated_at: updated_at.to_rfc3339(),
    }))
}

pub async fn update_document_status(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
    Query(params): Query<StatusUpdateParams>,
) -> Result<Json<DocumentStatusResponse>, ApiError> {
    let new_status: DocumentStatus = params.status_value.parse().map_err(ApiError::from)?;

    let record = state.lifecycle.get_document(&document_id).await?;

    // Delete states are reserved for the delete endpoint, in both
    // directions: unreachable as a target, immutable as a source.
    if matches!(
        record.status,
        DocumentStatus::Deleting | DocumentStatus::Deleted
    ) {
        return Err(ApiError::ValidationError(format!(
            "Cannot change status from '{}'",
            record.status
        )));
    }
    if matches!(
        new_status,
        DocumentStatus::Deleting | DocumentStatus::Deleted
    ) {
        return Err(ApiError::ValidationError(format!(
            "Cannot manually set status to '{new_status}' - use the delete endpoint instead"
        )));
    }

    let updated =
        DocumentRecord::force_set_status(&state.metadata_db, &document_id, new_status).await?;

    Ok(Json(DocumentStatusResponse {
        document_id,
        status: updated.status.as_str().to_string(),
        description: updated.status.description().to_string(),
        updated_at: updated.updated_at.to_rfc3339(),
    }))
}

pub async fn request_extraction(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.lifecycle.request_extraction(&document_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "document_id": document_id, "status": "scheduled" })),
    ))
}

pub async fn ingest_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chunks_indexed = state.pipeline.ingest_document(&document_id).await?;
    Ok(Json(json!({
        "document_id": document_id,
        "chunks_indexed": chunks_indexed
    })))
}

pub async fn analyze_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
    Form(params): Form<AnalyzeParams>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let model = params.model.unwrap_or_else(|| state.config.chat_model.clone());
    let result = state
        .lifecycle
        .analyze_document(&document_id, state.llm.as_ref(), &model)
        .await?;
    Ok(Json(AnalysisResponse::from(result)))
}

pub async fn get_document_analysis(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let result = state.lifecycle.get_analysis(&document_id).await?;
    Ok(Json(AnalysisResponse::from(result)))
}

pub async fn chat_with_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::ValidationError("Message must not be empty".into()));
    }

    let session = state
        .lifecycle
        .chat(&document_id, request.message, state.llm.as_ref())
        .await?;
    Ok(Json(ChatResponse::from_session(session)))
}

pub async fn delete_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.lifecycle.delete_document(&document_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_from_json_arrays() {
        assert_eq!(
            parse_tags(Some(r#"["legal", "nda"]"#)),
            vec!["legal".to_string(), "nda".to_string()]
        );
    }

    #[test]
    fn tags_parse_from_comma_separated_strings() {
        assert_eq!(
            parse_tags(Some("legal, nda , contract")),
            vec!["legal".to_string(), "nda".to_string(), "contract".to_string()]
        );
    }

    #[test]
    fn malformed_json_tags_fall_back_to_splitting() {
        assert_eq!(parse_tags(Some(r#"["unterminated"#)), vec![r#"["unterminated"#]);
        assert!(parse_tags(Some("")).is_empty());
        assert!(parse_tags(None).is_empty());
    }
}
