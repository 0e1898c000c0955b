//! Upload and document-collection endpoints.

use super::AppState;
use crate::auth::models::Claims;
use crate::models::{DocumentRecord, DocumentStatus};
use crate::pdf::engine;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {e}"))
}

/// POST /api/upload: create a new upload group from one or more PDFs.
pub async fn upload_documents(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let upload_group_id = Uuid::new_v4().to_string();
    let mut documents: Vec<DocumentRecord> = Vec::new();

    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(internal)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Malformed multipart body: {e}")))?
    {
        let Some(original_filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !original_filename.to_lowercase().ends_with(".pdf") {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("Only PDF files are supported. Got: {original_filename}"),
            ));
        }

        let content = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Upload read failed: {e}")))?;
        let file_size = content.len() as u64;

        if file_size > state.config.max_file_size_mb * 1024 * 1024 {
            return Err((
                StatusCode::BAD_REQUEST,
                format!(
                    "File {original_filename} exceeds {}MB limit",
                    state.config.max_file_size_mb
                ),
            ));
        }

        let file_id = Uuid::new_v4().to_string();
        let safe_filename = format!("{file_id}.pdf");
        let file_path = format!("{}/{safe_filename}", state.config.upload_dir);
        tokio::fs::write(&file_path, &content).await.map_err(internal)?;

        let page_count = match engine::load_page_count(file_path.clone()).await {
            Ok(count) => Some(count as i64),
            Err(e) => {
                warn!("Could not read page count for {original_filename}: {e:#}");
                None
            }
        };

        documents.push(DocumentRecord {
            id: file_id,
            user_id: Some(claims.sub.clone()),
            filename: safe_filename,
            original_filename,
            file_path,
            file_size: Some(file_size as i64),
            page_count,
            status: DocumentStatus::Uploaded,
            upload_group_id: upload_group_id.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
    }

    if documents.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No PDF files in upload".to_string()));
    }

    state.store.insert_documents(&documents).await.map_err(internal)?;
    info!("Uploaded {} document(s) in group {upload_group_id}", documents.len());

    Ok(Json(json!({
        "upload_group_id": upload_group_id,
        "documents": documents,
        "message": format!("Successfully uploaded {} document(s)", documents.len()),
    })))
}

/// GET /api/documents: the current user's documents.
pub async fn list_documents(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<DocumentRecord>>, ApiError> {
    let docs = state.store.list_documents(&claims.sub).await.map_err(internal)?;
    Ok(Json(docs))
}

/// GET /api/documents/{id}
pub async fn get_document(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentRecord>, ApiError> {
    let doc = state
        .store
        .get_document(&document_id)
        .await
        .map_err(internal)?
        .filter(|d| d.user_id.as_deref() == Some(claims.sub.as_str()))
        .ok_or((StatusCode::NOT_FOUND, "Document not found".to_string()))?;
    Ok(Json(doc))
}

/// DELETE /api/documents/{id}: removes the document and all derived data.
pub async fn delete_document(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let doc = state
        .store
        .get_document(&document_id)
        .await
        .map_err(internal)?
        .filter(|d| d.user_id.as_deref() == Some(claims.sub.as_str()))
        .ok_or((StatusCode::NOT_FOUND, "Document not found".to_string()))?;

    state.store.delete_document(&document_id).await.map_err(internal)?;
    if let Err(e) = tokio::fs::remove_file(&doc.file_path).await {
        warn!("Could not remove file {}: {e}", doc.file_path);
    }

    Ok(Json(json!({"message": "Document deleted", "document_id": document_id})))
}

/// GET /api/groups: the current user's upload groups.
pub async fn list_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    let groups = state.store.list_groups(&claims.sub).await.map_err(internal)?;
    let payload: Vec<Value> = groups
        .into_iter()
        .map(|(id, created_at, count)| {
            json!({"upload_group_id": id, "created_at": created_at, "document_count": count})
        })
        .collect();
    Ok(Json(json!({"groups": payload})))
}
