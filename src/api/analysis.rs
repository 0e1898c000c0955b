//! Analysis trigger / status / results endpoints.

use super::AppState;
use crate::models::{AgentStatus, AgentType, DocumentStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {e}"))
}

/// POST /api/analyze/{document_id}: enqueue the per-document pipeline.
pub async fn analyze_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let doc = state
        .store
        .get_document(&document_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Document not found".to_string()))?;

    if doc.status == DocumentStatus::Processing {
        return Err((StatusCode::CONFLICT, "Document is already being analyzed".to_string()));
    }

    state
        .store
        .set_document_status(&document_id, DocumentStatus::Processing)
        .await
        .map_err(internal)?;
    state
        .store
        .seed_agent_results(&document_id, &doc.upload_group_id)
        .await
        .map_err(internal)?;

    let orchestrator = state.orchestrator.clone();
    let id = document_id.clone();
    tokio::spawn(async move {
        orchestrator.process_document(&id).await;
    });

    Ok(Json(json!({"message": "Analysis started", "document_id": document_id})))
}

/// POST /api/analyze/group/{group_id}: enqueue every document in the group.
pub async fn analyze_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let docs = state.store.group_documents(&group_id).await.map_err(internal)?;
    if docs.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            "No documents found for this upload group".to_string(),
        ));
    }

    for doc in &docs {
        state
            .store
            .set_document_status(&doc.id, DocumentStatus::Processing)
            .await
            .map_err(internal)?;
        state
            .store
            .seed_agent_results(&doc.id, &group_id)
            .await
            .map_err(internal)?;
    }

    for doc in &docs {
        let orchestrator = state.orchestrator.clone();
        let id = doc.id.clone();
        tokio::spawn(async move {
            orchestrator.process_document(&id).await;
        });
    }

    info!("Analysis started for {} document(s) in group {group_id}", docs.len());
    Ok(Json(json!({
        "message": format!("Analysis started for {} document(s)", docs.len()),
        "upload_group_id": group_id,
        "document_ids": docs.iter().map(|d| d.id.clone()).collect::<Vec<_>>(),
    })))
}

/// GET /api/status/group/{group_id}: polled by the frontend.
pub async fn get_group_status(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let docs = state.store.group_documents(&group_id).await.map_err(internal)?;
    if docs.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            "No documents found for this upload group".to_string(),
        ));
    }

    let total = docs.len();
    let completed = docs.iter().filter(|d| d.status == DocumentStatus::Completed).count();
    let failed = docs.iter().filter(|d| d.status == DocumentStatus::Failed).count();
    let processing = docs.iter().filter(|d| d.status == DocumentStatus::Processing).count();

    let group_results = state.store.group_agent_results(&group_id).await.map_err(internal)?;
    let group_agents: Map<String, Value> = group_results
        .iter()
        .map(|r| (r.agent_type.as_str().to_string(), json!(r.status.as_str())))
        .collect();

    let overall = if docs.iter().all(|d| d.status == DocumentStatus::Completed) {
        if total > 1 && !group_results.is_empty() {
            let all_group_done = group_results
                .iter()
                .all(|r| matches!(r.status, AgentStatus::Completed | AgentStatus::Failed));
            if all_group_done {
                "completed"
            } else {
                "group_processing"
            }
        } else {
            "completed"
        }
    } else if failed == total {
        "failed"
    } else if processing > 0 || completed < total {
        "processing"
    } else {
        "uploaded"
    };

    Ok(Json(json!({
        "upload_group_id": group_id,
        "overall_status": overall,
        "total_documents": total,
        "completed": completed,
        "processing": processing,
        "failed": failed,
        "documents": docs
            .iter()
            .map(|d| json!({"id": d.id, "filename": d.original_filename, "status": d.status}))
            .collect::<Vec<_>>(),
        "group_agents": Value::Object(group_agents),
    })))
}

/// GET /api/results/{document_id}: document plus every agent result.
pub async fn get_results(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let doc = state
        .store
        .get_document(&document_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Document not found".to_string()))?;

    let results = state
        .store
        .agent_results_for_document(&document_id)
        .await
        .map_err(internal)?;

    let agents: Map<String, Value> = results
        .into_iter()
        .map(|r| (r.agent_type.as_str().to_string(), json!(r)))
        .collect();

    Ok(Json(json!({"document": doc, "agents": Value::Object(agents)})))
}

/// GET /api/results/{document_id}/{agent_type}
pub async fn get_agent_result(
    State(state): State<AppState>,
    Path((document_id, agent_type)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let agent = AgentType::from_str(&agent_type)
        .ok_or((StatusCode::BAD_REQUEST, format!("Unknown agent type: {agent_type}")))?;
    let result = state
        .store
        .agent_result(&document_id, agent)
        .await
        .map_err(internal)?
        .ok_or((
            StatusCode::NOT_FOUND,
            format!("No {agent_type} result found for this document"),
        ))?;
    Ok(Json(json!(result)))
}

/// GET /api/results/group/{group_id}
pub async fn get_group_results(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let docs = state.store.group_documents(&group_id).await.map_err(internal)?;
    if docs.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            "No documents found for this upload group".to_string(),
        ));
    }

    let mut per_doc = Vec::new();
    for doc in &docs {
        let results = state
            .store
            .agent_results_for_document(&doc.id)
            .await
            .map_err(internal)?;
        let agents: Map<String, Value> = results
            .into_iter()
            .map(|r| (r.agent_type.as_str().to_string(), json!(r)))
            .collect();
        per_doc.push(json!({"document": doc, "agents": Value::Object(agents)}));
    }

    let group_results = state.store.group_agent_results(&group_id).await.map_err(internal)?;
    let group_agents: Map<String, Value> = group_results
        .into_iter()
        .map(|r| (r.agent_type.as_str().to_string(), json!(r)))
        .collect();

    let aggregated = state.store.aggregated_metrics(&group_id).await.map_err(internal)?;

    Ok(Json(json!({
        "upload_group_id": group_id,
        "documents": per_doc,
        "group_agents": Value::Object(group_agents),
        "aggregated_metrics": aggregated,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub transaction_type: Option<String>,
    pub category: Option<String>,
}

/// GET /api/transactions/{document_id}: paginated raw transactions.
pub async fn get_transactions(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(params): Query<TransactionQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 5000);
    let offset = params.offset.unwrap_or(0).max(0);

    let (total, transactions) = state
        .store
        .transactions_for_document(
            &document_id,
            params.transaction_type.as_deref(),
            params.category.as_deref(),
            limit,
            offset,
        )
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "total": total,
        "limit": limit,
        "offset": offset,
        "transactions": transactions,
    })))
}

/// GET /api/metrics/{document_id}
pub async fn get_metrics(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let metrics = state
        .store
        .statement_metrics(&document_id)
        .await
        .map_err(internal)?
        .ok_or((
            StatusCode::NOT_FOUND,
            "Metrics not found — run extraction first".to_string(),
        ))?;
    Ok(Json(json!(metrics)))
}

/// GET /api/metrics/group/{group_id}
pub async fn get_group_metrics(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let aggregated = state.store.aggregated_metrics(&group_id).await.map_err(internal)?;
    let per_statement = state
        .store
        .statement_metrics_for_group(&group_id)
        .await
        .map_err(internal)?;
    Ok(Json(json!({"aggregated": aggregated, "per_statement": per_statement})))
}
