//! Memory management routes.
//!
//! Provides REST API endpoints over the memory engine:
//! - GET/POST /memories - List and store short-term memories
//! - GET /memories/search - Local search topped up from long-term memory
//! - GET/DELETE /memories/{id} - Fetch or forget a memory
//! - POST /users/{user_id}/flush - Upload a user's pending memories now
//! - GET /stats - Store, shuttle and remote statistics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use memshuttle_core::{Metadata, Record, RecordState, RemoteRecord, UploadStatus};
use memshuttle_sdk::{EngineStats, SDKError, UploadReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

/// App id recorded for memories stored without one
const DEFAULT_APP_ID: &str = "api";

/// Create memory router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/memories", get(list_memories).post(store_memory))
        .route("/memories/search", get(search_memories))
        .route("/memories/{id}", get(get_memory).delete(delete_memory))
        .route("/users/{user_id}/flush", post(flush_user))
        .route("/stats", get(get_stats))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListMemoriesQuery {
    pub user_id: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchMemoriesQuery {
    pub user_id: String,
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMemoryRequest {
    pub content: String,
    #[serde(alias = "user_id")]
    pub user_id: String,
    #[serde(alias = "app_id")]
    pub app_id: Option<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryResponse {
    pub id: String,
    pub content: String,
    pub user_id: String,
    pub app_id: String,
    pub metadata: Metadata,
    pub access_count: u32,
    pub upload_status: UploadStatus,
    pub state: RecordState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl From<Record> for MemoryResponse {
    fn from(record: Record) -> Self {
        Self {
            remote_id: record.remote_id().map(str::to_string),
            id: record.id,
            content: record.content,
            user_id: record.user_id,
            app_id: record.app_id,
            metadata: record.metadata,
            access_count: record.access_count,
            upload_status: record.upload_status,
            state: record.state,
            created_at: record.created_at,
            last_accessed_at: record.last_accessed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMemoryResponse {
    /// False when the classifier declined the content
    pub stored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMemoriesResponse {
    pub memories: Vec<MemoryResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalHitResponse {
    pub memory: MemoryResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub local: Vec<LocalHitResponse>,
    pub remote: Vec<RemoteRecord>,
}

fn error_response(err: SDKError) -> (StatusCode, String) {
    let status = match &err {
        SDKError::InvalidOperation { .. } | SDKError::Config(_) => StatusCode::BAD_REQUEST,
        _ if err.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// List a user's active memories, newest first
pub async fn list_memories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListMemoriesQuery>,
) -> Result<Json<ListMemoriesResponse>, (StatusCode, String)> {
    let memories = state
        .engine
        .list(&query.user_id, query.limit.unwrap_or(50))
        .map_err(error_response)?;

    let memories: Vec<MemoryResponse> = memories.into_iter().map(Into::into).collect();
    let total = memories.len();
    Ok(Json(ListMemoriesResponse { memories, total }))
}

/// Store a memory and queue it for upload
pub async fn store_memory(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StoreMemoryRequest>,
) -> Result<(StatusCode, Json<StoreMemoryResponse>), (StatusCode, String)> {
    let app_id = req.app_id.as_deref().unwrap_or(DEFAULT_APP_ID);
    let stored = state
        .engine
        .remember(&req.content, &req.user_id, app_id, req.metadata.unwrap_or_default())
        .map_err(error_response)?;

    match stored {
        Some(record) => {
            info!(record_id = %record.id, user_id = %record.user_id, "Stored memory");
            Ok((
                StatusCode::CREATED,
                Json(StoreMemoryResponse {
                    stored: true,
                    memory: Some(record.into()),
                }),
            ))
        }
        None => Ok((
            StatusCode::OK,
            Json(StoreMemoryResponse {
                stored: false,
                memory: None,
            }),
        )),
    }
}

/// Get a memory by id
pub async fn get_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MemoryResponse>, (StatusCode, String)> {
    let record = state
        .engine
        .get(&id)
        .map_err(error_response)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Memory not found".to_string()))?;

    Ok(Json(record.into()))
}

/// Forget a memory locally and remotely
pub async fn delete_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let deleted = state.engine.forget(&id).await.map_err(error_response)?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "Memory not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Search local memories, topped up from long-term memory
pub async fn search_memories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchMemoriesQuery>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let recall = state
        .engine
        .recall(&query.query, &query.user_id, query.limit.unwrap_or(10))
        .await
        .map_err(error_response)?;

    Ok(Json(SearchResponse {
        local: recall
            .local
            .into_iter()
            .map(|hit| LocalHitResponse {
                memory: hit.record.into(),
                score: hit.score,
            })
            .collect(),
        remote: recall.remote,
    }))
}

/// Upload a user's pending memories now
pub async fn flush_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<UploadReport> {
    let report = state.engine.flush(&user_id).await;
    info!(
        user_id = %user_id,
        uploaded = report.uploaded,
        failed = report.failed,
        "Flush requested"
    );
    Json(report)
}

/// Engine statistics, optionally scoped to one user
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<EngineStats>, (StatusCode, String)> {
    let stats = state
        .engine
        .stats(query.user_id.as_deref())
        .await
        .map_err(error_response)?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::routes::create_router;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use memshuttle_core::{LtmClient, LtmConfig, StmConfig, StmStore};
    use memshuttle_sdk::{MemoryEngine, ShuttleConfig};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Router over an engine whose long-term tier has no credentials
    fn test_app() -> Router {
        let stm = Arc::new(StmStore::new(StmConfig::default()));
        let ltm = Arc::new(LtmClient::new(LtmConfig::default()).unwrap());
        let engine = MemoryEngine::with_components(ShuttleConfig::default(), stm, ltm).unwrap();
        create_router(Arc::new(AppState::new(Config::default(), Arc::new(engine))))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn store(app: &Router, content: &str, user_id: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/memories",
            Some(json!({"content": content, "userId": user_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["memory"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_is_degraded_without_long_term_memory() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["components"]["shortTerm"], true);
        assert_eq!(body["components"]["longTerm"], false);
    }

    #[tokio::test]
    async fn test_store_get_and_list() {
        let app = test_app();
        let id = store(&app, "likes tea", "u1").await;
        store(&app, "walks daily", "u1").await;
        store(&app, "other user", "u2").await;

        let (status, body) = send(&app, "GET", &format!("/api/memories/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "likes tea");
        assert_eq!(body["appId"], "api");
        assert_eq!(body["uploadStatus"], "pending");

        let (status, body) = send(&app, "GET", "/api/memories?user_id=u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["memories"][0]["content"], "walks daily");
    }

    #[tokio::test]
    async fn test_store_rejects_empty_content() {
        let app = test_app();
        let (status, _) = send(
            &app,
            "POST",
            "/api/memories",
            Some(json!({"content": "  ", "user_id": "u1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_then_missing() {
        let app = test_app();
        let id = store(&app, "likes tea", "u1").await;
        let uri = format!("/api/memories/{id}");

        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_search_returns_local_hits() {
        let app = test_app();
        store(&app, "Likes green tea", "u1").await;
        store(&app, "walks daily", "u1").await;

        let (status, body) = send(&app, "GET", "/api/memories/search?user_id=u1&query=TEA", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["local"].as_array().unwrap().len(), 1);
        assert_eq!(body["local"][0]["memory"]["content"], "Likes green tea");
        assert!(body["remote"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_and_stats_without_long_term_memory() {
        let app = test_app();
        store(&app, "likes tea", "u1").await;

        let (status, body) = send(&app, "POST", "/api/users/u1/flush", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uploaded"], 0);
        assert_eq!(body["failed"], 1);

        let (status, body) = send(&app, "GET", "/api/stats?user_id=u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ltmReady"], false);
        assert_eq!(body["stm"]["pending"], 1);
    }
}
