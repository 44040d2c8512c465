//! Route handler functions.
//!
//! Each handler extracts query or body parameters via axum extractors,
//! runs the query engine from AppState, and returns JSON responses.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use sift_core::types::{SearchOutcome, SearchResult};

use crate::error::ApiError;
use crate::state::AppState;

/// Tool name recorded in the invocation log for search calls.
pub const SEARCH_TOOL: &str = "knowledge_base_search";

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub k: Option<usize>,
    pub invocation_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub invocation_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub documents: usize,
    pub dimensions: usize,
    pub metric: String,
    pub model: String,
}

// =============================================================================
// Handler functions
// =============================================================================

/// GET /health - liveness plus a summary of the loaded index.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        documents: state.search.documents(),
        dimensions: state.search.dimensions(),
        metric: state.search.metric().to_string(),
        model: state.search.model_name().to_string(),
    })
}

/// GET /search?q=...&k=...
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    run_search(&state, params.q, params.k, params.invocation_reason).await
}

/// POST /search with `{query, k?, invocation_reason?}`.
pub async fn search_post(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    run_search(&state, request.query, request.k, request.invocation_reason).await
}

async fn run_search(
    state: &AppState,
    query: Option<String>,
    k: Option<usize>,
    invocation_reason: Option<String>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = query
        .ok_or_else(|| ApiError::BadRequest("Parameter 'q' is required for search".to_string()))?;
    if query.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Parameter 'q' must not be empty".to_string(),
        ));
    }
    if k == Some(0) {
        return Err(ApiError::BadRequest(
            "Parameter 'k' must be at least 1".to_string(),
        ));
    }

    state.invocation_log.record(
        SEARCH_TOOL,
        invocation_reason.as_deref(),
        serde_json::json!({ "query": &query, "k": k }),
    )
    .await;

    match state.search.search(&query, k).await {
        SearchOutcome::Matches { results } => Ok(Json(SearchResponse {
            count: results.len(),
            results,
        })),
        SearchOutcome::Degraded { reason } => Err(ApiError::Internal(format!(
            "Search could not be completed: {}",
            reason
        ))),
        SearchOutcome::Inconsistent { key, metadata_len } => {
            Err(ApiError::IndexInconsistent { key, metadata_len })
        }
    }
}
