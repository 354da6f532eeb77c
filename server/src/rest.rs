//! REST handlers for the HTTP surface: vector CRUD under `/api/vectors`,
//! k-NN search under `/api/search/*`, a metadata-filtered variant at
//! `/api/search/metadata`, `/health`, `/stats`.

use crate::error::{Timed, TimedWithStatus};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use nbase_coordinator::{Database, RerankMethod, SearchOptions};
use nbase_common::{Metadata, NbaseError, VectorId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub type AppState = Arc<Database>;

fn parse_id(raw: &str) -> VectorId {
    match raw.parse::<u64>() {
        Ok(n) => VectorId::Int(n),
        Err(_) => VectorId::Str(raw.to_string()),
    }
}

#[derive(Deserialize)]
struct InsertVectorRequest {
    id: Option<String>,
    vector: Vec<f32>,
    metadata: Option<Metadata>,
}

#[derive(Serialize)]
struct InsertVectorResponse {
    partition_id: String,
    id: String,
}

async fn insert_vector(
    State(state): State<AppState>,
    Json(payload): Json<InsertVectorRequest>,
) -> TimedWithStatus<InsertVectorResponse> {
    let start = Instant::now();
    let id = payload.id.map(|raw| parse_id(&raw));
    let result = state
        .add_vector(id, payload.vector, payload.metadata)
        .map(|(partition_id, id)| InsertVectorResponse {
            partition_id,
            id: id.to_string(),
        });
    TimedWithStatus::new(start, StatusCode::CREATED, result)
}

#[derive(Serialize)]
struct GetVectorResponse {
    id: String,
    vector: Vec<f32>,
    metadata: Option<Metadata>,
}

async fn get_vector(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Timed<GetVectorResponse> {
    let start = Instant::now();
    let id = parse_id(&raw_id);
    let result = (|| {
        let vector = state
            .get_vector(&id)?
            .ok_or_else(|| NbaseError::NotFound(format!("vector {raw_id}")))?;
        let metadata = state.get_metadata(&id)?;
        Ok(GetVectorResponse {
            id: raw_id.clone(),
            vector,
            metadata,
        })
    })();
    Timed::new(start, result)
}

#[derive(Deserialize)]
struct UpdateMetadataRequest {
    metadata: Metadata,
}

#[derive(Serialize)]
struct UpdateMetadataResponse {
    updated: bool,
}

async fn update_vector(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(payload): Json<UpdateMetadataRequest>,
) -> Timed<UpdateMetadataResponse> {
    let start = Instant::now();
    let id = parse_id(&raw_id);
    let result = state
        .update_metadata(&id, payload.metadata)
        .map(|updated| UpdateMetadataResponse { updated });
    Timed::new(start, result)
}

#[derive(Serialize)]
struct DeleteVectorResponse {
    deleted: bool,
}

async fn delete_vector(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Timed<DeleteVectorResponse> {
    let start = Instant::now();
    let id = parse_id(&raw_id);
    let result = state
        .delete_vector(&id)
        .map(|deleted| DeleteVectorResponse { deleted });
    Timed::new(start, result)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearchRequest {
    vector: Vec<f32>,
    k: Option<usize>,
    use_hnsw: bool,
    rerank: bool,
    rerank_method: Option<String>,
    rerank_lambda: Option<f32>,
    partition_ids: Option<Vec<String>>,
    ef_search: Option<usize>,
    search_timeout_ms: Option<u64>,
    skip_cache: bool,
    include_metadata: bool,
    exact_dimensions: bool,
    weighted_fields: Option<HashMap<String, f32>>,
}

fn rerank_method_from(raw: Option<&str>) -> RerankMethod {
    match raw {
        Some("diversity") => RerankMethod::Diversity,
        Some("weighted") => RerankMethod::Weighted,
        _ => RerankMethod::Standard,
    }
}

#[derive(Serialize)]
struct SearchResultItem {
    id: String,
    distance: f32,
    metadata: Option<Metadata>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultItem>,
}

async fn search(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> Timed<SearchResponse> {
    let start = Instant::now();
    let weighted_fields = payload
        .weighted_fields
        .unwrap_or_default()
        .into_iter()
        .collect();
    let options = SearchOptions {
        use_hnsw: payload.use_hnsw,
        rerank: payload.rerank,
        rerank_method: rerank_method_from(payload.rerank_method.as_deref()),
        filter: None,
        include_metadata: payload.include_metadata,
        distance_metric: None,
        partition_ids: payload.partition_ids,
        ef_search: payload.ef_search,
        search_timeout_ms: payload.search_timeout_ms,
        skip_cache: payload.skip_cache,
        rerank_lambda: payload.rerank_lambda,
        weighted_fields,
        exact_dimensions: payload.exact_dimensions,
    };
    let result = state
        .search(&payload.vector, payload.k, options)
        .await
        .map(|results| SearchResponse {
            results: results
                .into_iter()
                .map(|r| SearchResultItem {
                    id: r.id.to_string(),
                    distance: r.distance,
                    metadata: r.metadata,
                })
                .collect(),
        });
    Timed::new(start, result)
}

#[derive(Deserialize)]
struct MetadataSearchRequest {
    #[serde(flatten)]
    search: SearchRequest,
    equals: HashMap<String, serde_json::Value>,
}

async fn search_metadata(
    State(state): State<AppState>,
    Json(payload): Json<MetadataSearchRequest>,
) -> Timed<SearchResponse> {
    let start = Instant::now();
    let equals = payload.equals;
    let filter = move |_id: &VectorId, metadata: Option<&Metadata>| {
        let Some(metadata) = metadata else {
            return equals.is_empty();
        };
        equals
            .iter()
            .all(|(k, v)| metadata.get(k).map(|got| got == v).unwrap_or(false))
    };
    let weighted_fields = payload
        .search
        .weighted_fields
        .unwrap_or_default()
        .into_iter()
        .collect();
    let options = SearchOptions {
        use_hnsw: payload.search.use_hnsw,
        rerank: payload.search.rerank,
        rerank_method: rerank_method_from(payload.search.rerank_method.as_deref()),
        filter: Some(&filter),
        include_metadata: true,
        distance_metric: None,
        partition_ids: payload.search.partition_ids,
        ef_search: payload.search.ef_search,
        search_timeout_ms: payload.search.search_timeout_ms,
        skip_cache: true,
        rerank_lambda: payload.search.rerank_lambda,
        weighted_fields,
        exact_dimensions: payload.search.exact_dimensions,
    };
    let result = state
        .search(&payload.search.vector, payload.search.k, options)
        .await
        .map(|results| SearchResponse {
            results: results
                .into_iter()
                .map(|r| SearchResultItem {
                    id: r.id.to_string(),
                    distance: r.distance,
                    metadata: r.metadata,
                })
                .collect(),
        });
    Timed::new(start, result)
}

#[derive(Serialize)]
struct HealthResponse {
    ready: bool,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthResponse { ready }))
}

async fn stats(State(state): State<AppState>) -> Json<nbase_manager::ManagerStats> {
    Json(state.get_stats())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/vectors", post(insert_vector))
        .route(
            "/api/vectors/:id",
            get(get_vector).patch(update_vector).delete(delete_vector),
        )
        .route("/api/search", post(search))
        .route("/api/search/metadata", post(search_metadata))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}
