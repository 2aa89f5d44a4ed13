use crate::AppState;
use crate::catalog::CatalogError;
use crate::catalog::service::TryOnRequest;
use crate::generation::{CacheDecision, GenerationParams};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const TRENDING_DEFAULT_LIMIT: usize = 12;
const TRENDING_MAX_LIMIT: usize = 50;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/search", post(handle_search))
        .route("/render", post(handle_render))
        .route("/generation-cache-check", post(handle_generation_cache_check))
        .route("/trending", get(handle_trending))
        .layer(CorsLayer::permissive()) // Allow CORS for all origins during development
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub user_id: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> impl IntoResponse {
    info!("📡 Received POST /search for {:?}", request.query);
    let products = state
        .catalog
        .search(
            &request.query,
            request.user_id.as_deref(),
            request.category.as_deref(),
            request.brand.as_deref(),
        )
        .await;
    Json(products)
}

async fn handle_render(
    State(state): State<AppState>,
    Json(request): Json<TryOnRequest>,
) -> Response {
    info!("📡 Received POST /render for {}", request.source_image_url);
    match state.catalog.render_try_on(&request).await {
        Ok(asset) => Json(asset).into_response(),
        Err(CatalogError::RenderFailed { source_image_url }) => {
            error!("❌ Render failed for {source_image_url}");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "error": "Try-on render failed",
                    "fallback_image": source_image_url,
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!("❌ Render error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerationCacheCheckRequest {
    pub user_id: String,
    pub generation_params: GenerationParams,
}

async fn handle_generation_cache_check(
    State(state): State<AppState>,
    Json(request): Json<GenerationCacheCheckRequest>,
) -> impl IntoResponse {
    match state
        .generation
        .check(&request.user_id, &request.generation_params)
        .await
    {
        CacheDecision::Hit {
            output_reference,
            job_id,
        } => Json(json!({
            "found": true,
            "output_reference": output_reference,
            "job_id": job_id,
        })),
        CacheDecision::Miss { content_hash } => Json(json!({
            "found": false,
            "content_hash": content_hash,
        })),
    }
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

async fn handle_trending(
    State(state): State<AppState>,
    Query(query): Query<TrendingQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(TRENDING_DEFAULT_LIMIT)
        .min(TRENDING_MAX_LIMIT);
    let products = state.catalog.trending(query.user_id.as_deref(), limit).await;
    Json(products)
}
