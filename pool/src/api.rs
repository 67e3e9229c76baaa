//! HTTP status API: health, Prometheus text, and read-only views of the
//! pool store.

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::metrics::prometheus as metrics;
use crate::store::PoolStore;
use crate::stratum::StratumCoordinator;

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn PoolStore>,
    /// Present in processes that run the stratum side.
    pub coordinator: Option<Arc<StratumCoordinator>>,
    pub start_time: i64,
}

impl ApiState {
    pub fn new(store: Arc<dyn PoolStore>, coordinator: Option<Arc<StratumCoordinator>>) -> Self {
        Self {
            store,
            coordinator,
            start_time: chrono::Utc::now().timestamp(),
        }
    }
}

fn store_error(e: anyhow::Error) -> (StatusCode, Json<Value>) {
    tracing::warn!("API store read failed: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": e.to_string()})),
    )
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

async fn api_health(State(state): State<ApiState>) -> Json<Value> {
    let store_ok = state.store.pool_snapshot().await.is_ok();
    let workers = match &state.coordinator {
        Some(c) => Some(c.worker_count().await),
        None => None,
    };
    Json(json!({
        "status": "ok",
        "store": store_ok,
        "workers": workers,
        "uptime": chrono::Utc::now().timestamp() - state.start_time,
    }))
}

async fn api_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics::render(),
    )
}

async fn api_pool(State(state): State<ApiState>) -> ApiResult {
    let snap = state.store.pool_snapshot().await.map_err(store_error)?;
    Ok(Json(json!(snap)))
}

async fn api_network(State(state): State<ApiState>) -> ApiResult {
    let snap = state.store.network_snapshot().await.map_err(store_error)?;
    Ok(Json(json!(snap)))
}

async fn api_workers(State(state): State<ApiState>) -> ApiResult {
    let workers = state.store.workers().await.map_err(store_error)?;
    Ok(Json(json!({"count": workers.len(), "workers": workers})))
}

async fn api_blocks(State(state): State<ApiState>) -> ApiResult {
    let blocks = state.store.mined_blocks().await.map_err(store_error)?;
    Ok(Json(json!({"count": blocks.len(), "blocks": blocks})))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn api_history(State(state): State<ApiState>, Query(q): Query<HistoryQuery>) -> ApiResult {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(1_000);
    let blocks = state.store.history(limit).await.map_err(store_error)?;
    Ok(Json(json!({"count": blocks.len(), "blocks": blocks})))
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/metrics", get(api_metrics))
        .route("/pool", get(api_pool))
        .route("/network", get(api_network))
        .route("/workers", get(api_workers))
        .route("/blocks", get(api_blocks))
        .route("/history", get(api_history))
        .with_state(state)
}

pub async fn serve(listen: &str, state: ApiState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("📡 Pool API listening on {}", listen);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
