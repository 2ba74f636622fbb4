//! HTTP boundary for highlight retrieval.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::database::{Highlight, ScoredHighlight, Video};
use crate::error::AppError;
use crate::retrieval::RetrievalScorer;

#[derive(Clone)]
pub struct ApiState {
    pub scorer: Arc<RetrievalScorer>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub text: String,
    #[serde(default)]
    pub video_id: Option<i64>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SimilarParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat/question", post(ask_question))
        .route("/videos", get(list_videos))
        .route("/videos/:id/highlights", get(video_highlights))
        .route("/highlights/:id/similar", get(similar_highlights))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(bind: &str, state: ApiState, shutdown: CancellationToken) -> Result<(), AppError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| AppError::Config(format!("invalid bind address {}: {}", bind, e)))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Io(format!("failed to bind {}: {}", addr, e)))?;
    serve_on(listener, state, shutdown).await
}

pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let addr = listener.local_addr()?;
    log::info!("Retrieval API listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    log::info!("Retrieval API stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn ask_question(
    State(state): State<ApiState>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<Vec<ScoredHighlight>>, AppError> {
    let results = state
        .scorer
        .search(&request.text, request.video_id, request.top_k)
        .await?;
    Ok(Json(results))
}

async fn list_videos(State(state): State<ApiState>) -> Result<Json<Vec<Video>>, AppError> {
    Ok(Json(state.scorer.videos().await?))
}

async fn video_highlights(
    State(state): State<ApiState>,
    Path(video_id): Path<i64>,
) -> Result<Json<Vec<Highlight>>, AppError> {
    Ok(Json(state.scorer.video_highlights(video_id).await?))
}

async fn similar_highlights(
    State(state): State<ApiState>,
    Path(highlight_id): Path<i64>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<Vec<ScoredHighlight>>, AppError> {
    Ok(Json(state.scorer.similar_to(highlight_id, params.limit).await?))
}
