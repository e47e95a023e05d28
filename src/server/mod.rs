//! HTTP 서버 (axum)
//!
//! - `GET  /health`
//! - `GET  /api/search?query=..&n_results=..`
//! - `POST /api/chat`         `{query, n_results?}` → JSON
//! - `POST /api/chat/stream`  `{query, n_results?}` → text 스트림 (DOCS 마커 포함)
//!
//! 요청마다 별도 태스크에서 처리되므로 느린 생성이 다른 세션의 검색을 막지 않습니다.
//! 클라이언트가 연결을 끊으면 본문 스트림이 drop 되어 생성도 멈춥니다.

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::{ChatResponse, ChatService, SearchOutcome};
use crate::config::ServerConfig;
use crate::error::RagError;

#[derive(Clone)]
pub struct AppState {
    pub service: ChatService,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub n_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub n_results: Option<usize>,
}

/// API 에러 응답
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Rag(RagError),
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        Self::Rag(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Rag(e) => {
                let status = match &e {
                    RagError::Config(_) | RagError::Template(_) => StatusCode::BAD_REQUEST,
                    RagError::ModelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    RagError::Transport { .. } => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/search", get(search))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// 서버 실행 (종료 시까지 대기)
pub async fn run_server(config: &ServerConfig, service: ChatService) -> anyhow::Result<()> {
    let app = app_router(AppState { service });
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid host/port: {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("docrag listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn require_query(query: &str) -> Result<String, ApiError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    Ok(query.to_string())
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchOutcome>, ApiError> {
    let query = require_query(&params.query)?;
    let n_results = params.n_results.unwrap_or_else(|| state.service.default_n_results());
    Ok(Json(state.service.search_documents(&query, n_results).await))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let query = require_query(&request.query)?;
    let n_results = request.n_results.unwrap_or_else(|| state.service.default_n_results());
    let response = state.service.generate_sync_response(&query, n_results).await?;
    Ok(Json(response))
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let query = require_query(&request.query)?;
    let n_results = request.n_results.unwrap_or_else(|| state.service.default_n_results());

    let fragments = state
        .service
        .generate_stream_response(&query, n_results)
        .map(Ok::<_, Infallible>);

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(fragments),
    )
        .into_response())
}

// ============================================================================
// Tests
// ============================================================================
