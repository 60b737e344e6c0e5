//! HTTP adapter: the channel API plus static serving of the HLS tree.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use telecast_core::models::{ChannelId, EnqueueMovieRequest};
use telecast_core::registry::ChannelRegistry;
use telecast_core::Config;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<telecast_core::Error> for AppError {
    fn from(err: telecast_core::Error) -> Self {
        use telecast_core::Error;
        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ChannelRegistry>,
}

/// Build the full application router.
pub fn create_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/channels", get(list_channels).post(create_channel))
        .route("/api/channels/{id}/movies", axum::routing::post(enqueue_movie))
        .route("/api/channels/{id}/status", get(channel_status))
        .route("/api/channels/{id}/queue", get(channel_queue))
        .route("/api/channels/{id}/schedule", get(channel_schedule))
        .nest_service("/hls", ServeDir::new(&config.streaming.output_root))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSummary {
    id: ChannelId,
    name: String,
    is_playing: bool,
    playing_ad: bool,
    queue_length: usize,
}

async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelSummary>> {
    let channels = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|(id, status)| ChannelSummary {
            id,
            name: status.name,
            is_playing: status.is_playing,
            playing_ad: status.playing_ad,
            queue_length: status.queue_length,
        })
        .collect();
    Json(channels)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChannelRequest {
    id: Option<ChannelId>,
    name: String,
}

async fn create_channel(
    State(state): State<AppState>,
    Json(request): Json<CreateChannelRequest>,
) -> AppResult<impl IntoResponse> {
    let id = request.id.unwrap_or_default();
    state.registry.init_channel(&id, &request.name).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn enqueue_movie(
    State(state): State<AppState>,
    Path(id): Path<ChannelId>,
    Json(request): Json<EnqueueMovieRequest>,
) -> AppResult<impl IntoResponse> {
    state.registry.enqueue(&id, request).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn channel_status(
    State(state): State<AppState>,
    Path(id): Path<ChannelId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.registry.status(&id).await?))
}

async fn channel_queue(
    State(state): State<AppState>,
    Path(id): Path<ChannelId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.registry.queue(&id).await?))
}

async fn channel_schedule(
    State(state): State<AppState>,
    Path(id): Path<ChannelId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.registry.schedule(&id).await?))
}
