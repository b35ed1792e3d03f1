//! Axum Handlers for the REST API
//!
//! Status endpoints and the call-status switch next to the WebSockets. They use `utoipa` doc
//! comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::info;

use crate::{
    models::{CallStatus, CallStatusPayload, ErrorResponse, Greeting, PollyStatus, StreamingStatus},
    state::AppState,
};

pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

/// Liveness greeting.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Polly is up", body = Greeting)
    )
)]
pub async fn root() -> Json<Greeting> {
    Json(Greeting {
        message: "Polly is alive and ready to roast!".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Current streaming and conversation-mode flags.
#[utoipa::path(
    get,
    path = "/streaming-status",
    responses(
        (status = 200, description = "Assistant flags", body = StreamingStatus)
    )
)]
pub async fn streaming_status(State(state): State<Arc<AppState>>) -> Json<StreamingStatus> {
    let snapshot = state.context.snapshot();
    Json(StreamingStatus {
        streaming_enabled: snapshot.streaming_enabled,
        conversation_mode: snapshot.conversation_mode,
    })
}

/// Overall assistant status: flags, live sessions and which vendors are wired.
#[utoipa::path(
    get,
    path = "/polly-status",
    responses(
        (status = 200, description = "Assistant status", body = PollyStatus)
    )
)]
pub async fn polly_status(State(state): State<Arc<AppState>>) -> Json<PollyStatus> {
    let snapshot = state.context.snapshot();
    Json(PollyStatus {
        status: "online".to_string(),
        streaming_enabled: snapshot.streaming_enabled,
        conversation_mode: snapshot.conversation_mode,
        active_sessions: state.registry.active_count().await,
        active_calls: state.registry.active_calls().await,
        music_playing: state.player.is_playing(),
        tts_available: state.tts.is_some(),
        vision_available: state.vision.is_some(),
    })
}

/// Marks a live session as handed to (or back from) an external voice call.
///
/// While the call is active Polly keeps answering in text but does not speak.
#[utoipa::path(
    patch,
    path = "/sessions/{session_id}/call-status",
    request_body = CallStatusPayload,
    responses(
        (status = 200, description = "Call flag updated", body = CallStatus),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("session_id" = String, Path, description = "Client-chosen session id")
    )
)]
pub async fn update_call_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<CallStatusPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if !state
        .registry
        .set_call_active(&session_id, payload.active)
        .await
    {
        return Err(ApiError::NotFound(format!(
            "Session with id '{session_id}' not found"
        )));
    }
    info!(%session_id, active = payload.active, "Call status updated");

    let info = state
        .registry
        .get(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{session_id}' not found")))?;
    let status = CallStatus {
        session_id,
        call_active: info.call_active,
        active_calls: state.registry.active_calls().await,
    };
    Ok((StatusCode::OK, Json(status)))
}
