//! Axum Router Configuration
//!
//! The status endpoints, both WebSockets and the OpenAPI documentation.

use crate::{
    handlers,
    models::{CallStatus, CallStatusPayload, ErrorResponse, Greeting, PollyStatus, StreamingStatus},
    state::AppState,
    ws::{text_ws_handler, ws_handler},
};

use axum::{
    Router,
    routing::{get, patch},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root,
        handlers::streaming_status,
        handlers::polly_status,
        handlers::update_call_status,
    ),
    components(
        schemas(Greeting, StreamingStatus, PollyStatus, CallStatusPayload, CallStatus, ErrorResponse)
    ),
    tags(
        (name = "Polly API", description = "Status endpoints for the Polly voice assistant")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/", get(handlers::root))
        .route("/streaming-status", get(handlers::streaming_status))
        .route("/polly-status", get(handlers::polly_status))
        .route(
            "/sessions/{session_id}/call-status",
            patch(handlers::update_call_status),
        )
        .route("/ws/audio", get(ws_handler))
        .route("/ws/text", get(text_ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
