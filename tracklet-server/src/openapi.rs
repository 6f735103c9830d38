//! Generated OpenAPI document for the HTTP surface.
//!
//! Served as plain JSON at `/api-docs/openapi.json`; clients bring their own
//! viewer.

use axum::response::Json;
use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tracklet Video Tracking API",
        description = "Session lifecycle, prompting, and propagation for video object tracking"
    ),
    paths(
        api::health,
        api::create_session,
        api::list_sessions,
        api::session_status,
        api::add_prompts,
        api::remove_object,
        api::reset_session,
        api::close_session,
        api::propagate,
    ),
    components(schemas(
        api::CreateSessionRequest,
        api::CreateSessionResponse,
        api::AddPromptRequest,
        api::AddPromptResponse,
        api::SessionStatusResponse,
        api::RemoveObjectResponse,
        api::ResetSessionResponse,
        api::CloseSessionResponse,
        api::SessionListItem,
        api::SessionListResponse,
        api::BatchPropagateRequest,
        api::PropagateResponse,
        api::ErrorBody,
    )),
    tags(
        (name = "sessions", description = "Session lifecycle and prompting"),
        (name = "propagation", description = "Batch propagation"),
        (name = "system", description = "Service health and documentation"),
    )
)]
pub struct ApiDoc;

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
