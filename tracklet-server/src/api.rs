//! HTTP API for session administration and batch propagation.
//!
//! Every failure carries a machine-readable kind plus a human-readable
//! message; failures are always scoped to the session (or request) that
//! caused them. The streaming counterpart of the batch propagation endpoint
//! lives in [`crate::handlers::websocket`].

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use utoipa::ToSchema;

use tracklet_core::{
    DeviceId, Direction, EngineError, ErrorKind, FrameResult, ObjectResult, Prompt,
    PropagateRequest, SessionId, SessionSnapshot, SessionStatus, SessionStore, TrackError,
    VideoInfo, VideoSource, run_batch,
};

use crate::handlers::websocket::websocket_handler;
use crate::openapi::openapi_json;

/// Shared application state.
#[derive(Clone)]
pub struct ApiState {
    /// Session registry; also the owner of the device pool and the engine.
    pub store: Arc<SessionStore>,
}

impl ApiState {
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

// ================================================================================================
// Request/Response Types
// ================================================================================================

/// Request to start a tracking session. Exactly one video source must be set.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionRequest {
    /// Local path to a video file.
    pub video_path: Option<String>,
    /// http/https URL of a video file.
    pub video_url: Option<String>,
    /// Base64-encoded video bytes.
    pub video_base64: Option<String>,
    /// Custom session id (generated when absent).
    pub session_id: Option<String>,
    /// Specific devices to reserve (one is allocated when absent).
    pub device_ids: Option<Vec<String>>,
}

/// Response for a created session.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[schema(value_type = Object)]
    pub video_info: VideoInfo,
    #[schema(value_type = String)]
    pub status: SessionStatus,
    #[schema(value_type = Vec<String>)]
    pub assigned_devices: Vec<DeviceId>,
}

/// Request to attach prompts to one frame.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AddPromptRequest {
    pub frame_index: u32,
    /// Non-empty list of text/point/box prompts.
    #[schema(value_type = Vec<Object>)]
    pub prompts: Vec<Prompt>,
    /// Object to refine; absent creates new objects.
    pub object_id: Option<u32>,
}

/// Response for an accepted prompt: initial tracking output per object.
#[derive(Debug, Serialize, ToSchema)]
pub struct AddPromptResponse {
    pub frame_index: u32,
    pub object_ids: Vec<u32>,
    pub masks: Vec<String>,
    #[schema(value_type = Vec<Vec<f32>>)]
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub status: String,
}

/// Response for the session status query.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionStatusResponse {
    pub session_id: String,
    #[schema(value_type = String)]
    pub status: SessionStatus,
    pub current_objects: usize,
    pub frames_processed: u64,
    pub total_frames: u32,
    pub device_memory_used_mb: f64,
    #[schema(value_type = Vec<String>)]
    pub assigned_devices: Vec<DeviceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for removing an object from tracking.
#[derive(Debug, Serialize, ToSchema)]
pub struct RemoveObjectResponse {
    pub session_id: String,
    pub object_id: u32,
    pub status: String,
}

/// Response for resetting a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct ResetSessionResponse {
    pub session_id: String,
    pub status: String,
    pub objects_cleared: usize,
}

/// Response for closing a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct CloseSessionResponse {
    pub session_id: String,
    pub status: String,
    pub devices_released: usize,
    pub memory_freed_mb: f64,
}

/// One session in the listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListItem {
    pub session_id: String,
    #[schema(value_type = String)]
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub objects_count: usize,
    pub frames_processed: u64,
    pub total_frames: u32,
}

/// Response listing all live sessions.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionListItem>,
    pub total_sessions: usize,
}

/// Request for batch propagation.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BatchPropagateRequest {
    #[serde(default = "default_direction")]
    #[schema(value_type = String)]
    pub direction: Direction,
    #[serde(default)]
    pub start_frame_index: u32,
    #[serde(default)]
    pub max_frames: Option<u32>,
    /// Streaming belongs to the WebSocket endpoint; true here is rejected.
    #[serde(default)]
    pub stream: bool,
    /// Caller-imposed deadline for the whole run.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

const fn default_direction() -> Direction {
    Direction::Both
}

/// Response for a completed batch propagation.
#[derive(Debug, Serialize, ToSchema)]
pub struct PropagateResponse {
    pub session_id: String,
    /// Frame results keyed by stringified frame index.
    #[schema(value_type = Object)]
    pub results: BTreeMap<u32, FrameResult>,
    pub total_frames: usize,
    pub processing_time_ms: f64,
}

/// Error body shape shared by every failing endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

// ================================================================================================
// Error Mapping
// ================================================================================================

/// HTTP wrapper around the core error taxonomy.
#[derive(Debug)]
pub struct ApiError(TrackError);

impl From<TrackError> for ApiError {
    fn from(err: TrackError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::SessionBusy => StatusCode::CONFLICT,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::InferenceFailure => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
        };

        let body = json!({
            "error": {
                "kind": kind.as_str(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

// ================================================================================================
// Helpers
// ================================================================================================

fn resolve_source(request: &CreateSessionRequest) -> Result<VideoSource, TrackError> {
    let mut sources = Vec::new();
    if let Some(path) = &request.video_path {
        sources.push(VideoSource::Path(path.clone()));
    }
    if let Some(url) = &request.video_url {
        sources.push(VideoSource::Url(url.clone()));
    }
    if let Some(encoded) = &request.video_base64 {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| TrackError::invalid(format!("invalid base64 video payload: {e}")))?;
        sources.push(VideoSource::Bytes(bytes));
    }

    match sources.len() {
        0 => Err(TrackError::invalid(
            "no video source provided (video_path, video_url, or video_base64 required)",
        )),
        1 => Ok(sources.remove(0)),
        _ => Err(TrackError::invalid(
            "exactly one of video_path, video_url, video_base64 must be set",
        )),
    }
}

fn map_engine_error(id: &SessionId, err: EngineError) -> TrackError {
    match err {
        EngineError::UnknownSession { id } => TrackError::NotFound { id },
        EngineError::UnknownObject { object_id } => TrackError::ObjectNotFound {
            id: id.clone(),
            object_id,
        },
        other => TrackError::invalid(other.to_string()),
    }
}

fn summarize(snapshot: &SessionSnapshot) -> SessionListItem {
    SessionListItem {
        session_id: snapshot.session_id.to_string(),
        status: snapshot.status,
        created_at: snapshot.created_at,
        objects_count: snapshot.objects.len(),
        frames_processed: snapshot.frames_processed,
        total_frames: snapshot.video_info.total_frames,
    }
}

// ================================================================================================
// Endpoint Implementations
// ================================================================================================

/// GET /health - Service liveness.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is healthy"))
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "tracklet",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// POST /api/v1/sessions - Start a tracking session.
#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 429, description = "Session capacity exceeded", body = ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<ApiState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = resolve_source(&request)?;
    let id = request.session_id.map(SessionId::from);
    let devices: Option<Vec<DeviceId>> = request
        .device_ids
        .map(|ids| ids.into_iter().map(DeviceId::new).collect());

    let session = state.store.create(id, &source, devices.as_deref())?;

    let response = CreateSessionResponse {
        session_id: session.id().to_string(),
        video_info: *session.video(),
        status: session.status(),
        assigned_devices: session.devices().to_vec(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/sessions - List live sessions.
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "sessions",
    responses((status = 200, description = "All live sessions", body = SessionListResponse))
)]
pub async fn list_sessions(State(state): State<ApiState>) -> Json<SessionListResponse> {
    let sessions: Vec<SessionListItem> = state.store.list().iter().map(summarize).collect();
    let total_sessions = sessions.len();
    Json(SessionListResponse {
        sessions,
        total_sessions,
    })
}

/// GET /api/v1/sessions/{id} - Status and progress of one session.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session status", body = SessionStatusResponse),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn session_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let id = SessionId::from(id);
    let session = state.store.get(&id)?;
    let snapshot = session.snapshot();

    Ok(Json(SessionStatusResponse {
        session_id: snapshot.session_id.to_string(),
        status: snapshot.status,
        current_objects: snapshot.objects.len(),
        frames_processed: snapshot.frames_processed,
        total_frames: snapshot.video_info.total_frames,
        device_memory_used_mb: state.store.engine().memory_usage_mb(&id),
        assigned_devices: snapshot.assigned_devices,
        error: snapshot.error,
    }))
}

/// POST /api/v1/sessions/{id}/prompts - Seed or refine tracking on a frame.
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/prompts",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    request_body = AddPromptRequest,
    responses(
        (status = 200, description = "Prompt accepted", body = AddPromptResponse),
        (status = 400, description = "Malformed prompt", body = ErrorBody),
        (status = 404, description = "Unknown session or object", body = ErrorBody),
        (status = 409, description = "Propagation in flight", body = ErrorBody)
    )
)]
pub async fn add_prompts(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<AddPromptRequest>,
) -> Result<Json<AddPromptResponse>, ApiError> {
    let id = SessionId::from(id);
    let session = state.store.get(&id)?;
    session.require_ready()?;

    if request.prompts.is_empty() {
        return Err(TrackError::invalid("prompts must not be empty").into());
    }
    for prompt in &request.prompts {
        prompt.validate().map_err(TrackError::invalid)?;
    }
    if request.frame_index >= session.video().total_frames {
        return Err(TrackError::invalid(format!(
            "frame_index {} out of range for {}-frame video",
            request.frame_index,
            session.video().total_frames
        ))
        .into());
    }

    let outcome = state
        .store
        .engine()
        .add_prompt(&id, request.frame_index, &request.prompts, request.object_id)
        .map_err(|err| map_engine_error(&id, err))?;

    if request.object_id.is_none() {
        session.add_objects(&outcome.object_ids);
    }

    info!(
        session = %id,
        frame = outcome.frame_index,
        objects = outcome.object_ids.len(),
        "added prompt"
    );

    let masks = outcome.results.iter().map(|o| o.mask.clone()).collect();
    let boxes = outcome.results.iter().map(|o| o.bbox).collect();
    let scores = outcome.results.iter().map(|o: &ObjectResult| o.score).collect();
    Ok(Json(AddPromptResponse {
        frame_index: outcome.frame_index,
        object_ids: outcome.object_ids,
        masks,
        boxes,
        scores,
        status: "prompt_added".to_string(),
    }))
}

/// DELETE /api/v1/sessions/{id}/objects/{object_id} - Stop tracking an object.
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{id}/objects/{object_id}",
    tag = "sessions",
    params(
        ("id" = String, Path, description = "Session identifier"),
        ("object_id" = u32, Path, description = "Tracked object identifier")
    ),
    responses(
        (status = 200, description = "Object removed", body = RemoveObjectResponse),
        (status = 404, description = "Unknown session or object", body = ErrorBody),
        (status = 409, description = "Propagation in flight", body = ErrorBody)
    )
)]
pub async fn remove_object(
    State(state): State<ApiState>,
    Path((id, object_id)): Path<(String, u32)>,
) -> Result<Json<RemoveObjectResponse>, ApiError> {
    let id = SessionId::from(id);
    let session = state.store.get(&id)?;
    session.require_ready()?;

    state
        .store
        .engine()
        .remove_object(&id, object_id)
        .map_err(|err| map_engine_error(&id, err))?;
    session.remove_object(object_id);

    info!(session = %id, object_id, "removed object");
    Ok(Json(RemoveObjectResponse {
        session_id: id.to_string(),
        object_id,
        status: "removed".to_string(),
    }))
}

/// POST /api/v1/sessions/{id}/reset - Clear all prompts and objects.
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/reset",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session reset to ready", body = ResetSessionResponse),
        (status = 404, description = "Unknown session", body = ErrorBody),
        (status = 409, description = "Propagation in flight", body = ErrorBody)
    )
)]
pub async fn reset_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ResetSessionResponse>, ApiError> {
    let id = SessionId::from(id);
    let session = state.store.get(&id)?;
    if session.status() == SessionStatus::Processing {
        return Err(TrackError::SessionBusy { id }.into());
    }

    state
        .store
        .engine()
        .reset(&id)
        .map_err(|err| map_engine_error(&id, err))?;
    let objects_cleared = session.reset();

    info!(session = %id, objects_cleared, "reset session");
    Ok(Json(ResetSessionResponse {
        session_id: id.to_string(),
        status: "reset".to_string(),
        objects_cleared,
    }))
}

/// DELETE /api/v1/sessions/{id} - Close the session and release its devices.
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session closed", body = CloseSessionResponse),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn close_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<CloseSessionResponse>, ApiError> {
    let id = SessionId::from(id);
    let memory_freed_mb = state.store.engine().memory_usage_mb(&id);
    let devices_released = state.store.close(&id)?;

    Ok(Json(CloseSessionResponse {
        session_id: id.to_string(),
        status: "closed".to_string(),
        devices_released,
        memory_freed_mb,
    }))
}

/// POST /api/v1/sessions/{id}/propagate - Batch propagation.
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/propagate",
    tag = "propagation",
    params(("id" = String, Path, description = "Session identifier")),
    request_body = BatchPropagateRequest,
    responses(
        (status = 200, description = "Propagation completed", body = PropagateResponse),
        (status = 400, description = "Invalid range or direction", body = ErrorBody),
        (status = 409, description = "Propagation already in flight", body = ErrorBody),
        (status = 500, description = "Inference failure", body = ErrorBody),
        (status = 504, description = "Deadline exceeded", body = ErrorBody)
    )
)]
pub async fn propagate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<BatchPropagateRequest>,
) -> Result<Json<PropagateResponse>, ApiError> {
    if request.stream {
        return Err(TrackError::invalid(
            "use the WebSocket endpoint /api/v1/sessions/{id}/stream for streaming",
        )
        .into());
    }

    let id = SessionId::from(id);
    let core_request = PropagateRequest {
        direction: request.direction,
        start_frame_index: request.start_frame_index,
        max_frames: request.max_frames,
    };
    let deadline = request.timeout_ms.map(Duration::from_millis);

    let outcome = run_batch(&state.store, &id, core_request, deadline).await?;

    info!(
        session = %id,
        frames = outcome.total_frames,
        elapsed_ms = outcome.processing_time_ms,
        "batch propagation complete"
    );
    Ok(Json(PropagateResponse {
        session_id: outcome.session_id.to_string(),
        results: outcome.results,
        total_frames: outcome.total_frames,
        processing_time_ms: outcome.processing_time_ms,
    }))
}

// ================================================================================================
// Router
// ================================================================================================

/// Builds the full API route table.
pub fn create_api_routes() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route(
            "/api/v1/sessions/{id}",
            get(session_status).delete(close_session),
        )
        .route("/api/v1/sessions/{id}/prompts", post(add_prompts))
        .route(
            "/api/v1/sessions/{id}/objects/{object_id}",
            delete(remove_object),
        )
        .route("/api/v1/sessions/{id}/reset", post(reset_session))
        .route("/api/v1/sessions/{id}/propagate", post(propagate))
        .route("/api/v1/sessions/{id}/stream", get(websocket_handler))
}
