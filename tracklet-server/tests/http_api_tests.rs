//! Tests for the session administration HTTP API.
//!
//! Covers the admission bound, session lifecycle semantics (create, status,
//! prompt, remove, reset, close, list), and the error body shape.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

use tracklet_core::{
    CoreConfig, DeviceId, SessionStore, engine::synthetic::SyntheticEngine,
};
use tracklet_server::api::{ApiState, create_api_routes};

const TEST_TOTAL_FRAMES: u32 = 20;

fn router_with(max_sessions: usize, device_count: usize, engine: SyntheticEngine) -> Router {
    let config = CoreConfig {
        max_sessions,
        idle_timeout: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(300),
        devices: (0..device_count)
            .map(|i| DeviceId::new(format!("cuda:{i}")))
            .collect(),
    };
    let store = Arc::new(SessionStore::new(config, Arc::new(engine)));
    create_api_routes().with_state(ApiState::new(store))
}

fn create_test_router() -> Router {
    router_with(
        10,
        4,
        SyntheticEngine::new().with_total_frames(TEST_TOTAL_FRAMES),
    )
}

/// Helper to make HTTP requests
async fn make_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    let request = if let Some(body) = body {
        request.body(Body::from(body.to_string()))
    } else {
        request.body(Body::empty())
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

    (status, json)
}

async fn create_session(app: &Router, id: &str) -> Value {
    let (status, response) = make_request(
        app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({"video_path": "clip.mp4", "session_id": id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    response
}

async fn add_text_prompt(app: &Router, id: &str, text: &str) -> Value {
    let (status, response) = make_request(
        app,
        Method::POST,
        &format!("/api/v1/sessions/{id}/prompts"),
        Some(json!({
            "frame_index": 0,
            "prompts": [{"type": "text", "text": text}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    response
}

#[tokio::test]
async fn test_health() {
    let app = create_test_router();

    let (status, response) = make_request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"].as_str().unwrap(), "healthy");
    assert_eq!(response["service"].as_str().unwrap(), "tracklet");
}

#[tokio::test]
async fn test_create_session_success() {
    let app = create_test_router();

    let response = create_session(&app, "vid-1").await;
    assert_eq!(response["session_id"].as_str().unwrap(), "vid-1");
    assert_eq!(response["status"].as_str().unwrap(), "ready");
    assert_eq!(
        response["video_info"]["total_frames"].as_u64().unwrap(),
        u64::from(TEST_TOTAL_FRAMES)
    );
    assert!(response["video_info"]["resolution"]["width"].is_number());
    assert_eq!(response["assigned_devices"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_session_generates_id() {
    let app = create_test_router();

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({"video_url": "http://example.com/clip.mp4"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!response["session_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_session_requires_exactly_one_source() {
    let app = create_test_router();

    let (status, response) =
        make_request(&app, Method::POST, "/api/v1/sessions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response["error"]["kind"].as_str().unwrap(),
        "invalid_request"
    );
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("no video source")
    );

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({
            "video_path": "clip.mp4",
            "video_url": "http://example.com/clip.mp4"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("exactly one")
    );
}

#[tokio::test]
async fn test_create_session_rejects_invalid_base64() {
    let app = create_test_router();

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({"video_base64": "!!not-base64!!"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response["error"]["kind"].as_str().unwrap(),
        "invalid_request"
    );
}

#[tokio::test]
async fn test_duplicate_session_id_rejected() {
    let app = create_test_router();
    create_session(&app, "dup").await;

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({"video_path": "clip.mp4", "session_id": "dup"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("already in use")
    );
}

#[tokio::test]
async fn test_admission_bound_returns_capacity_exceeded() {
    let app = router_with(2, 4, SyntheticEngine::new());
    create_session(&app, "a").await;
    create_session(&app, "b").await;

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({"video_path": "clip.mp4"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response["error"]["kind"].as_str().unwrap(),
        "capacity_exceeded"
    );
}

#[tokio::test]
async fn test_device_exhaustion_refuses_admission() {
    let app = router_with(10, 1, SyntheticEngine::new());
    create_session(&app, "holder").await;

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({"video_path": "clip.mp4"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response["error"]["kind"].as_str().unwrap(),
        "capacity_exceeded"
    );
}

#[tokio::test]
async fn test_explicit_device_request() {
    let app = router_with(10, 3, SyntheticEngine::new());

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({
            "video_path": "clip.mp4",
            "device_ids": ["cuda:1", "cuda:2"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        response["assigned_devices"],
        json!(["cuda:1", "cuda:2"])
    );

    // An id outside the pool is a request error, not an admission refusal.
    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({"video_path": "clip.mp4", "device_ids": ["cuda:9"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response["error"]["kind"].as_str().unwrap(),
        "invalid_request"
    );
}

#[tokio::test]
async fn test_session_status_fields() {
    let app = create_test_router();
    create_session(&app, "status-1").await;
    add_text_prompt(&app, "status-1", "a red car").await;

    let (status, response) =
        make_request(&app, Method::GET, "/api/v1/sessions/status-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["session_id"].as_str().unwrap(), "status-1");
    assert_eq!(response["status"].as_str().unwrap(), "ready");
    assert_eq!(response["current_objects"].as_u64().unwrap(), 1);
    assert_eq!(response["frames_processed"].as_u64().unwrap(), 0);
    assert_eq!(
        response["total_frames"].as_u64().unwrap(),
        u64::from(TEST_TOTAL_FRAMES)
    );
    assert!(response["device_memory_used_mb"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = create_test_router();

    let (status, response) =
        make_request(&app, Method::GET, "/api/v1/sessions/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"]["kind"].as_str().unwrap(), "not_found");
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("ghost")
    );
}

#[tokio::test]
async fn test_add_prompt_returns_initial_results() {
    let app = create_test_router();
    create_session(&app, "prompted").await;

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions/prompted/prompts",
        Some(json!({
            "frame_index": 2,
            "prompts": [
                {"type": "text", "text": "a dog"},
                {"type": "box", "box": [0.5, 0.5, 0.2, 0.2]}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["frame_index"].as_u64().unwrap(), 2);
    assert_eq!(response["object_ids"], json!([1, 2]));
    assert_eq!(response["masks"].as_array().unwrap().len(), 2);
    assert_eq!(response["boxes"].as_array().unwrap().len(), 2);
    assert_eq!(response["scores"].as_array().unwrap().len(), 2);
    assert_eq!(response["status"].as_str().unwrap(), "prompt_added");
}

#[tokio::test]
async fn test_add_prompt_validation_errors() {
    let app = create_test_router();
    create_session(&app, "strict").await;

    // Empty prompt list
    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions/strict/prompts",
        Some(json!({"frame_index": 0, "prompts": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response["error"]["kind"].as_str().unwrap(),
        "invalid_request"
    );

    // Frame beyond the video
    let (status, _) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions/strict/prompts",
        Some(json!({
            "frame_index": 999,
            "prompts": [{"type": "text", "text": "a dog"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Mismatched point labels
    let (status, _) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions/strict/prompts",
        Some(json!({
            "frame_index": 0,
            "prompts": [{"type": "point", "points": [[0.1, 0.1], [0.2, 0.2]], "point_labels": [1]}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refine_unknown_object_is_not_found() {
    let app = create_test_router();
    create_session(&app, "refine").await;

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions/refine/prompts",
        Some(json!({
            "frame_index": 0,
            "prompts": [{"type": "text", "text": "a dog"}],
            "object_id": 42
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"]["kind"].as_str().unwrap(), "not_found");
}

#[tokio::test]
async fn test_remove_object() {
    let app = create_test_router();
    create_session(&app, "removal").await;
    add_text_prompt(&app, "removal", "a cat").await;

    let (status, response) = make_request(
        &app,
        Method::DELETE,
        "/api/v1/sessions/removal/objects/1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["object_id"].as_u64().unwrap(), 1);
    assert_eq!(response["status"].as_str().unwrap(), "removed");

    let (status, _) = make_request(&app, Method::GET, "/api/v1/sessions/removal", None).await;
    assert_eq!(status, StatusCode::OK);

    // Removing it again is a scoped not-found.
    let (status, response) = make_request(
        &app,
        Method::DELETE,
        "/api/v1/sessions/removal/objects/1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"]["kind"].as_str().unwrap(), "not_found");
}

#[tokio::test]
async fn test_reset_clears_objects_and_returns_count() {
    let app = create_test_router();
    create_session(&app, "resettable").await;
    add_text_prompt(&app, "resettable", "one").await;
    add_text_prompt(&app, "resettable", "two").await;
    add_text_prompt(&app, "resettable", "three").await;

    let (status, response) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions/resettable/reset",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["objects_cleared"].as_u64().unwrap(), 3);
    assert_eq!(response["status"].as_str().unwrap(), "reset");

    let (_, response) =
        make_request(&app, Method::GET, "/api/v1/sessions/resettable", None).await;
    assert_eq!(response["current_objects"].as_u64().unwrap(), 0);
    assert_eq!(response["status"].as_str().unwrap(), "ready");
}

#[tokio::test]
async fn test_close_releases_devices_and_forgets_the_session() {
    let app = router_with(1, 1, SyntheticEngine::new());
    create_session(&app, "closeme").await;

    let (status, response) =
        make_request(&app, Method::DELETE, "/api/v1/sessions/closeme", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["devices_released"].as_u64().unwrap(), 1);
    assert!(response["memory_freed_mb"].as_f64().unwrap() > 0.0);

    let (status, _) = make_request(&app, Method::GET, "/api/v1/sessions/closeme", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Closing twice fails without touching anything.
    let (status, response) =
        make_request(&app, Method::DELETE, "/api/v1/sessions/closeme", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"]["kind"].as_str().unwrap(), "not_found");

    // Capacity and the single device are free for the very next create.
    create_session(&app, "successor").await;
}

#[tokio::test]
async fn test_list_sessions() {
    let app = create_test_router();
    create_session(&app, "list-b").await;
    create_session(&app, "list-a").await;
    add_text_prompt(&app, "list-a", "a bird").await;

    let (status, response) = make_request(&app, Method::GET, "/api/v1/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["total_sessions"].as_u64().unwrap(), 2);

    let sessions = response["sessions"].as_array().unwrap();
    assert_eq!(sessions[0]["session_id"].as_str().unwrap(), "list-a");
    assert_eq!(sessions[0]["objects_count"].as_u64().unwrap(), 1);
    assert_eq!(sessions[1]["session_id"].as_str().unwrap(), "list-b");
    assert!(sessions[0]["created_at"].is_string());
}

#[tokio::test]
async fn test_malformed_json_is_a_client_error() {
    let app = create_test_router();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/sessions")
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unknown_fields_are_rejected() {
    let app = create_test_router();

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/api/v1/sessions",
        Some(json!({"video_path": "clip.mp4", "surprise": true})),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = create_test_router();

    let (status, response) =
        make_request(&app, Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response["paths"]["/api/v1/sessions"].is_object());
}
