//! HTTP API endpoint tests.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use hearth::api::{build_router, create_api_state};
use hearth::{Broadcaster, EventBus, InMemoryStorage, TimerEngine};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn router() -> Router {
    let engine = TimerEngine::new(Arc::new(InMemoryStorage::new()), Arc::new(EventBus::new()));
    let state = create_api_state(engine, Arc::new(Broadcaster::default()));
    build_router(state)
}

async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_timer(app: &Router, label: &str, duration: i64) -> Value {
    let (status, body) = request(
        app,
        Method::POST,
        "/api/timers",
        Some(json!({"label": label, "duration": duration})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = router();
    let (status, body) = request(&app, Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_create_timer_returns_pending_record() {
    let app = router();
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/timers",
        Some(json!({
            "label": "Pasta",
            "description": "rolling boil",
            "duration": 600
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["label"], "Pasta");
    assert_eq!(body["description"], "rolling boil");
    assert_eq!(body["duration"], 600);
    assert_eq!(body["state"], "pending");
    assert!(body["startTime"].is_null());
    assert!(body["endTime"].is_null());
    assert!(body["id"].is_string());
}

#[tokio::test]
async fn test_create_timer_rejects_bad_input() {
    let app = router();

    let (status, body) = request(
        &app,
        Method::POST,
        "/api/timers",
        Some(json!({"label": "Pasta", "duration": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = request(
        &app,
        Method::POST,
        "/api/timers",
        Some(json!({"label": "   ", "duration": 60})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_timers_with_state_filter() {
    let app = router();
    let a = create_timer(&app, "A", 60).await;
    create_timer(&app, "B", 60).await;

    let id = a["id"].as_str().unwrap();
    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/api/timers/{}/start", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, Method::GET, "/api/timers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) = request(&app, Method::GET, "/api/timers?state=running", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["timers"][0]["label"], "A");

    let (status, body) =
        request(&app, Method::GET, "/api/timers?state=pending,running", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) = request(&app, Method::GET, "/api/timers?state=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_get_timer_not_found() {
    let app = router();

    // A well-formed but unknown id and a malformed one both 404.
    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/timers/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = request(&app, Method::GET, "/api/timers/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lifecycle_actions_over_http() {
    let app = router();
    let timer = create_timer(&app, "Tea", 300).await;
    let id = timer["id"].as_str().unwrap().to_string();

    // Start with a duration override in the body.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/timers/{}/start", id),
        Some(json!({"duration": 120})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");
    assert_eq!(body["duration"], 120);
    assert!(body["endTime"].is_string());

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/timers/{}/add-time", id),
        Some(json!({"seconds": 60})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duration"], 180);

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/timers/{}/pause", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "paused");
    assert!(body["endTime"].is_null());

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/timers/{}/unpause", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/timers/{}/finish", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "finished");
}

#[tokio::test]
async fn test_illegal_transition_conflicts() {
    let app = router();
    let timer = create_timer(&app, "Tea", 300).await;
    let id = timer["id"].as_str().unwrap().to_string();

    // Pausing a pending timer is rejected.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/timers/{}/pause", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_second_cancel_conflicts_over_http() {
    let app = router();
    let timer = create_timer(&app, "Laundry", 2700).await;
    let id = timer["id"].as_str().unwrap().to_string();
    let uri = format!("/api/timers/{}/cancel", id);

    let (status, body) = request(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "canceled");

    let (status, body) = request(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_recipient_management() {
    let app = router();
    let timer = create_timer(&app, "Roast", 5400).await;
    let id = timer["id"].as_str().unwrap().to_string();
    let uri = format!("/api/timers/{}/recipients", id);

    let registration = json!({
        "userId": "alice",
        "deviceId": "phone",
        "channel": "webpush",
        "target": "default"
    });

    let (status, body) = request(&app, Method::POST, &uri, Some(registration.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "alice");
    let recipient_id = body["id"].as_str().unwrap().to_string();

    // Same registration again conflicts.
    let (status, body) = request(&app, Method::POST, &uri, Some(registration)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, body) = request(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _) = request(
        &app,
        Method::DELETE,
        &format!("/api/recipients/{}", recipient_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &app,
        Method::DELETE,
        &format!("/api/recipients/{}", recipient_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = request(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_recipients_for_unknown_timer_not_found() {
    let app = router();
    let (status, _) = request(
        &app,
        Method::GET,
        &format!("/api/timers/{}/recipients", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_prune_endpoint() {
    let app = router();
    let keep = create_timer(&app, "Keep", 60).await;
    let drop = create_timer(&app, "Drop", 60).await;

    let drop_id = drop["id"].as_str().unwrap().to_string();
    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/api/timers/{}/cancel", drop_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Cutoff in the future sweeps every terminal timer.
    let cutoff = Utc::now() + Duration::hours(1);
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/timers/prune",
        Some(json!({"cutoff": cutoff.to_rfc3339()})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pruned"], 1);

    let (status, body) = request(&app, Method::GET, "/api/timers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["timers"][0]["id"], keep["id"]);
}
