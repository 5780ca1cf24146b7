use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tourops_api::metrics::QueueMetrics;
use tourops_api::middleware::OperatorClaims;
use tourops_api::state::{AppState, AuthConfig};
use tourops_api::app;
use tourops_core::{paths, ConnectivityMonitor, MemoryStore, RealtimeStore};
use tourops_store::EventBus;
use tourops_sync::{MemoryQueueStorage, SyncEngine, SyncSettings};
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

async fn setup() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store
        .write(
            &paths::tour_bookings("T1").unwrap(),
            json!({
                "BK1": {"passengerNames": ["Ana", "Bo"], "seatNumbers": ["1A", "1B"],
                        "pickupPoints": [{"location": "Pier", "time": "08:00"}]}
            }),
        )
        .await
        .unwrap();
    store
        .write(&paths::tour("T1").unwrap(), json!({"currentParticipants": 0}))
        .await
        .unwrap();

    let events = EventBus::default();
    let connectivity = Arc::new(ConnectivityMonitor::default());
    let engine = SyncEngine::new(
        store.clone(),
        connectivity.clone(),
        Arc::new(MemoryQueueStorage::new()),
        Arc::new(events.clone()),
        SyncSettings::default(),
    )
    .await
    .unwrap();

    let state = AppState {
        engine: Arc::new(engine),
        connectivity,
        events,
        metrics: Arc::new(QueueMetrics::new().unwrap()),
        auth: AuthConfig {
            secret: SECRET.to_string(),
        },
    };
    (app(state), store)
}

fn token(sub: &str, role: &str) -> String {
    let claims = OperatorClaims {
        sub: sub.to_string(),
        role: role.to_string(),
        exp: 4_102_444_800,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    request_as("driver-7", method, uri, body)
}

fn request_as(sub: &str, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token(sub, "DRIVER")));
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn test_requires_field_operator_token() {
    let (app, _) = setup().await;

    let anonymous = Request::builder()
        .uri("/v1/tours/T1/manifest")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, anonymous).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong_role = Request::builder()
        .uri("/v1/tours/T1/manifest")
        .header("Authorization", format!("Bearer {}", token("ops-1", "ADMIN")))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong_role).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_update_writes_through_and_shows_in_manifest() {
    let (app, store) = setup().await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/v1/tours/T1/manifest/BK1",
            Some(json!({"passengerStates": ["BOARDED", "NO_SHOW"], "lastUpdated": 1_000})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["queued"], false);
    assert_eq!(body["status"], "PARTIAL");

    let entry = store
        .read(&paths::manifest_entry("T1", "BK1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry["updatedBy"], "driver-7");

    let (status, manifest) = send(&app, request("GET", "/v1/tours/T1/manifest", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(manifest["stats"], json!({"totalPax": 2, "checkedIn": 1, "noShows": 1}));
    assert_eq!(manifest["bookings"][0]["bookingRef"], "BK1");
}

#[tokio::test]
async fn test_offline_updates_queue_then_replay() {
    let (app, store) = setup().await;

    let (_, body) = send(
        &app,
        request("PUT", "/v1/session/connectivity", Some(json!({"online": false}))),
    )
    .await;
    assert_eq!(body, json!({"online": false, "changed": true}));

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/v1/tours/T1/manifest/BK1",
            Some(json!({"passengerStates": ["BOARDED", "BOARDED"], "idempotencyKey": "mu_offline_1"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queued"], true);
    assert_eq!(body["idempotencyKey"], "mu_offline_1");

    let (_, actions) = send(&app, request("GET", "/v1/sync/actions", None)).await;
    assert_eq!(actions["data"].as_array().unwrap().len(), 1);
    assert_eq!(actions["data"][0]["status"], "queued");
    assert_eq!(actions["data"][0]["type"], "MANIFEST_UPDATE");
    assert!(store
        .read(&paths::manifest_entry("T1", "BK1").unwrap())
        .await
        .unwrap()
        .is_none());

    send(
        &app,
        request("PUT", "/v1/session/connectivity", Some(json!({"online": true}))),
    )
    .await;
    let (status, replay) = send(&app, request("POST", "/v1/sync/replay", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["summary"]["synced"], 1);

    let entry = store
        .read(&paths::manifest_entry("T1", "BK1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry["status"], "BOARDED");
}

#[tokio::test]
async fn test_replayed_update_keeps_its_author() {
    let (app, store) = setup().await;
    send(
        &app,
        request_as("driver-a", "PUT", "/v1/session/connectivity", Some(json!({"online": false}))),
    )
    .await;
    send(
        &app,
        request_as(
            "driver-a",
            "POST",
            "/v1/tours/T1/manifest/BK1",
            Some(json!({"passengerStates": ["BOARDED", "BOARDED"]})),
        ),
    )
    .await;

    // A different driver brings the device back online and drains the queue.
    send(
        &app,
        request_as("driver-b", "PUT", "/v1/session/connectivity", Some(json!({"online": true}))),
    )
    .await;
    let (_, replay) = send(&app, request_as("driver-b", "POST", "/v1/sync/replay", None)).await;
    assert_eq!(replay["summary"]["synced"], 1);

    let entry = store
        .read(&paths::manifest_entry("T1", "BK1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry["updatedBy"], "driver-a");
}

#[tokio::test]
async fn test_invalid_passenger_state_is_rejected() {
    let (app, _) = setup().await;
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/v1/tours/T1/manifest/BK1",
            Some(json!({"passengerStates": ["BOARDED", "LATE"]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("LATE"));
}

#[tokio::test]
async fn test_join_tour_counts_once() {
    let (app, _) = setup().await;

    let (status, first) = send(&app, request("POST", "/v1/tours/T1/join", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, json!({"currentParticipants": 1, "alreadyJoined": false}));

    let (_, second) = send(&app, request("POST", "/v1/tours/T1/join", None)).await;
    assert_eq!(second, json!({"currentParticipants": 1, "alreadyJoined": true}));

    let (status, _) = send(&app, request("POST", "/v1/tours/NOPE/join", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_are_public() {
    let (app, _) = setup().await;
    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("tourops_queue_total 0"));
}
