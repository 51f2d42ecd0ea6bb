use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use handreceipt_core::{CredentialKey, CustodyEngine, EngineConfig, InMemoryCustodyStore};
use handreceipt_ledger::{AuditLedgerRecorder, InMemoryLedger, RecorderConfig};
use handreceipt_server::{AppState, create_app};
use handreceipt_storage::{RedbCustodyStore, RedbStorageConfig};
use tempfile::TempDir;

const ALICE: u64 = 1;
const BOB: u64 = 2;
const CAROL: u64 = 3;

struct TestApp {
    app: Router,
    recorder: Arc<AuditLedgerRecorder<InMemoryCustodyStore, InMemoryLedger>>,
}

fn test_app() -> TestApp {
    let store = Arc::new(InMemoryCustodyStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let recorder = Arc::new(AuditLedgerRecorder::new(
        store.clone(),
        ledger.clone(),
        RecorderConfig::default(),
    ));
    let engine = CustodyEngine::new(
        store,
        CredentialKey::derive(b"api-test-secret"),
        EngineConfig::default(),
    );
    TestApp {
        app: create_app(AppState::new(Arc::new(engine), ledger)),
        recorder,
    }
}

async fn send(app: &Router, method: Method, uri: &str, user: Option<u64>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

/// Registers a rifle with one optic slot and an optic, both held by Alice.
async fn rifle_and_optic(app: &Router) -> (u64, u64) {
    let (status, rifle) = send(
        app,
        Method::POST,
        "/properties",
        Some(ALICE),
        Some(json!({
            "serialNumber": "RIFLE-001",
            "name": "M4",
            "category": "rifle",
            "isAttachable": true,
            "attachmentPoints": [
                {"name": "rail-top", "capacity": 1, "accepts": ["optic"]}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, optic) = send(
        app,
        Method::POST,
        "/properties",
        Some(ALICE),
        Some(json!({"serialNumber": "OPTIC-7", "name": "ACOG", "category": "optic"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    (
        rifle["id"].as_u64().unwrap(),
        optic["id"].as_u64().unwrap(),
    )
}

// ============================================================================
// Identity and errors
// ============================================================================

#[tokio::test]
async fn test_health_needs_no_identity() {
    let t = test_app();
    let (status, body) = send(&t.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn test_missing_user_is_unauthorized() {
    let t = test_app();
    let (status, body) = send(&t.app, Method::GET, "/transfer-requests", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/transfer-requests")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_property_is_not_found() {
    let t = test_app();
    let (status, body) = send(&t.app, Method::GET, "/properties/99", Some(ALICE), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "property_not_found");
    assert_eq!(body["kind"], "not_found");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_trace_id_echoed() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(
                    "traceparent",
                    "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-trace-id").unwrap(),
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
}

// ============================================================================
// Attachments
// ============================================================================

#[tokio::test]
async fn test_attach_list_and_detach() {
    let t = test_app();
    let (rifle, optic) = rifle_and_optic(&t.app).await;

    let (status, available) = send(
        &t.app,
        Method::GET,
        &format!("/properties/{rifle}/available-components?ownerId={ALICE}"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(available.as_array().unwrap().len(), 1);
    assert_eq!(available[0]["id"], optic);

    let (status, edge) = send(
        &t.app,
        Method::POST,
        &format!("/properties/{rifle}/components"),
        Some(ALICE),
        Some(json!({"componentId": optic, "slot": "rail-top"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(edge["slot"], "rail-top");
    assert_eq!(edge["kind"], "field");

    let (status, body) = send(
        &t.app,
        Method::POST,
        &format!("/properties/{rifle}/components"),
        Some(ALICE),
        Some(json!({"componentId": optic})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_attached");
    assert_eq!(body["retryable"], true);

    let (_, components) = send(
        &t.app,
        Method::GET,
        &format!("/properties/{rifle}/components"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(components.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &t.app,
        Method::DELETE,
        &format!("/properties/{rifle}/components/{optic}"),
        Some(BOB),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &t.app,
        Method::DELETE,
        &format!("/properties/{rifle}/components/{optic}"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_self_reference_is_unprocessable() {
    let t = test_app();
    let (rifle, _) = rifle_and_optic(&t.app).await;
    let (status, body) = send(
        &t.app,
        Method::POST,
        &format!("/properties/{rifle}/components"),
        Some(ALICE),
        Some(json!({"componentId": rifle})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "self_reference");
    assert_eq!(body["kind"], "precondition");
}

// ============================================================================
// Transfers
// ============================================================================

#[tokio::test]
async fn test_qr_handover_over_http() {
    let t = test_app();
    let (rifle, optic) = rifle_and_optic(&t.app).await;
    send(
        &t.app,
        Method::POST,
        &format!("/properties/{rifle}/components"),
        Some(ALICE),
        Some(json!({"componentId": optic, "slot": "rail-top"})),
    )
    .await;

    let (status, issued) = send(
        &t.app,
        Method::POST,
        &format!("/properties/{rifle}/qr-credential"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let payload = issued["payload"].as_str().unwrap().to_string();

    let (status, verified) = send(
        &t.app,
        Method::POST,
        "/credentials/verify",
        Some(BOB),
        Some(json!({"payload": payload})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["propertyId"], rifle);
    assert_eq!(verified["holderId"], ALICE);

    let (status, request) = send(
        &t.app,
        Method::POST,
        "/transfer-requests",
        Some(BOB),
        Some(json!({
            "subjectId": rifle,
            "method": "qr-scan",
            "includeComponents": true,
            "credential": payload
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");
    assert_eq!(request["destination"], BOB);
    let id = request["id"].as_u64().unwrap();

    let (status, approved) = send(
        &t.app,
        Method::POST,
        &format!("/transfer-requests/{id}/approve"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["resolvedBy"], ALICE);

    for property in [rifle, optic] {
        let (_, item) = send(
            &t.app,
            Method::GET,
            &format!("/properties/{property}"),
            Some(BOB),
            None,
        )
        .await;
        assert_eq!(item["holder"], BOB);
        assert_eq!(item["status"], "active");
    }

    // A second approval is a conflict, not a silent success.
    let (status, body) = send(
        &t.app,
        Method::POST,
        &format!("/transfer-requests/{id}/approve"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_resolved");

    t.recorder.flush().await.unwrap();
    let (status, history) = send(
        &t.app,
        Method::GET,
        &format!("/properties/{optic}/history"),
        Some(BOB),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<String> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["event"]["kind"].as_object().unwrap().keys().next().unwrap().clone())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "PropertyRegistered",
            "ComponentAttached",
            "OwnershipChanged",
            "TransferApproved"
        ]
    );
}

#[tokio::test]
async fn test_stale_credential_after_handover() {
    let t = test_app();
    let (rifle, _) = rifle_and_optic(&t.app).await;

    let (_, issued) = send(
        &t.app,
        Method::POST,
        &format!("/properties/{rifle}/qr-credential"),
        Some(ALICE),
        None,
    )
    .await;
    let payload = issued["payload"].as_str().unwrap().to_string();

    let (_, request) = send(
        &t.app,
        Method::POST,
        "/transfer-requests",
        Some(ALICE),
        Some(json!({"subjectId": rifle, "method": "offer", "destinationUserId": CAROL})),
    )
    .await;
    let id = request["id"].as_u64().unwrap();
    send(
        &t.app,
        Method::POST,
        &format!("/transfer-requests/{id}/approve"),
        Some(ALICE),
        None,
    )
    .await;

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/transfer-requests",
        Some(BOB),
        Some(json!({"subjectId": rifle, "method": "qr-scan", "credential": payload})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "stale_credential");
    assert_eq!(body["kind"], "staleness");
}

#[tokio::test]
async fn test_request_by_serial_then_cancel() {
    let t = test_app();
    rifle_and_optic(&t.app).await;

    let (status, request) = send(
        &t.app,
        Method::POST,
        "/transfer-requests",
        Some(BOB),
        Some(json!({"serialNumber": "OPTIC-7", "method": "manual-request", "notes": "range day"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["notes"], "range day");
    let id = request["id"].as_u64().unwrap();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/transfer-requests",
        Some(CAROL),
        Some(json!({"serialNumber": "OPTIC-7", "method": "manual-request"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_pending_request");

    let (status, _) = send(
        &t.app,
        Method::POST,
        &format!("/transfer-requests/{id}/cancel"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = send(
        &t.app,
        Method::POST,
        &format!("/transfer-requests/{id}/cancel"),
        Some(BOB),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (_, mine) = send(&t.app, Method::GET, "/transfer-requests", Some(BOB), None).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let (_, fetched) = send(
        &t.app,
        Method::GET,
        &format!("/transfer-requests/{id}"),
        Some(BOB),
        None,
    )
    .await;
    assert_eq!(fetched["status"], "cancelled");
}

#[tokio::test]
async fn test_self_transfer_rejected() {
    let t = test_app();
    let (rifle, _) = rifle_and_optic(&t.app).await;
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/transfer-requests",
        Some(ALICE),
        Some(json!({"subjectId": rifle, "method": "manual-request"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "self_transfer");
}

#[tokio::test]
async fn test_redb_backend_serves_same_routes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        RedbCustodyStore::open(RedbStorageConfig {
            db_path: dir.path().join("handreceipt.redb"),
            ..Default::default()
        })
        .unwrap(),
    );
    let engine = CustodyEngine::new(
        store,
        CredentialKey::derive(b"api-test-secret"),
        EngineConfig::default(),
    );
    let app = create_app(AppState::new(
        Arc::new(engine),
        Arc::new(InMemoryLedger::new()),
    ));

    let (rifle, optic) = rifle_and_optic(&app).await;
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/properties/{rifle}/components"),
        Some(ALICE),
        Some(json!({"componentId": optic, "slot": "rail-top"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, edge) = send(
        &app,
        Method::PUT,
        &format!("/properties/{rifle}/components/{optic}"),
        Some(ALICE),
        Some(json!({"slot": "rail-side"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(edge["error"], "invalid_slot");

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/properties/{optic}/retire"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "property_in_use");
}
