//! Integration tests for gopher-burrow API endpoints

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

/// Test helper: router over a fresh in-memory catalog
async fn create_test_app() -> Router {
    gopher_burrow::build_router(memory_state(Default::default()).await)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn submit(app: &Router, report: &gopher_common::api::ScanReport) -> (StatusCode, Value) {
    send(app, "POST", "/scan-reports", Some(serde_json::to_value(report).unwrap())).await
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;

    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "gopher-burrow");
    assert_eq!(json["catalog"]["locations"], 0);

    let (status, _) = send(&app, "GET", "/health/status", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_submit_report_and_read_image() {
    let app = create_test_app().await;
    let photo = report("S1", "sess-1", at(0), vec![entry("/photos/a.jpg", b"photo")]);

    let (status, json) = submit(&app, &photo).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["created"], 1);
    assert_eq!(json["entries"][0]["status"], "created");
    assert!(json.get("error").is_none());

    let hex = fp(b"photo").to_hex();
    let (status, json) = send(&app, "GET", &format!("/images/{}", hex), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fingerprint"], hex);
    assert_eq!(json["status"], "new");
    assert_eq!(json["locations"][0]["path"], "/photos/a.jpg");

    let (status, json) = send(&app, "GET", &format!("/images/{}/locations", hex), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    // Replay, then the audit trail shows both submissions
    let (_, json) = submit(&app, &photo).await;
    assert_eq!(json["entries"][0]["status"], "updated");
    let (status, json) = send(&app, "GET", "/scan-reports/S1/sess-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["submissions"], 2);
}

#[tokio::test]
async fn test_malformed_report_rejected() {
    let app = create_test_app().await;

    let (status, json) = send(&app, "POST", "/scan-reports", Some(json!({"scanner_id": "S1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "malformed-report");
    assert_eq!(json["error"]["retryable"], false);

    let relative = report("S1", "sess-1", at(0), vec![entry("photos/a.jpg", b"photo")]);
    let (status, json) = submit(&app, &relative).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "malformed-report");

    let (status, _) = send(&app, "GET", "/scan-reports/S1/sess-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_partial_failure_is_multi_status() {
    let app = create_test_app().await;
    let mut broken = fingerprint_entry("/photos/gone.jpg", fp(b"gone"), 4);
    broken.bytes_ref = Some("/nonexistent/gopher/gone.jpg".to_string());
    let batch = report("S1", "sess-1", at(0), vec![entry("/photos/a.jpg", b"photo"), broken]);

    let (status, json) = submit(&app, &batch).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(json["error"]["code"], "entry-error");
    assert_eq!(json["created"], 1);
    assert_eq!(json["entries"][1]["status"], "error");
    assert_eq!(json["entries"][1]["error"]["code"], "unreadable-input");
}

#[tokio::test]
async fn test_failed_missing_detection_is_multi_status() {
    let state = memory_state(Default::default()).await;
    let app = gopher_burrow::build_router(state.clone());
    submit(&app, &report("S1", "sess-1", at(0), vec![entry("/a.jpg", b"a"), entry("/b.jpg", b"b")])).await;

    refuse_missing_flags(&state).await;
    let (status, json) = submit(&app, &report("S1", "sess-2", at(60), vec![entry("/b.jpg", b"b")])).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(json["error"]["code"], "missing-detection-failed");
    assert_eq!(json["error"]["retryable"], true);
    assert_eq!(json["missing_detection_error"]["code"], "storage-unavailable");
    assert_eq!(json["updated"], 1);

    let (_, json) = send(&app, "GET", "/health", None).await;
    assert!(json["last_error"].as_str().unwrap().contains("Missing detection failed"));
}

#[tokio::test]
async fn test_image_lookup_errors() {
    let app = create_test_app().await;

    let (status, json) = send(&app, "GET", &format!("/images/{}", fp(b"nothing").to_hex()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not-found");

    let (status, json) = send(&app, "GET", "/images/not-hex", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad-request");
}

#[tokio::test]
async fn test_tag_endpoints_are_idempotent() {
    let app = create_test_app().await;
    submit(&app, &report("S1", "sess-1", at(0), vec![entry("/photos/a.jpg", b"photo")])).await;
    let hex = fp(b"photo").to_hex();
    let tags_uri = format!("/images/{}/tags", hex);

    let (status, json) = send(&app, "POST", &tags_uri, Some(json!({"tag": " Beach "}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tag"], "beach");
    assert_eq!(json["changed"], true);
    let (_, json) = send(&app, "POST", &tags_uri, Some(json!({"tag": "beach"}))).await;
    assert_eq!(json["changed"], false);

    let (status, json) = send(&app, "GET", "/tags/beach/images?page=1&page_size=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["images"], json!([hex]));
    assert_eq!(json["total"], 1);

    let (_, json) = send(&app, "GET", "/tags", None).await;
    assert_eq!(json[0]["name"], "beach");
    assert_eq!(json[0]["images"], 1);

    let (status, json) = send(&app, "DELETE", &format!("{}/beach", tags_uri), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["changed"], true);
    let (status, json) = send(&app, "DELETE", &format!("{}/beach", tags_uri), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["changed"], false);

    let (status, json) = send(&app, "POST", &tags_uri, Some(json!({"tag": ":"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid-tag");

    let (status, json) = send(&app, "GET", "/tags/unknown/images", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["images"], json!([]));
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn test_merge_endpoint() {
    let app = create_test_app().await;
    submit(
        &app,
        &report("S1", "sess-1", at(0), vec![entry("/a.jpg", b"a"), entry("/b.jpg", b"b")]),
    )
    .await;
    let a = fp(b"a").to_hex();
    let b = fp(b"b").to_hex();

    let (status, json) = send(&app, "POST", "/images/merge", Some(json!({"from": a, "to": a}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["code"], "self-merge");

    let (status, json) = send(
        &app,
        "POST",
        "/images/merge",
        Some(json!({"from": a, "to": b, "reason": "burst shot"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "merged");
    assert_eq!(json["into"], b);
    assert_eq!(json["reason"], "burst shot");

    let (_, json) = send(&app, "POST", "/images/merge", Some(json!({"from": a, "to": b}))).await;
    assert_eq!(json["outcome"], "already-merged");

    let (status, json) = send(&app, "POST", "/images/merge", Some(json!({"from": b, "to": a}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["code"], "cycle-detected");

    // The merged fingerprint answers with the survivor
    let (_, json) = send(&app, "GET", &format!("/images/{}", a), None).await;
    assert_eq!(json["fingerprint"], b);
    assert_eq!(json["locations"].as_array().unwrap().len(), 2);

    let (_, json) = send(&app, "GET", &format!("/images/{}/merges", b), None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["from"], a);
}

#[tokio::test]
async fn test_cancel_without_inflight_session() {
    let app = create_test_app().await;
    let (status, json) = send(&app, "DELETE", "/scan-reports/S1/sess-9", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cancelled"], false);
}

#[tokio::test]
async fn test_library_endpoints() {
    let app = create_test_app().await;

    let (status, json) = send(&app, "POST", "/libraries", Some(json!({"path": "/photos/", "scanner_id": "S1"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["path"], "/photos");

    let (status, json) = send(&app, "POST", "/libraries", Some(json!({"path": "/photos"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "conflict");

    let (_, json) = send(&app, "POST", "/libraries/validate", Some(json!({"path": "/photos/2024"}))).await;
    assert_eq!(json["valid"], false);
    let (_, json) = send(&app, "POST", "/libraries/validate", Some(json!({"path": "/scans"}))).await;
    assert_eq!(json["valid"], true);

    let (_, json) = send(&app, "GET", "/libraries", None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_scan_interval_setting() {
    let app = create_test_app().await;

    let (_, json) = send(&app, "GET", "/settings/scan-interval", None).await;
    assert_eq!(json["interval"], 60);

    let (status, json) = send(&app, "POST", "/settings/scan-interval", Some(json!({"interval": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad-request");

    let (status, _) = send(&app, "POST", "/settings/scan-interval", Some(json!({"interval": 32768}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, "POST", "/settings/scan-interval", Some(json!({"interval": 30}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["interval"], 30);
    let (_, json) = send(&app, "GET", "/settings/scan-interval", None).await;
    assert_eq!(json["interval"], 30);
}
