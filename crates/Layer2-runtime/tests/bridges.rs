//! Host → applet calls over the private channel
//!
//! `cargo test -p applet-runtime --test bridges`

#![cfg(unix)]

mod common;

use applet_foundation::Error;
use common::*;
use hyper::header::{HeaderMap, HeaderValue};
use serde_json::json;

fn harness_with_event_log() -> (Harness, tempfile::TempDir, std::path::PathBuf) {
    let scratch = tempfile::tempdir().expect("tempdir");
    let event_log = scratch.path().join("events.log");
    let harness = Harness::with_config(|config| {
        config.with_env("ECHO_APPLET_EVENT_LOG", event_log.to_string_lossy())
    });
    (harness, scratch, event_log)
}

#[tokio::test]
async fn test_dispatch_job_starts_applet_and_posts_envelope() {
    let (harness, _scratch, event_log) = harness_with_event_log();

    harness
        .manager
        .dispatch_job(APPLET, "tenant-1", "42", "reports.build", &json!({"range": "7d"}))
        .await
        .expect("job accepted");

    let events = read_events(&event_log);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event["kind"], "job");
    assert_eq!(
        event["body"],
        json!({
            "jobId": "42",
            "method": "reports.build",
            "params": {"range": "7d"},
            "applet": APPLET,
            "tenantId": "tenant-1",
        })
    );
    assert_eq!(event["headers"]["x-tenant-id"], "tenant-1");
    assert_eq!(event["headers"]["x-request-id"], "job-42");
    assert_eq!(event["headers"]["content-type"], "application/json");

    harness.manager.shutdown(None).await.expect("shutdown");
}

#[tokio::test]
async fn test_dispatch_job_rejected_status_is_delivery_error() {
    let harness = Harness::new();

    let err = harness
        .manager
        .dispatch_job(APPLET, "tenant-1", "7", "job.reject", &json!(null))
        .await
        .expect_err("applet rejects the job");

    assert!(matches!(err, Error::Delivery(_)), "unexpected error: {}", err);
    assert!(err.to_string().contains("returned status 422"));

    harness.manager.shutdown(None).await.expect("shutdown");
}

#[tokio::test]
async fn test_websocket_event_encodes_data() {
    let (harness, _scratch, event_log) = harness_with_event_log();

    harness
        .manager
        .dispatch_websocket_event(APPLET, "tenant-1", "conn-9", "message", b"hello")
        .await
        .expect("event delivered");
    harness
        .manager
        .dispatch_websocket_event(APPLET, "tenant-1", "conn-9", "close", b"")
        .await
        .expect("event delivered");

    let events = read_events(&event_log);
    assert_eq!(events.len(), 2);

    assert_eq!(
        events[0]["body"],
        json!({
            "appletId": APPLET,
            "tenantId": "tenant-1",
            "connectionId": "conn-9",
            "event": "message",
            "dataBase64": "aGVsbG8=",
        })
    );
    assert_eq!(events[0]["headers"]["x-request-id"], "ws-conn-9");
    assert!(events[1]["body"].get("dataBase64").is_none());

    harness.manager.shutdown(None).await.expect("shutdown");
}

#[tokio::test]
async fn test_public_method_returns_result_and_filters_headers() {
    let harness = Harness::new();

    let mut caller = HeaderMap::new();
    caller.insert("x-tenant-id", HeaderValue::from_static("tenant-1"));
    caller.insert("x-user-id", HeaderValue::from_static("user-5"));
    caller.insert("cookie", HeaderValue::from_static("sid=abc"));
    caller.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

    let result = harness
        .manager
        .call_public_method(APPLET, "chat.list", br#"{"limit": 5}"#, &caller)
        .await
        .expect("public call");

    assert_eq!(result["method"], "chat.list");
    assert_eq!(result["params"], json!({"limit": 5}));
    assert_eq!(result["rpcId"], "host-forward");
    assert_eq!(result["appletId"], APPLET);

    let engine_socket = harness
        .manager
        .engine_socket_path()
        .expect("control plane is serving");
    assert_eq!(result["engineSocket"], json!(engine_socket.to_string_lossy()));

    let headers = &result["headers"];
    assert_eq!(headers["x-applet-id"], APPLET);
    assert_eq!(headers["x-tenant-id"], "tenant-1");
    assert_eq!(headers["x-user-id"], "user-5");
    assert_eq!(headers["cookie"], "sid=abc");
    assert!(headers.get("x-forwarded-for").is_none());

    harness.manager.shutdown(None).await.expect("shutdown");
}

#[tokio::test]
async fn test_public_method_null_params() {
    let harness = Harness::new();

    let result = harness
        .manager
        .call_public_method(APPLET, "chat.count", b"", &HeaderMap::new())
        .await
        .expect("public call");
    assert!(result["params"].is_null());

    harness.manager.shutdown(None).await.expect("shutdown");
}

#[tokio::test]
async fn test_public_method_error_is_preserved() {
    let harness = Harness::new();

    let err = harness
        .manager
        .call_public_method(APPLET, "echo.fail", b"null", &HeaderMap::new())
        .await
        .expect_err("applet returns an error object");

    let call = match err {
        Error::PublicCall(call) => call,
        other => panic!("expected a public call error, got {}", other),
    };
    assert_eq!(call.rpc_code(), &json!("forbidden"));
    assert_eq!(call.rpc_message(), "not allowed");
    assert_eq!(call.rpc_details(), &json!({"field": "x"}));

    harness.manager.shutdown(None).await.expect("shutdown");
}

#[tokio::test]
async fn test_public_method_transport_failures() {
    let harness = Harness::new();

    let err = harness
        .manager
        .call_public_method(APPLET, "echo.status", b"{}", &HeaderMap::new())
        .await
        .expect_err("non-2xx status");
    assert!(matches!(err, Error::Delivery(_)));
    assert!(err.to_string().contains("returned status 500"));

    let err = harness
        .manager
        .call_public_method(APPLET, "echo.garbage", b"{}", &HeaderMap::new())
        .await
        .expect_err("undecodable body");
    assert!(matches!(err, Error::Delivery(_)));

    let err = harness
        .manager
        .call_public_method(APPLET, "chat.list", b"{broken", &HeaderMap::new())
        .await
        .expect_err("invalid params");
    assert!(matches!(err, Error::InvalidInput(_)));

    harness.manager.shutdown(None).await.expect("shutdown");
}

#[tokio::test]
async fn test_bridge_to_unknown_applet_needs_entry_point() {
    let harness = Harness::new();

    let err = harness
        .manager
        .dispatch_job("unregistered", "tenant-1", "1", "noop", &json!({}))
        .await
        .expect_err("no entry point");
    assert!(matches!(err, Error::Config(_)), "unexpected error: {}", err);
    assert!(err.to_string().contains("entry point is required"));
}
