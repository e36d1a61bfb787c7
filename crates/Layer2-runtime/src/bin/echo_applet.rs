//! Minimal applet used by the integration tests.
//!
//! Serves the private channel on `$APPLET_SOCKET`. Behaviour is steered through
//! environment variables:
//!
//! - `ECHO_APPLET_SPAWN_LOG`: append the pid on every start
//! - `ECHO_APPLET_EVENT_LOG`: append every job / websocket envelope
//! - `ECHO_APPLET_CRASH_AFTER_MS`: exit with status 3 after the delay; with
//!   `ECHO_APPLET_CRASH_MARKER` only the first instance crashes
//! - `ECHO_APPLET_FAIL_IF_EXISTS`: exit immediately while this file exists
//! - `ECHO_APPLET_NEVER_HEALTHY`: answer 503 on `/__health`
//! - `ECHO_APPLET_IGNORE_SIGTERM`: swallow SIGTERM

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Fixture {
    applet_id: String,
    engine_socket: String,
    event_log: Option<PathBuf>,
    never_healthy: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    if let Some(path) = env_path("ECHO_APPLET_FAIL_IF_EXISTS") {
        if path.exists() {
            std::process::exit(1);
        }
    }

    let socket_path = env_path("APPLET_SOCKET").ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "APPLET_SOCKET is not set")
    })?;

    if let Some(log) = env_path("ECHO_APPLET_SPAWN_LOG") {
        append_line(&log, &std::process::id().to_string())?;
    }

    if std::env::var_os("ECHO_APPLET_IGNORE_SIGTERM").is_some() {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::spawn(async move { while sigterm.recv().await.is_some() {} });
    }

    if let Some(delay) = std::env::var("ECHO_APPLET_CRASH_AFTER_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        let first_run = match env_path("ECHO_APPLET_CRASH_MARKER") {
            Some(marker) if marker.exists() => false,
            Some(marker) => {
                std::fs::write(&marker, b"crashed")?;
                true
            }
            None => true,
        };
        if first_run {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                std::process::exit(3);
            });
        }
    }

    let fixture = Arc::new(Fixture {
        applet_id: std::env::var("APPLET_ID").unwrap_or_default(),
        engine_socket: std::env::var("APPLET_ENGINE_SOCKET").unwrap_or_default(),
        event_log: env_path("ECHO_APPLET_EVENT_LOG"),
        never_healthy: std::env::var_os("ECHO_APPLET_NEVER_HEALTHY").is_some(),
    });

    let app = Router::new()
        .route("/__health", get(health))
        .route("/__job", post(job))
        .route("/__public_rpc", post(public_rpc))
        .route("/__ws", post(websocket))
        .with_state(fixture);

    // a leftover file makes bind fail; clearing it is the runtime's job
    let listener = tokio::net::UnixListener::bind(&socket_path)?;
    axum::serve(listener, app).await
}

async fn health(State(fixture): State<Arc<Fixture>>) -> StatusCode {
    if fixture.never_healthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn job(
    State(fixture): State<Arc<Fixture>>,
    headers: HeaderMap,
    Json(envelope): Json<Value>,
) -> Response {
    if envelope["method"] == "job.reject" {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }
    record(&fixture, "job", &headers, envelope);
    Json(json!({"ok": true})).into_response()
}

async fn websocket(
    State(fixture): State<Arc<Fixture>>,
    headers: HeaderMap,
    Json(envelope): Json<Value>,
) -> Response {
    record(&fixture, "ws", &headers, envelope);
    Json(json!({"ok": true})).into_response()
}

async fn public_rpc(
    State(fixture): State<Arc<Fixture>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    let id = request["id"].clone();
    match request["method"].as_str().unwrap_or_default() {
        "echo.fail" => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": "forbidden", "message": "not allowed", "details": {"field": "x"}},
        }))
        .into_response(),
        "echo.status" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "echo.garbage" => "not json".into_response(),
        method => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "method": method,
                "params": request["params"],
                "rpcId": id,
                "appletId": fixture.applet_id,
                "engineSocket": fixture.engine_socket,
                "headers": header_map(&headers),
            },
        }))
        .into_response(),
    }
}

fn record(fixture: &Fixture, kind: &str, headers: &HeaderMap, envelope: Value) {
    let Some(log) = &fixture.event_log else {
        return;
    };
    let line = json!({"kind": kind, "headers": header_map(headers), "body": envelope});
    let _ = append_line(log, &line.to_string());
}

fn header_map(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_string(), Value::String(value.to_string()));
        }
    }
    Value::Object(map)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)
}
