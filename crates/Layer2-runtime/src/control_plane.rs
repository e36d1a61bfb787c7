//! Control plane - the host's own socket that applets call back into
//!
//! Routes:
//! - `POST /rpc` → external RPC dispatcher
//! - `POST /files/store`, `GET /files/get`, `DELETE /files/delete` → the file
//!   store registered for the calling applet

use crate::dispatch::{DispatchRequest, RpcDispatcher};
use crate::protocol::{
    HEADER_APPLET_ID, HEADER_CONTENT_TYPE, HEADER_FILE_NAME, HEADER_TENANT_ID, PATH_FILES_DELETE,
    PATH_FILES_GET, PATH_FILES_STORE, PATH_RPC,
};
use crate::storage::{FileContext, FileStore, FileStoreLookup};
use applet_foundation::{Error, Result};
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How long in-flight requests may drain after stop
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Body size limits
#[derive(Debug, Clone, Copy)]
pub struct ControlPlaneLimits {
    pub max_upload_bytes: usize,
    pub max_rpc_body_bytes: usize,
}

#[derive(Clone)]
struct ControlPlaneState {
    dispatcher: Arc<dyn RpcDispatcher>,
    stores: Weak<dyn FileStoreLookup>,
    limits: ControlPlaneLimits,
}

#[derive(Debug, Default, Deserialize)]
struct FileQuery {
    applet: Option<String>,
    name: Option<String>,
    id: Option<String>,
}

/// Running control-plane server
pub struct ControlPlane {
    socket_path: PathBuf,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ControlPlane {
    /// Bind `socket_path` and start serving in the background
    pub fn start(
        socket_path: &Path,
        dispatcher: Arc<dyn RpcDispatcher>,
        stores: Weak<dyn FileStoreLookup>,
        limits: ControlPlaneLimits,
    ) -> Result<Self> {
        let listener = bind(socket_path)?;
        let app = router(ControlPlaneState {
            dispatcher,
            stores,
            limits,
        });

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let path = socket_path.to_path_buf();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = served {
                error!("Control plane on {} failed: {}", path.display(), e);
            }
        });

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            shutdown,
            task,
        })
    }

    /// Stop accepting, give in-flight requests a moment, then drop the socket file
    pub async fn stop(self) {
        self.shutdown.cancel();
        let mut task = self.task;
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
            warn!("Control plane did not drain within {:?}, aborting", DRAIN_TIMEOUT);
            task.abort();
        }
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove control plane socket {}: {}",
                self.socket_path.display(),
                e
            ),
        }
        debug!("Control plane on {} stopped", self.socket_path.display());
    }
}

fn bind(socket_path: &Path) -> Result<tokio::net::UnixListener> {
    let listen_error =
        |e: std::io::Error| Error::ControlPlane(format!("listen on {}: {}", socket_path.display(), e));
    let listener = std::os::unix::net::UnixListener::bind(socket_path).map_err(listen_error)?;
    listener.set_nonblocking(true).map_err(listen_error)?;
    tokio::net::UnixListener::from_std(listener).map_err(listen_error)
}

fn router(state: ControlPlaneState) -> Router {
    Router::new()
        .route(PATH_RPC, post(handle_rpc))
        .route(PATH_FILES_STORE, post(handle_file_store))
        .route(PATH_FILES_GET, get(handle_file_get))
        .route(PATH_FILES_DELETE, delete(handle_file_delete))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_rpc(
    State(state): State<ControlPlaneState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let body = match read_limited(body, state.limits.max_rpc_body_bytes).await {
        Ok(body) => body,
        Err(status) => {
            let envelope = json!({
                "jsonrpc": "2.0",
                "error": {"code": -32600, "message": "Invalid Request"},
            });
            return (status, Json(envelope)).into_response();
        }
    };

    let response = state
        .dispatcher
        .dispatch(DispatchRequest { headers, body })
        .await;
    (response.status, Json(response.body)).into_response()
}

async fn handle_file_store(
    State(state): State<ControlPlaneState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let (store, ctx) = match state.resolve_store(&headers, &query) {
        Ok(resolved) => resolved,
        Err(message) => return text(StatusCode::BAD_REQUEST, message),
    };

    let payload = match read_limited(body, state.limits.max_upload_bytes).await {
        Ok(payload) => payload,
        Err(StatusCode::PAYLOAD_TOO_LARGE) => {
            return text(StatusCode::PAYLOAD_TOO_LARGE, "file too large")
        }
        Err(status) => return text(status, "failed to read payload"),
    };

    let name = header_or_query(&headers, HEADER_FILE_NAME, query.name.as_deref());
    let content_type = header_value(&headers, HEADER_CONTENT_TYPE)
        .or_else(|| header_value(&headers, header::CONTENT_TYPE.as_str()))
        .unwrap_or_default();

    match store.store(&ctx, &name, &content_type, payload).await {
        Ok(metadata) => json_ok(metadata),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_file_get(
    State(state): State<ControlPlaneState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Response {
    let (store, ctx) = match state.resolve_store(&headers, &query) {
        Ok(resolved) => resolved,
        Err(message) => return text(StatusCode::BAD_REQUEST, message),
    };
    let Some(id) = non_empty(query.id.as_deref()) else {
        return text(StatusCode::BAD_REQUEST, "missing id");
    };

    match store.get(&ctx, &id).await {
        Ok(metadata) => json_ok(metadata.unwrap_or(Value::Null)),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_file_delete(
    State(state): State<ControlPlaneState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Response {
    let (store, ctx) = match state.resolve_store(&headers, &query) {
        Ok(resolved) => resolved,
        Err(message) => return text(StatusCode::BAD_REQUEST, message),
    };
    let Some(id) = non_empty(query.id.as_deref()) else {
        return text(StatusCode::BAD_REQUEST, "missing id");
    };

    match store.delete(&ctx, &id).await {
        Ok(deleted) => json_ok(json!({ "ok": deleted })),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

impl ControlPlaneState {
    /// Caller identity and its registered backend, or a 400 message
    fn resolve_store(
        &self,
        headers: &HeaderMap,
        query: &FileQuery,
    ) -> std::result::Result<(Arc<dyn FileStore>, FileContext), String> {
        let applet_id = header_or_query(headers, HEADER_APPLET_ID, query.applet.as_deref());
        if applet_id.is_empty() {
            return Err("missing X-Applet-Id".to_string());
        }
        let tenant_id = header_value(headers, HEADER_TENANT_ID).unwrap_or_default();
        if tenant_id.is_empty() {
            return Err("missing X-Tenant-Id".to_string());
        }

        let store = self
            .stores
            .upgrade()
            .and_then(|lookup| lookup.file_store(&applet_id))
            .ok_or_else(|| format!("file store is not configured for applet {:?}", applet_id))?;

        Ok((
            store,
            FileContext {
                applet_id,
                tenant_id,
            },
        ))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Read at most `limit` bytes; 413 past the limit, 400 on other read failures
async fn read_limited(body: Body, limit: usize) -> std::result::Result<Bytes, StatusCode> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        if exceeded_limit(&e) {
            StatusCode::PAYLOAD_TOO_LARGE
        } else {
            StatusCode::BAD_REQUEST
        }
    })
}

fn exceeded_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = source {
        if e.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Trimmed header value, `None` when absent or blank
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn header_or_query(headers: &HeaderMap, name: &str, fallback: Option<&str>) -> String {
    header_value(headers, name)
        .or_else(|| non_empty(fallback))
        .unwrap_or_default()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn text(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

fn json_ok(payload: Value) -> Response {
    (StatusCode::OK, Json(payload)).into_response()
}
