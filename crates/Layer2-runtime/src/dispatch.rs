//! RPC dispatcher seam
//!
//! The method registry and its dispatcher are external collaborators. The control
//! plane hands `/rpc` requests to whatever implements [`RpcDispatcher`] and writes
//! back its response untouched.

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use serde_json::{json, Value};

/// JSON-RPC "parse error"
pub const CODE_PARSE_ERROR: i64 = -32700;

/// JSON-RPC "method not found"
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;

/// Raw request as received on the control plane
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response written back verbatim as JSON
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl DispatchResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }
}

#[async_trait]
pub trait RpcDispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse;
}

/// Dispatcher with no registered methods. Every call gets a JSON-RPC error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatcher;

#[async_trait]
impl RpcDispatcher for NullDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse {
        let payload: Value = match serde_json::from_slice(&request.body) {
            Ok(payload) => payload,
            Err(_) => {
                return DispatchResponse {
                    status: StatusCode::BAD_REQUEST,
                    body: rpc_error(Value::Null, CODE_PARSE_ERROR, "parse error"),
                }
            }
        };
        let id = payload.get("id").cloned().unwrap_or(Value::Null);
        let method = payload
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        DispatchResponse::ok(rpc_error(
            id,
            CODE_METHOD_NOT_FOUND,
            &format!("method not found: {}", method),
        ))
    }
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> DispatchRequest {
        DispatchRequest {
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn test_null_dispatcher_method_not_found() {
        let response = NullDispatcher
            .dispatch(request(r#"{"id": 7, "method": "bichat.ping"}"#))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["id"], json!(7));
        assert_eq!(response.body["error"]["code"], json!(CODE_METHOD_NOT_FOUND));
        assert_eq!(
            response.body["error"]["message"],
            json!("method not found: bichat.ping")
        );
    }

    #[tokio::test]
    async fn test_null_dispatcher_parse_error() {
        let response = NullDispatcher.dispatch(request("{")).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"]["code"], json!(CODE_PARSE_ERROR));
    }
}
