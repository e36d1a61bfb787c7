//! Outbound call bridges - host → applet over the private channel
//!
//! Each bridge makes sure the applet is running, posts a JSON envelope to one of
//! its fixed endpoints and maps the outcome into the runtime error taxonomy.

use crate::client::ChannelResponse;
use crate::manager::AppletManager;
use crate::protocol::{
    HEADER_APPLET_ID, HEADER_REQUEST_ID, HEADER_TENANT_ID, PATH_JOB, PATH_PUBLIC_RPC,
    PATH_WEBSOCKET, PUBLIC_FORWARD_HEADERS,
};
use applet_foundation::{Error, PublicCallError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const PUBLIC_RPC_ID: &str = "host-forward";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobEnvelope<'a> {
    job_id: &'a str,
    method: &'a str,
    params: &'a Value,
    applet: &'a str,
    tenant_id: &'a str,
}

#[derive(Serialize)]
struct PublicRpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct PublicRpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<PublicRpcErrorBody>,
}

#[derive(Deserialize)]
struct PublicRpcErrorBody {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebsocketEnvelope<'a> {
    applet_id: &'a str,
    tenant_id: &'a str,
    connection_id: &'a str,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_base64: Option<String>,
}

impl AppletManager {
    /// Hand a background job to the applet's `/__job` endpoint
    pub async fn dispatch_job(
        &self,
        applet_id: &str,
        tenant_id: &str,
        job_id: &str,
        method: &str,
        params: &Value,
    ) -> Result<()> {
        let body = serde_json::to_vec(&JobEnvelope {
            job_id,
            method,
            params,
            applet: applet_id,
            tenant_id,
        })?;
        let headers = request_headers(tenant_id, &format!("job-{}", job_id))?;

        let response = self.post_to_applet(applet_id, PATH_JOB, body, headers).await?;
        expect_success(&response, "job")
    }

    /// Forward a public RPC call and return its `result`.
    ///
    /// An error object in the applet's response becomes [`Error::PublicCall`] with
    /// code, message and details preserved.
    pub async fn call_public_method(
        &self,
        applet_id: &str,
        method: &str,
        params: &[u8],
        caller_headers: &HeaderMap,
    ) -> Result<Value> {
        let params = decode_params(params)?;
        let body = serde_json::to_vec(&PublicRpcRequest {
            jsonrpc: "2.0",
            id: PUBLIC_RPC_ID,
            method,
            params,
        })?;
        let headers = forward_headers(applet_id, caller_headers)?;

        let response = self
            .post_to_applet(applet_id, PATH_PUBLIC_RPC, body, headers)
            .await?;
        expect_success(&response, "public rpc")?;

        let decoded: PublicRpcResponse = serde_json::from_slice(&response.body)
            .map_err(|e| Error::delivery(format!("decode applet public rpc response: {}", e)))?;
        if let Some(error) = decoded.error {
            debug!("Applet {} rejected {}: {}", applet_id, method, error.message);
            return Err(PublicCallError::new(error.code, error.message, error.details).into());
        }
        Ok(decoded.result)
    }

    /// Deliver a websocket event; `data` travels base64 encoded
    pub async fn dispatch_websocket_event(
        &self,
        applet_id: &str,
        tenant_id: &str,
        connection_id: &str,
        event: &str,
        data: &[u8],
    ) -> Result<()> {
        let body = serde_json::to_vec(&WebsocketEnvelope {
            applet_id,
            tenant_id,
            connection_id,
            event,
            data_base64: (!data.is_empty()).then(|| STANDARD.encode(data)),
        })?;
        let headers = request_headers(tenant_id, &format!("ws-{}", connection_id))?;

        let response = self
            .post_to_applet(applet_id, PATH_WEBSOCKET, body, headers)
            .await?;
        expect_success(&response, "websocket")
    }

    async fn post_to_applet(
        &self,
        applet_id: &str,
        path: &str,
        body: Vec<u8>,
        headers: HeaderMap,
    ) -> Result<ChannelResponse> {
        let process = self.ensure_started(applet_id, None).await?;
        let timeout = self.shared.config.call_timeout();
        let call = self
            .shared
            .client
            .post_json(&process.socket_path, path, body, headers);

        match tokio::time::timeout(timeout, call).await {
            Ok(response) => response,
            Err(_) => Err(Error::delivery(format!(
                "applet {:?} did not answer {} within {:?}",
                applet_id, path, timeout
            ))),
        }
    }
}

fn expect_success(response: &ChannelResponse, endpoint: &str) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(Error::delivery(format!(
            "applet {} endpoint returned status {}",
            endpoint,
            response.status.as_u16()
        )))
    }
}

/// Empty or `null` params become JSON null
fn decode_params(raw: &[u8]) -> Result<Value> {
    let trimmed = match std::str::from_utf8(raw) {
        Ok(text) => text.trim().as_bytes(),
        Err(_) => raw,
    };
    if trimmed.is_empty() || trimmed == b"null" {
        return Ok(Value::Null);
    }
    serde_json::from_slice(trimmed)
        .map_err(|e| Error::InvalidInput(format!("decode public rpc params: {}", e)))
}

fn request_headers(tenant_id: &str, request_id: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_TENANT_ID, header_value(tenant_id)?);
    headers.insert(HEADER_REQUEST_ID, header_value(request_id)?);
    Ok(headers)
}

/// `X-Applet-Id` plus the allow-listed caller headers that are present and non-blank
fn forward_headers(applet_id: &str, caller: &HeaderMap) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_APPLET_ID, header_value(applet_id)?);

    for name in PUBLIC_FORWARD_HEADERS {
        let Some(value) = caller.get(name) else {
            continue;
        };
        let blank = value
            .to_str()
            .map(|v| v.trim().is_empty())
            .unwrap_or(false);
        if !blank {
            headers.insert(HeaderName::from_static(name), value.clone());
        }
    }
    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::InvalidInput(format!("invalid header value {:?}", value)))
}
