//! HTTP/1.1 client over Unix sockets
//!
//! Used for every host → applet call: health probes and the outbound bridges.
//! Connections are short-lived; nothing is pooled across sockets.

use applet_foundation::{Error, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri};
use std::path::Path;

/// Status and raw body of a channel response
#[derive(Debug, Clone)]
pub struct ChannelResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ChannelResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Client for applet private channels
#[derive(Clone)]
pub struct ChannelClient {
    client: Client<UnixConnector, Full<Bytes>>,
}

impl Default for ChannelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelClient {
    pub fn new() -> Self {
        Self {
            client: Client::unix(),
        }
    }

    pub async fn get(&self, socket_path: &Path, path: &str) -> Result<ChannelResponse> {
        self.request(socket_path, Method::GET, path, Bytes::new(), HeaderMap::new())
            .await
    }

    /// POST a JSON body with extra headers
    pub async fn post_json(
        &self,
        socket_path: &Path,
        path: &str,
        body: Vec<u8>,
        mut headers: HeaderMap,
    ) -> Result<ChannelResponse> {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.request(socket_path, Method::POST, path, Bytes::from(body), headers)
            .await
    }

    /// Arbitrary request against a Unix socket
    pub async fn request(
        &self,
        socket_path: &Path,
        method: Method,
        path: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> Result<ChannelResponse> {
        let mut request = Request::builder()
            .method(method)
            .uri(channel_uri(socket_path, path))
            .body(Full::new(body))
            .map_err(|e| Error::Http(format!("build applet request: {}", e)))?;
        request.headers_mut().extend(headers);
        self.send(request).await
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<ChannelResponse> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| Error::delivery(format!("dispatch request to applet: {}", e)))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::delivery(format!("read applet response: {}", e)))?
            .to_bytes();
        Ok(ChannelResponse {
            status,
            headers,
            body,
        })
    }
}

fn channel_uri(socket_path: &Path, path: &str) -> Uri {
    UnixUri::new(socket_path, path).into()
}
