//! HTTP client whose calls run through the interceptor

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::recording::Coordinator;
use crate::{Result, TraceError};

use super::Interceptor;

/// HTTP client for instrumented applications
///
/// Response bodies are buffered in full so they can be recorded and still
/// handed back to the caller unchanged.
pub struct RecordingClient {
    client: Client<HttpConnector, Full<Bytes>>,
    interceptor: Interceptor,
}

impl RecordingClient {
    /// Create a client recording into `coordinator`
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self {
            client,
            interceptor: Interceptor::new(coordinator),
        }
    }

    /// Interceptor wrapping this client
    #[must_use]
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// Send a request
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Http`] if the request cannot be sent or the
    /// response body cannot be read
    pub async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let client = &self.client;
        self.interceptor
            .intercept(request, |request| forward(client, request))
            .await
    }

    /// Send a `GET` request to `url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the request fails
    pub async fn get(&self, url: &str) -> Result<Response<Bytes>> {
        self.send(build_request(Method::GET, url, &[], Bytes::new())?)
            .await
    }

    /// Send a `POST` request with a body to `url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the request fails
    pub async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: impl Into<Bytes>,
    ) -> Result<Response<Bytes>> {
        self.send(build_request(Method::POST, url, headers, body.into())?)
            .await
    }
}

/// Build a request from parts
///
/// # Errors
///
/// Returns [`TraceError::Validation`] if the URL or a header is invalid
pub fn build_request(
    method: Method,
    url: &str,
    headers: &[(&str, &str)],
    body: Bytes,
) -> Result<Request<Bytes>> {
    let mut builder = Request::builder().method(method).uri(url);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(body)
        .map_err(|e| TraceError::Validation(format!("Invalid request for '{url}': {e}")))
}

async fn forward(
    client: &Client<HttpConnector, Full<Bytes>>,
    request: Request<Bytes>,
) -> Result<Response<Bytes>> {
    debug!("Sending {} {}", request.method(), request.uri());

    let (parts, body) = request.into_parts();
    let response = client
        .request(Request::from_parts(parts, Full::new(body)))
        .await
        .map_err(|e| {
            warn!("Request failed: {e}");
            TraceError::Http(format!("Request failed: {e}"))
        })?;

    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| TraceError::Http(format!("Failed to read response body: {e}")))?
        .to_bytes();

    Ok(Response::from_parts(parts, body))
}
