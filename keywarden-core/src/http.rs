//! HTTP transport collaborator seam.
//!
//! The protocol engine never talks to the network directly; it hands a
//! [`HttpRequest`] to an [`HttpTransport`] and gets back either a
//! well-formed [`HttpResponse`] (any status code) or a
//! [`TransportFailure`]. Timeouts and connection faults are distinct
//! from non-2xx responses so the engine can map them onto different
//! error kinds with different retry policies.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A form-POST request to a protocol endpoint.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Target endpoint.
    pub url: Url,

    /// Extra headers.
    pub headers: Vec<(String, String)>,

    /// URL-encoded form body.
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    /// Build a form POST.
    pub fn post_form(url: Url, form: Vec<(String, String)>) -> Self {
        Self {
            url,
            headers: Vec::new(),
            form,
        }
    }
}

/// A well-formed response, regardless of status code.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,

    /// Raw response body.
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The transport failed before a well-formed response arrived.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// No response within the transport's deadline.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (reset, refused, DNS, TLS).
    #[error("connection failed: {message}")]
    Connection { message: String },
}

/// Abstraction over the HTTP client used for token exchanges.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and wait for a complete response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

/// [`HttpTransport`] backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a default client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a transport with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let mut builder = self.client.post(request.url.clone()).form(&request.form);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportFailure::Timeout
            } else {
                TransportFailure::Connection {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportFailure::Connection {
                message: format!("failed to read body: {}", e),
            })?;

        Ok(HttpResponse { status, body })
    }
}
