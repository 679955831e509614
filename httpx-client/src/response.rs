//! HTTP response wrapper.

use crate::{HttpClientError, Result};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// HTTP response wrapper.
///
/// The body is fully buffered and reference counted, so a cached or
/// coalesced response can be handed to many callers without one consuming
/// it for the others.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    method: Method,
    url: Url,
}

impl Response {
    /// Create a response for a request to `url`.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, method: Method, url: Url) -> Self {
        Self {
            status,
            headers,
            body,
            method,
            url,
        }
    }

    /// Create a response from a reqwest response, buffering its body.
    pub(crate) async fn from_reqwest(response: reqwest::Response, method: Method) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        Ok(Self::new(status, headers, body, method, url))
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the status code as a number.
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response was a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Check if the response was a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a mutable reference to the response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the method of the originating request.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the URL of the originating request.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body as bytes.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Get the response body as text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(|e| HttpClientError::Json(e.to_string()))
    }

    /// Parse the response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Get the content length if available.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Get the content type if available.
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE)
    }

    /// Fail with [`HttpClientError::Response`] unless the status is 2xx.
    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }

        let message = match self.text() {
            Ok(text) if !text.is_empty() => text,
            _ => self
                .status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
        };
        Err(HttpClientError::Response {
            status: self.status.as_u16(),
            message,
        })
    }

    /// Check for an error response and return it.
    pub fn error_for_status(self) -> Result<Self> {
        self.ensure_success()?;
        Ok(self)
    }
}
