//! Transport capability used by the request pipeline.
//!
//! The pipeline never talks to the network directly. It hands a fully signed
//! [`TransportRequest`] to a [`Transport`] and gets back either a
//! [`TransportResponse`] (any status code) or a [`TransportError`] when no
//! response was obtained at all. Transports do not retry.
//!
//! [`HttpTransport`] is the production implementation on top of `reqwest`.
//! Tests substitute scripted transports through the same trait.

mod error;
mod http;

pub use error::TransportError;
pub use http::HttpTransport;

use async_trait::async_trait;
use reqwest::Method;

/// Where a request is sent: channel security, host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Use TLS.
    pub ssl: bool,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint.
    #[must_use]
    pub fn new(ssl: bool, host: impl Into<String>, port: u16) -> Self {
        Self {
            ssl,
            host: host.into(),
            port,
        }
    }

    /// Returns `https` or `http`.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    /// Builds the absolute URL for a path on this endpoint.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}://{}:{}{}", self.scheme(), self.host, self.port, path)
    }
}

/// One outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Target endpoint.
    pub endpoint: Endpoint,
    /// Path including the query string.
    pub path: String,
    /// Request headers, names in lowercase.
    pub headers: Vec<(String, String)>,
    /// Serialized request body.
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    /// Creates a request without headers or body.
    #[must_use]
    pub fn new(method: Method, endpoint: Endpoint, path: impl Into<String>) -> Self {
        Self {
            method,
            endpoint,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Sets a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(existing, _)| *existing != name);
        self.headers.push((name, value.into()));
    }

    /// Looks up a header value by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the absolute URL this request targets.
    #[must_use]
    pub fn url(&self) -> String {
        self.endpoint.url(&self.path)
    }
}

/// A received HTTP response, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names in lowercase.
    pub headers: Vec<(String, String)>,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Creates a response with a status and body and no headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

/// Sends a single HTTP request.
///
/// # Object Safety
///
/// This trait uses `async_trait` so clients can hold an `Arc<dyn Transport>`.
/// Native async trait methods are not object-safe.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the response, or an error when no
    /// response was obtained.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let endpoint = Endpoint::new(true, "api.zetk.in", 443);
        assert_eq!(endpoint.url("/v1/session"), "https://api.zetk.in:443/v1/session");

        let plain = Endpoint::new(false, "127.0.0.1", 8080);
        assert_eq!(plain.url("/v1/orgs?p=1"), "http://127.0.0.1:8080/v1/orgs?p=1");
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut request =
            TransportRequest::new(Method::GET, Endpoint::new(true, "api.zetk.in", 443), "/");
        request.set_header("Authorization", "first");
        request.set_header("authorization", "second");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("AUTHORIZATION"), Some("second"));
    }
}
