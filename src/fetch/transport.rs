//! Transport seam between the fetcher and the network.
//!
//! [`Transport`] performs exactly one GET. It distinguishes a failure to get
//! a response at all ([`ProxyError::Network`]) from a failure to read the
//! body of a response that did arrive ([`ProxyError::Read`]); the fetcher
//! retries both but logs them differently.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{ProxyError, Result};

/// Default per-request timeout of [`HttpTransport`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Caller-supplied request options.
///
/// Credentials, when a call site needs them, arrive here as a pre-built
/// header set. The fetcher never constructs them itself.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Headers sent with every attempt.
    pub headers: HeaderMap,
}

impl RequestOptions {
    /// Options with no extra headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given header set.
    pub fn with_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Add one header, validating name and value.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ProxyError::Configuration(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            ProxyError::Configuration(format!("invalid value for header {name}: {e}"))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// A response whose body has been fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// One HTTP GET against the upstream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for diagnostics.
    fn name(&self) -> &str;

    /// Issue a GET and read the full body.
    ///
    /// Must fail with [`ProxyError::Network`] when no response arrives and
    /// [`ProxyError::Read`] when the body cannot be read.
    async fn get(&self, url: &str, options: &RequestOptions) -> Result<RawResponse>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Wrap an existing client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, url: &str, options: &RequestOptions) -> Result<RawResponse> {
        let response = self
            .http
            .get(url)
            .headers(options.headers.clone())
            .send()
            .await
            .map_err(|e| ProxyError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Read(e.to_string()))?;

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}
