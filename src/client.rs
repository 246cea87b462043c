//! Upstream HTTP client
//!
//! The runner talks to upstream services through the [`HttpClient`] trait
//! so execution is testable without a network. The production
//! implementation wraps a shared `reqwest::Client`; per-request timeouts
//! come from the statement being executed, and dropping the request future
//! cancels the in-flight call.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A fully assembled upstream request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method on the wire
    pub method: String,
    /// Absolute URL without the query string
    pub url: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Query-string pairs, already stringified
    pub query: Vec<(String, String)>,
    /// JSON body, when one is sent
    pub body: Option<Json>,
    /// Per-request deadline
    pub timeout: Duration,
}

/// An upstream response as the runner consumes it
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Upstream status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Raw response body
    pub body: String,
    /// Round-trip time in milliseconds
    pub elapsed_ms: u64,
}

/// Client-level failures; anything else is a regular response
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The per-request deadline elapsed
    #[error("upstream call timed out after {elapsed_ms}ms")]
    Timeout {
        /// Time spent before giving up, in milliseconds
        elapsed_ms: u64,
    },
    /// Connection-level failure
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Abstract upstream client consumed by the runner
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Perform one upstream exchange
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError>;
}

/// Production client backed by a shared connection pool
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Build a pooled client
    pub fn new(max_connections_per_host: usize) -> Result<Self, crate::error::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(max_connections_per_host)
            .build()
            .map_err(|e| {
                crate::error::Error::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| HttpClientError::Transport(format!("invalid method: {e}")))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .query(&request.query);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(HttpClientError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => return Err(HttpClientError::Transport(e.to_string())),
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                return Err(HttpClientError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => return Err(HttpClientError::Transport(e.to_string())),
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
