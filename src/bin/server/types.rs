//! Request and response types for the restweave HTTP server

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error payload returned for failed queries
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Process-wide request counters exposed on /metrics
#[derive(Debug, Default)]
pub struct Counters {
    /// Total queries received
    pub queries_total: AtomicU64,
    /// Queries that returned a non-2xx aggregate status
    pub query_failures_total: AtomicU64,
    /// Saved-query lookups that missed
    pub saved_query_misses_total: AtomicU64,
}

/// Reserved query-string keys; everything else binds a `$param`
const RESERVED_KEYS: &[&str] = &["debug", "tenant"];

/// Options extracted from the request query string
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub tenant: Option<String>,
    pub debug: bool,
    pub params: HashMap<String, serde_json::Value>,
}

impl RequestOptions {
    /// Split the query string into engine options and parameter bindings
    pub fn from_query(raw: HashMap<String, String>) -> Self {
        let debug = raw
            .get("debug")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let tenant = raw.get("tenant").cloned();
        let params = raw
            .into_iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key, serde_json::Value::String(value)))
            .collect();
        Self {
            tenant,
            debug,
            params,
        }
    }
}
