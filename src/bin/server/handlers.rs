//! HTTP handlers for the restweave server
//!
//! Query evaluation runs on a spawned task so that a panic inside the
//! engine surfaces as a 500 response instead of tearing down the
//! connection.

use super::types::{Counters, ErrorResponse, HealthResponse, RequestOptions};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use restweave::query::{QueryError, QueryOptions, QueryResponse};
use restweave::{ApplicationConfig, QueryEngine, ReqwestHttpClient};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::error;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state
pub struct AppState {
    /// The query engine
    pub engine: QueryEngine<ReqwestHttpClient>,
    /// Application configuration
    pub config: ApplicationConfig,
    /// Request counters for /metrics
    pub counters: Counters,
}

// =============================================================================
// Health & Metrics Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = format!(
        "# HELP restweave_queries_total Total queries received\n\
         # TYPE restweave_queries_total counter\n\
         restweave_queries_total {}\n\
         # HELP restweave_query_failures_total Queries with a non-2xx aggregate status\n\
         # TYPE restweave_query_failures_total counter\n\
         restweave_query_failures_total {}\n\
         # HELP restweave_saved_query_misses_total Saved-query lookups that missed\n\
         # TYPE restweave_saved_query_misses_total counter\n\
         restweave_saved_query_misses_total {}\n",
        state.counters.queries_total.load(Ordering::Relaxed),
        state.counters.query_failures_total.load(Ordering::Relaxed),
        state.counters.saved_query_misses_total.load(Ordering::Relaxed),
    );
    (StatusCode::OK, [("content-type", "text/plain")], metrics)
}

// =============================================================================
// Query Handlers
// =============================================================================

/// Ad-hoc query: the request body is the query text
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Query(raw_query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let options = engine_options(RequestOptions::from_query(raw_query));
    evaluate(state, move |state| async move {
        state.engine.execute(&body, &options).await
    })
    .await
}

/// Saved query by namespace/name/revision coordinates
pub async fn run_saved_query(
    State(state): State<Arc<AppState>>,
    Path((namespace, name, revision)): Path<(String, String, u64)>,
    Query(raw_query): Query<HashMap<String, String>>,
) -> Response {
    let options = engine_options(RequestOptions::from_query(raw_query));
    evaluate(state, move |state| async move {
        let result = state
            .engine
            .execute_saved(&namespace, &name, revision, &options)
            .await;
        if matches!(
            &result,
            Err(e) if e.kind == restweave::query::QueryErrorKind::QueryNotFound
        ) {
            state
                .counters
                .saved_query_misses_total
                .fetch_add(1, Ordering::Relaxed);
        }
        result
    })
    .await
}

fn engine_options(request: RequestOptions) -> QueryOptions {
    QueryOptions {
        tenant: request.tenant,
        params: request.params,
        debug: request.debug,
    }
}

/// Run an evaluation on its own task and translate the outcome,
/// converting an engine panic into a plain 500
async fn evaluate<F, Fut>(state: Arc<AppState>, run: F) -> Response
where
    F: FnOnce(Arc<AppState>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<QueryResponse, QueryError>> + Send + 'static,
{
    state.counters.queries_total.fetch_add(1, Ordering::Relaxed);

    let task_state = state.clone();
    let outcome = tokio::spawn(async move { run(task_state).await }).await;

    let result = match outcome {
        Ok(result) => result,
        Err(join_error) => {
            error!(error = %join_error, "query evaluation panicked");
            return error_response(500, "internal error".to_string());
        }
    };

    match result {
        Ok(response) => {
            if response.status_code >= 300 {
                state
                    .counters
                    .query_failures_total
                    .fetch_add(1, Ordering::Relaxed);
            }
            query_response(response)
        }
        Err(e) => {
            state
                .counters
                .query_failures_total
                .fetch_add(1, Ordering::Relaxed);
            error_response(e.status_code(), e.to_string())
        }
    }
}

fn query_response(response: QueryResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = (status, Json(response.body)).into_response();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            out.headers_mut().insert(name, value);
        }
    }
    out
}

fn error_response(status: u16, message: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse { error: message })).into_response()
}
