//! HTTP server integration tests
//!
//! Exercises the REST surface against a router mirroring the server
//! binary, with the engine wired to an in-process mock upstream.
//!
//! # Test Coverage
//!
//! 1. **Health endpoint** - status and version payload
//! 2. **Ad-hoc queries** - POST /run-query happy path and error mapping
//! 3. **Parameter binding** - query-string `$param` substitution and debug
//! 4. **Headers** - Cache-Control propagation
//! 5. **Saved queries** - GET /run-query/{namespace}/{name}/{revision}

mod common;

use axum::{
    body::{to_bytes, Body},
    extract::{Path, Query, State},
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{engine, MockClient};
use restweave::config::EngineSettings;
use restweave::plugins::{DatabasePlugin, PluginError, PluginRegistry};
use restweave::query::QueryOptions;
use restweave::{Mapping, MappingResolver, QueryEngine};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

// =============================================================================
// Router Construction (mirrors the server binary)
// =============================================================================

struct TestAppState {
    engine: QueryEngine<MockClient>,
}

fn options_from_query(raw: HashMap<String, String>) -> QueryOptions {
    let debug = raw.get("debug").map(|v| v == "true").unwrap_or(false);
    let tenant = raw.get("tenant").cloned();
    let params = raw
        .into_iter()
        .filter(|(key, _)| key != "debug" && key != "tenant")
        .map(|(key, value)| (key, JsonValue::String(value)))
        .collect();
    QueryOptions {
        tenant,
        params,
        debug,
    }
}

async fn health() -> Json<JsonValue> {
    Json(json!({"status": "healthy", "version": env!("CARGO_PKG_VERSION")}))
}

async fn run_query(
    State(state): State<Arc<TestAppState>>,
    Query(raw): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let options = options_from_query(raw);
    translate(state.engine.execute(&body, &options).await)
}

async fn run_saved_query(
    State(state): State<Arc<TestAppState>>,
    Path((namespace, name, revision)): Path<(String, String, u64)>,
    Query(raw): Query<HashMap<String, String>>,
) -> Response {
    let options = options_from_query(raw);
    translate(
        state
            .engine
            .execute_saved(&namespace, &name, revision, &options)
            .await,
    )
}

fn translate(
    result: Result<restweave::QueryResponse, restweave::query::QueryError>,
) -> Response {
    match result {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut out = (status, Json(response.body)).into_response();
            for (name, value) in &response.headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::try_from(name.as_str()),
                    axum::http::HeaderValue::from_str(value),
                ) {
                    out.headers_mut().insert(name, value);
                }
            }
            out
        }
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

fn router(engine: QueryEngine<MockClient>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/run-query", post(run_query))
        .route(
            "/run-query/{namespace}/{name}/{revision}",
            get(run_saved_query).post(run_saved_query),
        )
        .with_state(Arc::new(TestAppState { engine }))
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, JsonValue, HeaderMap) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: JsonValue = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, body, headers)
}

fn post_query(uri: &str, query_text: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "text/plain")
        .body(Body::from(query_text.to_string()))
        .unwrap()
}

// =============================================================================
// Ad-hoc Query Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let client = Arc::new(MockClient::new());
    let app = router(engine(client, &[]));

    let (status, body, _) = send(
        app,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_run_query_happy_path() {
    let client = Arc::new(MockClient::new().on_json(
        "http://h/hero",
        200,
        json!({"id": 1, "name": "batman"}),
    ));
    let app = router(engine(client, &[("hero", "http://h/hero")]));

    let (status, body, _) = send(app, post_query("/run-query", "from hero")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hero"]["result"], json!({"id": 1, "name": "batman"}));
    assert_eq!(body["hero"]["details"]["success"], json!(true));
}

#[tokio::test]
async fn test_run_query_binds_query_string_params() {
    let client = Arc::new(MockClient::new().on_json("http://h/hero", 200, json!({"id": 7})));
    let app = router(engine(client.clone(), &[("hero", "http://h/hero")]));

    let (status, _, _) = send(
        app,
        post_query("/run-query?id=7", "from hero with id = $id"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        client.calls()[0].query,
        vec![("id".to_string(), "7".to_string())]
    );
}

#[tokio::test]
async fn test_run_query_debug_param() {
    let client = Arc::new(MockClient::new().on_json("http://h/hero", 200, json!({"id": 1})));
    let app = router(engine(client, &[("hero", "http://h/hero")]));

    let (_, body, _) = send(app, post_query("/run-query?debug=true", "from hero")).await;
    assert_eq!(
        body["hero"]["details"]["debug"]["url"],
        json!("http://h/hero")
    );
}

#[tokio::test]
async fn test_run_query_syntax_error_is_400() {
    let client = Arc::new(MockClient::new());
    let app = router(engine(client, &[]));

    let (status, body, _) = send(app, post_query("/run-query", "from hero\nwith = =")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("SyntaxError"));
}

#[tokio::test]
async fn test_run_query_unknown_resource_is_404() {
    let client = Arc::new(MockClient::new());
    let app = router(engine(client, &[]));

    let (status, body, _) = send(app, post_query("/run-query", "from ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_run_query_propagates_cache_control() {
    let client = Arc::new(MockClient::new().on_json("http://h/hero", 200, json!({})));
    let app = router(engine(client, &[("hero", "http://h/hero")]));

    let (_, _, headers) = send(app, post_query("/run-query", "from hero max-age = 60")).await;
    assert_eq!(
        headers.get("cache-control").and_then(|v| v.to_str().ok()),
        Some("max-age=60")
    );
}

#[tokio::test]
async fn test_run_query_upstream_failure_status() {
    let client = Arc::new(MockClient::new().on_json("http://h/hero", 503, JsonValue::Null));
    let app = router(engine(client, &[("hero", "http://h/hero")]));

    let (status, body, _) = send(app, post_query("/run-query", "from hero")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["hero"]["details"]["status"], json!(503));
}

// =============================================================================
// Saved Query Tests
// =============================================================================

struct OneSavedQuery;

#[async_trait::async_trait]
impl DatabasePlugin for OneSavedQuery {
    async fn find_mappings_for_tenant(
        &self,
        _tenant: &str,
    ) -> Result<Vec<Mapping>, PluginError> {
        Ok(Vec::new())
    }

    async fn find_query(
        &self,
        namespace: &str,
        name: &str,
        revision: u64,
    ) -> Result<String, PluginError> {
        if namespace == "heroes" && name == "get-hero" && revision == 1 {
            Ok("from hero".to_string())
        } else {
            Err(PluginError::Failure("not found".to_string()))
        }
    }
}

fn saved_query_router(client: Arc<MockClient>) -> Router {
    let mut configured = HashMap::new();
    configured.insert("hero".to_string(), "http://h/hero".to_string());
    let plugins = PluginRegistry::new().with_database(Arc::new(OneSavedQuery));
    let resolver = MappingResolver::new(&configured, plugins.database());
    let engine = QueryEngine::new(
        client,
        resolver,
        plugins,
        &EngineSettings::default(),
        "test-tenant",
    );
    router(engine)
}

#[tokio::test]
async fn test_saved_query_by_coordinates() {
    let client = Arc::new(MockClient::new().on_json("http://h/hero", 200, json!({"id": 1})));
    let app = saved_query_router(client);

    let (status, body, _) = send(
        app,
        Request::builder()
            .uri("/run-query/heroes/get-hero/1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hero"]["result"], json!({"id": 1}));
}

#[tokio::test]
async fn test_missing_saved_query_is_404() {
    let client = Arc::new(MockClient::new());
    let app = saved_query_router(client);

    let (status, body, _) = send(
        app,
        Request::builder()
            .uri("/run-query/heroes/ghost/3")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}
