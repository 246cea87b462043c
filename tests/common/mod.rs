//! Shared test helpers: an in-process mock upstream client and engine
//! construction shortcuts.

#![allow(dead_code)]

use async_trait::async_trait;
use restweave::client::{HttpClient, HttpClientError, HttpRequest, HttpResponse};
use restweave::config::EngineSettings;
use restweave::{MappingResolver, PluginRegistry, QueryEngine};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a mock upstream does for one URL
pub struct MockReply {
    pub delay: Duration,
    pub result: Result<HttpResponse, String>,
}

type Handler = Box<dyn Fn(&HttpRequest) -> MockReply + Send + Sync>;

/// In-process upstream: URL-keyed handlers plus a call log
pub struct MockClient {
    handlers: HashMap<String, Handler>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler for a URL
    pub fn on(
        mut self,
        url: &str,
        handler: impl Fn(&HttpRequest) -> MockReply + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(url.to_string(), Box::new(handler));
        self
    }

    /// Shorthand: always reply with a JSON body
    pub fn on_json(self, url: &str, status: u16, body: Json) -> Self {
        self.on(url, move |_| reply_json(status, body.clone()))
    }

    /// Every request observed so far, in arrival order
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// URLs observed so far, in arrival order
    pub fn called_urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.url).collect()
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        self.calls
            .lock()
            .expect("call log poisoned")
            .push(request.clone());

        let Some(handler) = self.handlers.get(&request.url) else {
            return Ok(HttpResponse {
                status: 404,
                headers: HashMap::new(),
                body: String::new(),
                elapsed_ms: 0,
            });
        };

        let reply = handler(&request);
        if reply.delay > request.timeout {
            tokio::time::sleep(request.timeout).await;
            return Err(HttpClientError::Timeout {
                elapsed_ms: request.timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(reply.delay).await;
        reply.result.map_err(HttpClientError::Transport)
    }
}

/// An immediate JSON reply
pub fn reply_json(status: u16, body: Json) -> MockReply {
    let mut headers = HashMap::new();
    headers.insert(
        "content-type".to_string(),
        "application/json; charset=utf-8".to_string(),
    );
    MockReply {
        delay: Duration::ZERO,
        result: Ok(HttpResponse {
            status,
            headers,
            body: body.to_string(),
            elapsed_ms: 1,
        }),
    }
}

/// A JSON reply served after a delay; times out callers with a shorter
/// statement timeout
pub fn reply_json_after(delay: Duration, status: u16, body: Json) -> MockReply {
    let mut reply = reply_json(status, body);
    reply.delay = delay;
    reply
}

/// A transport-level failure
pub fn reply_transport_error(message: &str) -> MockReply {
    MockReply {
        delay: Duration::ZERO,
        result: Err(message.to_string()),
    }
}

/// Engine over a mock client and a static mapping table
pub fn engine(client: Arc<MockClient>, mappings: &[(&str, &str)]) -> QueryEngine<MockClient> {
    engine_with_settings(client, mappings, EngineSettings::default())
}

pub fn engine_with_settings(
    client: Arc<MockClient>,
    mappings: &[(&str, &str)],
    settings: EngineSettings,
) -> QueryEngine<MockClient> {
    let configured: HashMap<String, String> = mappings
        .iter()
        .map(|(name, url)| (name.to_string(), url.to_string()))
        .collect();
    let resolver = MappingResolver::new(&configured, None);
    QueryEngine::new(
        client,
        resolver,
        PluginRegistry::new(),
        &settings,
        "test-tenant",
    )
}
