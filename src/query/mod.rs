//! Query pipeline
//!
//! Everything between query text and the encoded response:
//!
//! ```text
//! Query String
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Parse     │  DSL → typed AST
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Optimize   │  use-defaults merge, chain collapsing
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Plan      │  dependency DAG → execution layers
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │    Run      │  concurrent upstream calls, multiplex fan-out
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Shape     │  only / hidden / in aggregation
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Respond    │  status, Cache-Control, JSON body
//! └─────────────┘
//! ```
//!
//! [`QueryEngine`] drives the pipeline end to end; each stage is also
//! usable on its own.

pub mod ast;
pub mod error;
pub mod optimizer;
pub mod parser;
pub mod planner;
pub mod resources;
pub mod responder;
pub mod runner;
pub mod shaper;

pub use ast::{Method, Query, Statement, ValueExpr};
pub use error::{QueryError, QueryErrorKind, QueryResult};
pub use optimizer::optimize;
pub use parser::parse_query;
pub use planner::{plan, QueryPlan};
pub use resources::{DoneResource, Resource, ResourceCacheControl, Resources};
pub use responder::{respond, QueryResponse};
pub use runner::{Runner, RunnerConfig};
pub use shaper::shape;

use crate::client::HttpClient;
use crate::config::EngineSettings;
use crate::mappings::{Mapping, MappingResolver};
use crate::plugins::PluginRegistry;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Per-execution options supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Tenant for mapping resolution; engine default when absent
    pub tenant: Option<String>,
    /// Client parameter bindings for `$param` references
    pub params: HashMap<String, Json>,
    /// Include per-statement debug details in the response
    pub debug: bool,
}

/// Drives the full pipeline for ad-hoc and saved queries
pub struct QueryEngine<C> {
    runner: Runner<C>,
    mappings: MappingResolver,
    plugins: PluginRegistry,
    deadline: Duration,
    default_tenant: String,
}

impl<C: HttpClient> QueryEngine<C> {
    /// Assemble an engine from its collaborators
    pub fn new(
        client: Arc<C>,
        mappings: MappingResolver,
        plugins: PluginRegistry,
        settings: &EngineSettings,
        default_tenant: impl Into<String>,
    ) -> Self {
        let runner_config = RunnerConfig {
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
            max_timeout: Duration::from_millis(settings.max_timeout_ms),
        };
        let runner = Runner::new(client, runner_config, plugins.lifecycle().to_vec());
        Self {
            runner,
            mappings,
            plugins,
            deadline: Duration::from_millis(settings.query_deadline_ms),
            default_tenant: default_tenant.into(),
        }
    }

    /// Execute an ad-hoc query
    pub async fn execute(
        &self,
        query_text: &str,
        options: &QueryOptions,
    ) -> QueryResult<QueryResponse> {
        for plugin in self.plugins.lifecycle() {
            plugin.before_query(query_text);
        }

        let result = match tokio::time::timeout(
            self.deadline,
            self.execute_inner(query_text, options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(QueryError::cancelled("query deadline exceeded")),
        };

        let status = match &result {
            Ok(response) => response.status_code,
            Err(e) => e.status_code(),
        };
        for plugin in self.plugins.lifecycle() {
            plugin.after_query(query_text, status);
        }

        result
    }

    /// Execute a saved query by its coordinates
    pub async fn execute_saved(
        &self,
        namespace: &str,
        name: &str,
        revision: u64,
        options: &QueryOptions,
    ) -> QueryResult<QueryResponse> {
        let query_text = self.find_saved_query(namespace, name, revision).await?;
        self.execute(&query_text, options).await
    }

    async fn execute_inner(
        &self,
        query_text: &str,
        options: &QueryOptions,
    ) -> QueryResult<QueryResponse> {
        let query = optimize(parse_query(query_text)?);
        let plan = plan(&query)?;
        debug!(
            statements = query.statements.len(),
            layers = plan.layers.len(),
            "query planned"
        );

        let tenant = options.tenant.as_deref().unwrap_or(&self.default_tenant);
        let mut mappings: HashMap<String, Mapping> = HashMap::new();
        for statement in &query.statements {
            if !mappings.contains_key(&statement.resource) {
                let mapping = self.mappings.resolve(tenant, &statement.resource).await?;
                mappings.insert(statement.resource.clone(), mapping);
            }
        }

        let mut resources = self
            .runner
            .run(&query, &plan, &mappings, &options.params)
            .await?;
        shape(&query, &mut resources)?;
        Ok(respond(&query, &resources, options.debug))
    }

    async fn find_saved_query(
        &self,
        namespace: &str,
        name: &str,
        revision: u64,
    ) -> QueryResult<String> {
        let cache_key = format!("saved-query/{namespace}/{name}/{revision}");
        if let Some(cache) = self.plugins.cache() {
            if let Some(text) = cache.get(&cache_key) {
                return Ok(text);
            }
        }

        let Some(database) = self.plugins.database() else {
            return Err(QueryError::query_not_found(
                "no saved-query store available",
            ));
        };
        match database.find_query(namespace, name, revision).await {
            Ok(text) => {
                if let Some(cache) = self.plugins.cache() {
                    cache.set(&cache_key, text.clone(), Duration::from_secs(60));
                }
                Ok(text)
            }
            Err(e) => Err(QueryError::query_not_found(format!(
                "query {namespace}/{name}/{revision} not found: {e}"
            ))),
        }
    }
}
