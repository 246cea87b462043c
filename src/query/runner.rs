//! Statement execution
//!
//! Runs a planned query as a wavefront over its dependency layers:
//!
//! ```text
//! layer 0   [ from hero ]  [ from villain ]      ← concurrent tasks
//!               │                │
//!               ▼                ▼ (barrier: layer joins before the next starts)
//! layer 1   [ from sidekick with hero = $hero.id ]
//!               │
//!               ▼ multiplex: one sub-request per list element
//!           [ GET /sidekick?hero=1 ]  [ GET /sidekick?hero=2 ]
//! ```
//!
//! Within a layer each statement owns exactly one key of the `Resources`
//! map; results are committed only after the layer joins, so tasks never
//! observe partial writes. Dropping the returned future cancels every
//! in-flight upstream call.

use crate::client::{HttpClient, HttpClientError, HttpRequest};
use crate::mappings::Mapping;
use crate::plugins::LifecyclePlugin;
use crate::query::ast::{ApplyFn, ChainSegment, Query, Statement, ValueExpr};
use crate::query::error::{QueryError, QueryErrorKind, QueryResult};
use crate::query::planner::QueryPlan;
use crate::query::resources::{DoneResource, Resource, ResourceCacheControl, Resources};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

// ============================================================================
// Runner Configuration
// ============================================================================

/// Execution limits applied to every statement
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Timeout when neither the statement nor `use` declares one
    pub default_timeout: Duration,
    /// Upper bound on any declared timeout
    pub max_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(5_000),
            max_timeout: Duration::from_millis(30_000),
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Executes planned queries against upstream services
pub struct Runner<C> {
    client: Arc<C>,
    config: RunnerConfig,
    lifecycle: Arc<Vec<Arc<dyn LifecyclePlugin>>>,
}

impl<C: HttpClient> Runner<C> {
    /// Create a runner over an upstream client
    pub fn new(
        client: Arc<C>,
        config: RunnerConfig,
        lifecycle: Vec<Arc<dyn LifecyclePlugin>>,
    ) -> Self {
        Self {
            client,
            config,
            lifecycle: Arc::new(lifecycle),
        }
    }

    /// Execute every layer of the plan and return the resource map
    pub async fn run(
        &self,
        query: &Query,
        plan: &QueryPlan,
        mappings: &HashMap<String, Mapping>,
        params: &HashMap<String, Json>,
    ) -> QueryResult<Resources> {
        let params = Arc::new(params.clone());
        let mut resources: Resources = HashMap::new();

        for (layer_index, layer) in plan.layers.iter().enumerate() {
            debug!(layer = layer_index, statements = layer.len(), "executing layer");
            let snapshot = Arc::new(resources.clone());
            let mut tasks: JoinSet<(String, QueryResult<Resource>)> = JoinSet::new();

            for &index in layer {
                let statement = query.statements[index].clone();
                let mapping = mappings.get(&statement.resource).cloned();
                let context = StatementContext {
                    client: self.client.clone(),
                    config: self.config.clone(),
                    snapshot: snapshot.clone(),
                    params: params.clone(),
                    lifecycle: self.lifecycle.clone(),
                };
                tasks.spawn(async move {
                    let key = statement.key().to_string();
                    let result = execute_statement(statement, mapping, context).await;
                    (key, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (key, result) = joined
                    .map_err(|e| QueryError::internal(format!("statement task failed: {e}")))?;
                resources.insert(key, result?);
            }
        }

        Ok(resources)
    }
}

/// Everything a statement task needs besides the statement itself
struct StatementContext<C> {
    client: Arc<C>,
    config: RunnerConfig,
    snapshot: Arc<Resources>,
    params: Arc<HashMap<String, Json>>,
    lifecycle: Arc<Vec<Arc<dyn LifecyclePlugin>>>,
}

async fn execute_statement<C: HttpClient>(
    statement: Statement,
    mapping: Option<Mapping>,
    context: StatementContext<C>,
) -> QueryResult<Resource> {
    let mapping = mapping.ok_or_else(|| QueryError::mapping_not_found(&statement.resource))?;

    let resolved = match resolve_statement(&statement, &context) {
        Ok(resolved) => resolved,
        Err(e) if e.kind == QueryErrorKind::DependencyUnresolved => {
            debug!(statement = statement.key(), error = %e, "dependency unresolved");
            return Ok(Resource::One(DoneResource::synthetic(
                400,
                statement.ignore_errors,
            )));
        }
        Err(e) => return Err(e),
    };

    let ResolvedStatement {
        headers,
        timeout,
        declared_cache,
        params,
    } = resolved;

    let slot = match expand_multiplex(params) {
        Ok(slot) => slot,
        Err(e) if statement.ignore_errors => {
            warn!(statement = statement.key(), error = %e, "multiplex shape mismatch absorbed");
            return Ok(Resource::One(DoneResource::synthetic(400, true)));
        }
        Err(e) => return Err(e),
    };

    let exec = StatementExecution {
        statement,
        mapping,
        headers,
        timeout,
        declared_cache,
        client: context.client,
        lifecycle: context.lifecycle,
    };
    execute_slot(&exec, slot).await
}

// ============================================================================
// Parameter Resolution
// ============================================================================

/// One `with` parameter after resolution and apply-functions
#[derive(Debug, Clone)]
struct ResolvedParam {
    name: String,
    value: Json,
    as_body: bool,
    no_multiplex: bool,
}

struct ResolvedStatement {
    headers: HashMap<String, String>,
    timeout: Duration,
    declared_cache: (Option<u64>, Option<u64>),
    params: Vec<ResolvedParam>,
}

fn resolve_statement<C>(
    statement: &Statement,
    context: &StatementContext<C>,
) -> QueryResult<ResolvedStatement> {
    let snapshot = &context.snapshot;
    let client_params = &context.params;

    let mut headers = HashMap::new();
    for (name, expr) in &statement.headers {
        if let Some(value) = resolve_expr(expr, snapshot, client_params)? {
            headers.insert(name.clone(), stringify(&value));
        }
    }

    let timeout = match &statement.timeout {
        Some(expr) => resolve_expr(expr, snapshot, client_params)?
            .as_ref()
            .and_then(Json::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(context.config.default_timeout),
        None => context.config.default_timeout,
    }
    .min(context.config.max_timeout);

    let resolve_age = |expr: &Option<ValueExpr>| -> QueryResult<Option<u64>> {
        Ok(match expr {
            Some(expr) => resolve_expr(expr, snapshot, client_params)?
                .as_ref()
                .and_then(Json::as_u64),
            None => None,
        })
    };
    let declared_cache = (
        resolve_age(&statement.cache_control.max_age)?,
        resolve_age(&statement.cache_control.s_max_age)?,
    );

    let mut params = Vec::new();
    for param in &statement.with {
        let Some(value) = resolve_expr(&param.value, snapshot, client_params)? else {
            continue;
        };
        params.push(apply_functions(&param.name, value, &param.functions));
    }

    Ok(ResolvedStatement {
        headers,
        timeout,
        declared_cache,
        params,
    })
}

/// Resolve a value expression against prior results and client parameters.
/// `None` means the value is unavailable and the parameter is dropped.
fn resolve_expr(
    expr: &ValueExpr,
    snapshot: &Resources,
    client_params: &HashMap<String, Json>,
) -> QueryResult<Option<Json>> {
    match expr {
        ValueExpr::Literal(value) => Ok(Some(value.clone())),
        ValueExpr::Variable(path) => resolve_path(path, snapshot, client_params),
        ValueExpr::Chain(segments) => {
            let mut path = Vec::with_capacity(segments.len());
            for segment in segments {
                match segment {
                    ChainSegment::Ident(name) => path.push(name.clone()),
                    ChainSegment::Variable(name) => match client_params.get(name) {
                        Some(value) => path.push(stringify(value)),
                        None => return Ok(None),
                    },
                }
            }
            resolve_path(&path, snapshot, client_params)
        }
        ValueExpr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_expr(item, snapshot, client_params)?.unwrap_or(Json::Null));
            }
            Ok(Some(Json::Array(out)))
        }
        ValueExpr::Object(entries) => {
            let mut out = Map::new();
            for (key, value) in entries {
                out.insert(
                    key.clone(),
                    resolve_expr(value, snapshot, client_params)?.unwrap_or(Json::Null),
                );
            }
            Ok(Some(Json::Object(out)))
        }
    }
}

fn resolve_path(
    path: &[String],
    snapshot: &Resources,
    client_params: &HashMap<String, Json>,
) -> QueryResult<Option<Json>> {
    let Some(head) = path.first() else {
        return Ok(None);
    };

    if let Some(resource) = snapshot.get(head) {
        if !resource.success() {
            return Err(QueryError::dependency_unresolved(format!(
                "statement `{head}` did not complete successfully"
            )));
        }
        return Ok(walk(&resource.body_tree(), &path[1..]));
    }

    match client_params.get(head) {
        Some(value) => Ok(walk(value, &path[1..])),
        None => Ok(None),
    }
}

/// Walk a dotted path through a body. Lists map the remaining path over
/// their elements, which is what drives multiplex expansion downstream.
fn walk(value: &Json, path: &[String]) -> Option<Json> {
    if path.is_empty() {
        return Some(value.clone());
    }
    match value {
        Json::Object(map) => map.get(&path[0]).and_then(|v| walk(v, &path[1..])),
        Json::Array(items) => Some(Json::Array(
            items
                .iter()
                .map(|item| walk(item, path).unwrap_or(Json::Null))
                .collect(),
        )),
        _ => None,
    }
}

fn apply_functions(name: &str, mut value: Json, functions: &[ApplyFn]) -> ResolvedParam {
    let mut as_body = false;
    let mut no_multiplex = false;

    for function in functions {
        match function {
            ApplyFn::Base64 => {
                value = Json::String(BASE64.encode(stringify(&value)));
            }
            ApplyFn::Json => {
                value = Json::String(serde_json::to_string(&value).unwrap_or_default());
            }
            ApplyFn::Flatten => {
                if let Json::Array(items) = value {
                    let mut flat = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Json::Array(inner) => flat.extend(inner),
                            other => flat.push(other),
                        }
                    }
                    value = Json::Array(flat);
                }
            }
            ApplyFn::AsBody => as_body = true,
            ApplyFn::NoMultiplex => no_multiplex = true,
        }
    }

    ResolvedParam {
        name: name.to_string(),
        value,
        as_body,
        no_multiplex,
    }
}

/// String form used in URLs, headers and `base64`
fn stringify(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Multiplex Expansion
// ============================================================================

/// Request tree after multiplex expansion; `Multi` stays index-aligned
/// with the list that drove it
#[derive(Debug)]
enum ParamSlot {
    Single(Vec<ResolvedParam>),
    Multi(Vec<ParamSlot>),
}

/// Expand list-valued parameters into one slot per element. Equal-length
/// lists zip; scalars broadcast; unequal lists are a shape error.
fn expand_multiplex(params: Vec<ResolvedParam>) -> QueryResult<ParamSlot> {
    let mut width: Option<usize> = None;
    for param in &param_lists(&params) {
        match width {
            None => width = Some(param.1),
            Some(w) if w != param.1 => {
                return Err(QueryError::multiplex_shape(format!(
                    "parameter `{}` has {} elements, expected {}",
                    param.0, param.1, w
                )))
            }
            Some(_) => {}
        }
    }

    let Some(width) = width else {
        return Ok(ParamSlot::Single(params));
    };

    let mut slots = Vec::with_capacity(width);
    for i in 0..width {
        let child: Vec<ResolvedParam> = params
            .iter()
            .map(|param| match &param.value {
                Json::Array(items) if !param.no_multiplex => ResolvedParam {
                    value: items[i].clone(),
                    ..param.clone()
                },
                _ => param.clone(),
            })
            .collect();
        slots.push(expand_multiplex(child)?);
    }
    Ok(ParamSlot::Multi(slots))
}

fn param_lists(params: &[ResolvedParam]) -> Vec<(String, usize)> {
    params
        .iter()
        .filter(|p| !p.no_multiplex)
        .filter_map(|p| match &p.value {
            Json::Array(items) => Some((p.name.clone(), items.len())),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Request Assembly and Execution
// ============================================================================

struct StatementExecution<C> {
    statement: Statement,
    mapping: Mapping,
    headers: HashMap<String, String>,
    timeout: Duration,
    declared_cache: (Option<u64>, Option<u64>),
    client: Arc<C>,
    lifecycle: Arc<Vec<Arc<dyn LifecyclePlugin>>>,
}

fn execute_slot<'a, C: HttpClient>(
    exec: &'a StatementExecution<C>,
    slot: ParamSlot,
) -> BoxFuture<'a, QueryResult<Resource>> {
    async move {
        match slot {
            ParamSlot::Single(params) => issue_request(exec, params).await.map(Resource::One),
            ParamSlot::Multi(slots) => {
                let results =
                    join_all(slots.into_iter().map(|slot| execute_slot(exec, slot))).await;
                let mut items = Vec::with_capacity(results.len());
                for result in results {
                    items.push(result?);
                }
                Ok(Resource::Many(items))
            }
        }
    }
    .boxed()
}

async fn issue_request<C: HttpClient>(
    exec: &StatementExecution<C>,
    params: Vec<ResolvedParam>,
) -> QueryResult<DoneResource> {
    let statement = &exec.statement;

    // Fill :param path segments; filled parameters leave the query/body set
    let mut path_values = HashMap::new();
    let mut remaining = Vec::new();
    for param in params {
        if exec.mapping.path_params.contains(&param.name) {
            path_values.insert(param.name.clone(), stringify(&param.value));
        } else {
            remaining.push(param);
        }
    }
    for required in &exec.mapping.path_params {
        if !path_values.contains_key(required) {
            return Err(QueryError::missing_path_param(&statement.resource, required));
        }
    }
    let url = exec.mapping.url_for(&path_values)?;

    let mut debug_params = Map::new();
    for (name, value) in &path_values {
        debug_params.insert(name.clone(), Json::String(value.clone()));
    }

    let (body, query) = split_body_and_query(statement, remaining, &mut debug_params);

    let mut headers = exec.headers.clone();
    if body.is_some() && !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    let request = HttpRequest {
        method: statement.method.as_http().to_string(),
        url: url.clone(),
        headers: headers.clone(),
        query: query.clone(),
        body: body.clone(),
        timeout: exec.timeout,
    };

    for plugin in exec.lifecycle.iter() {
        plugin.before_request(statement.method.as_http(), &url);
    }

    let outcome = exec.client.execute(request).await;

    let observed_status = match &outcome {
        Ok(response) => response.status,
        Err(HttpClientError::Timeout { .. }) => 408,
        Err(HttpClientError::Transport(_)) => 0,
    };
    for plugin in exec.lifecycle.iter() {
        plugin.after_request(statement.method.as_http(), &url, observed_status);
    }

    let mut done = match outcome {
        Ok(response) => {
            let response_body = parse_response_body(&response.headers, &response.body);
            let success = (200..400).contains(&response.status);
            let cache_control = header_value(&response.headers, "cache-control")
                .map(ResourceCacheControl::from_header)
                .unwrap_or_default();
            DoneResource {
                status: response.status,
                success,
                ignore_errors: statement.ignore_errors,
                response_body,
                response_headers: response.headers,
                request_method: statement.method.as_http().to_string(),
                request_url: url,
                request_headers: headers,
                request_params: Json::Object(debug_params),
                request_body: body,
                response_time_ms: response.elapsed_ms,
                cache_control,
            }
        }
        Err(HttpClientError::Timeout { elapsed_ms }) => {
            warn!(statement = statement.key(), url = %url, elapsed_ms, "upstream call timed out");
            DoneResource {
                status: 408,
                request_method: statement.method.as_http().to_string(),
                request_url: url,
                request_headers: headers,
                request_params: Json::Object(debug_params),
                request_body: body,
                response_time_ms: elapsed_ms,
                ..DoneResource::synthetic(408, statement.ignore_errors)
            }
        }
        Err(HttpClientError::Transport(reason)) => {
            warn!(statement = statement.key(), url = %url, error = %reason, "upstream transport error");
            DoneResource {
                status: 0,
                request_method: statement.method.as_http().to_string(),
                request_url: url,
                request_headers: headers,
                request_params: Json::Object(debug_params),
                request_body: body,
                ..DoneResource::synthetic(0, statement.ignore_errors)
            }
        }
    };

    // Declared directives win over whatever the upstream response carried
    let (declared_max_age, declared_s_max_age) = exec.declared_cache;
    if declared_max_age.is_some() {
        done.cache_control.max_age = declared_max_age;
    }
    if declared_s_max_age.is_some() {
        done.cache_control.s_max_age = declared_s_max_age;
    }

    Ok(done)
}

/// Decide where the non-path parameters travel: an `as-body` parameter is
/// the whole body; write methods send the remaining parameters as a JSON
/// object; read methods put everything on the query string.
fn split_body_and_query(
    statement: &Statement,
    remaining: Vec<ResolvedParam>,
    debug_params: &mut Map<String, Json>,
) -> (Option<Json>, Vec<(String, String)>) {
    let mut query = Vec::new();

    if let Some(position) = remaining.iter().position(|p| p.as_body) {
        let mut remaining = remaining;
        let body_param = remaining.remove(position);
        for param in remaining {
            push_query_param(&mut query, debug_params, param);
        }
        return (Some(body_param.value), query);
    }

    if statement.method.sends_body() {
        let mut body = Map::new();
        for param in remaining {
            debug_params.insert(param.name.clone(), param.value.clone());
            body.insert(param.name, param.value);
        }
        return (Some(Json::Object(body)), query);
    }

    let mut remaining = remaining;
    for param in remaining.drain(..) {
        push_query_param(&mut query, debug_params, param);
    }
    (None, query)
}

/// Lists become repeated query entries; objects are sent JSON-encoded
fn push_query_param(
    query: &mut Vec<(String, String)>,
    debug_params: &mut Map<String, Json>,
    param: ResolvedParam,
) {
    debug_params.insert(param.name.clone(), param.value.clone());
    match &param.value {
        Json::Array(items) => {
            for item in items {
                query.push((param.name.clone(), stringify(item)));
            }
        }
        value => query.push((param.name.clone(), stringify(value))),
    }
}

fn parse_response_body(headers: &HashMap<String, String>, body: &str) -> Json {
    if body.is_empty() {
        return Json::Null;
    }
    let is_json = header_value(headers, "content-type")
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(body).unwrap_or_else(|_| Json::String(body.to_string()))
    } else {
        Json::String(body.to_string())
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
