//! Response encoding
//!
//! Folds the shaped resource map into the client-facing response: the
//! aggregate status code, the merged `Cache-Control` header, and the JSON
//! body. Hidden statements are dropped here and do not contribute to the
//! aggregate status or cache directives.
//!
//! Status aggregation is the max over normalized statement statuses
//! (`0 -> 500`, `201 -> 200`, `204 -> 200`); a statement marked
//! `ignore-errors` always contributes 200. Cache directives merge to the
//! minimum declared age, with `no-cache` dominating everything.

use crate::query::ast::Query;
use crate::query::resources::{DoneResource, Resource, ResourceCacheControl, Resources};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;

/// Encoded query result, ready for the HTTP layer
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    /// Aggregate status code
    pub status_code: u16,
    /// Response headers; carries `Cache-Control` when directives resulted
    pub headers: HashMap<String, String>,
    /// JSON body keyed by statement, in source order
    pub body: Json,
}

/// Encode the final response for a query
pub fn respond(query: &Query, resources: &Resources, debug: bool) -> QueryResponse {
    let mut body = Map::new();
    let mut visible = Vec::new();

    for statement in &query.statements {
        if statement.hidden {
            continue;
        }
        let Some(resource) = resources.get(statement.key()) else {
            continue;
        };
        visible.push(resource);
        body.insert(
            statement.key().to_string(),
            statement_result(resource, debug),
        );
    }

    let status_code = aggregate_status(&visible);
    let mut headers = HashMap::new();
    if let Some(cache_control) = cache_control_header(&visible) {
        headers.insert("Cache-Control".to_string(), cache_control);
    }

    QueryResponse {
        status_code,
        headers,
        body: Json::Object(body),
    }
}

// ============================================================================
// Statement Results
// ============================================================================

/// `{ details, result }` for one statement; multiplexed statements carry
/// index-aligned lists on both sides
fn statement_result(resource: &Resource, debug: bool) -> Json {
    let (details, result) = split_resource(resource, debug);
    let mut out = Map::new();
    out.insert("details".to_string(), details);
    if !result.is_null() {
        out.insert("result".to_string(), result);
    }
    Json::Object(out)
}

fn split_resource(resource: &Resource, debug: bool) -> (Json, Json) {
    match resource {
        Resource::One(done) => (details_json(done, debug), done.response_body.clone()),
        Resource::Many(items) => {
            let mut details = Vec::with_capacity(items.len());
            let mut results = Vec::with_capacity(items.len());
            let mut has_result = false;
            for item in items {
                let (d, r) = split_resource(item, debug);
                has_result |= !r.is_null();
                details.push(d);
                results.push(r);
            }
            let result = if has_result {
                Json::Array(results)
            } else {
                Json::Null
            };
            (Json::Array(details), result)
        }
    }
}

fn details_json(done: &DoneResource, debug: bool) -> Json {
    let mut metadata = Map::new();
    if done.ignore_errors {
        metadata.insert("ignore-errors".to_string(), Json::String("ignore".into()));
    }

    let mut details = Map::new();
    details.insert("status".to_string(), Json::from(done.status));
    details.insert("success".to_string(), Json::Bool(done.success));
    details.insert("metadata".to_string(), Json::Object(metadata));
    if debug {
        details.insert("debug".to_string(), debug_json(done));
    }
    Json::Object(details)
}

fn debug_json(done: &DoneResource) -> Json {
    let mut out = Map::new();
    if !done.request_method.is_empty() {
        out.insert("method".to_string(), Json::String(done.request_method.clone()));
    }
    if !done.request_url.is_empty() {
        out.insert("url".to_string(), Json::String(done.request_url.clone()));
    }
    if !done.request_headers.is_empty() {
        out.insert(
            "request-headers".to_string(),
            string_map_json(&done.request_headers),
        );
    }
    if !done.response_headers.is_empty() {
        out.insert(
            "response-headers".to_string(),
            string_map_json(&done.response_headers),
        );
    }
    if !done.request_params.is_null() {
        out.insert("params".to_string(), done.request_params.clone());
    }
    if let Some(request_body) = &done.request_body {
        out.insert("request-body".to_string(), request_body.clone());
    }
    out.insert(
        "response-time".to_string(),
        Json::from(done.response_time_ms),
    );
    Json::Object(out)
}

fn string_map_json(map: &HashMap<String, String>) -> Json {
    let mut out = Map::new();
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        out.insert(key.clone(), Json::String(map[key].clone()));
    }
    Json::Object(out)
}

// ============================================================================
// Status Aggregation
// ============================================================================

fn aggregate_status(resources: &[&Resource]) -> u16 {
    resources
        .iter()
        .map(|r| resource_status(r))
        .fold(200, u16::max)
}

fn resource_status(resource: &Resource) -> u16 {
    match resource {
        Resource::One(done) => {
            if done.ignore_errors {
                return 200;
            }
            normalize_status(done.status)
        }
        Resource::Many(items) => items.iter().map(resource_status).fold(200, u16::max),
    }
}

fn normalize_status(status: u16) -> u16 {
    match status {
        0 => 500,
        201 | 204 => 200,
        other => other,
    }
}

// ============================================================================
// Cache-Control Aggregation
// ============================================================================

fn cache_control_header(resources: &[&Resource]) -> Option<String> {
    let merged = resources
        .iter()
        .map(|r| resource_cache_control(r))
        .fold(ResourceCacheControl::default(), merge_cache_control);

    if merged.no_cache {
        return Some("no-cache".to_string());
    }

    let mut parts = Vec::new();
    if let Some(max_age) = merged.max_age {
        parts.push(format!("max-age={max_age}"));
    }
    if let Some(s_max_age) = merged.s_max_age {
        parts.push(format!("s-maxage={s_max_age}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn resource_cache_control(resource: &Resource) -> ResourceCacheControl {
    match resource {
        Resource::One(done) => done.cache_control,
        Resource::Many(items) => items
            .iter()
            .map(resource_cache_control)
            .fold(ResourceCacheControl::default(), merge_cache_control),
    }
}

/// Minimum of each age; `no-cache` dominates both
fn merge_cache_control(
    acc: ResourceCacheControl,
    next: ResourceCacheControl,
) -> ResourceCacheControl {
    if acc.no_cache || next.no_cache {
        return ResourceCacheControl {
            no_cache: true,
            max_age: None,
            s_max_age: None,
        };
    }
    ResourceCacheControl {
        no_cache: false,
        max_age: min_age(acc.max_age, next.max_age),
        s_max_age: min_age(acc.s_max_age, next.s_max_age),
    }
}

fn min_age(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::optimizer::optimize;
    use crate::query::parser::parse_query;
    use serde_json::json;

    fn one(status: u16, body: Json) -> Resource {
        Resource::One(DoneResource {
            status,
            success: (200..400).contains(&status),
            response_body: body,
            ..DoneResource::synthetic(status, false)
        })
    }

    fn respond_to(query_text: &str, entries: Vec<(&str, Resource)>, debug: bool) -> QueryResponse {
        let query = optimize(parse_query(query_text).unwrap());
        let mut resources: Resources = HashMap::new();
        for (key, resource) in entries {
            resources.insert(key.to_string(), resource);
        }
        respond(&query, &resources, debug)
    }

    #[test]
    fn test_single_statement_body_shape() {
        let response = respond_to(
            "from hero",
            vec![("hero", one(200, json!({"id": 1, "name": "batman"})))],
            false,
        );
        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.body,
            json!({
                "hero": {
                    "details": {"status": 200, "success": true, "metadata": {}},
                    "result": {"id": 1, "name": "batman"}
                }
            })
        );
    }

    #[test]
    fn test_status_is_max_after_normalization() {
        let response = respond_to(
            "from hero\nfrom villain",
            vec![
                ("hero", one(201, json!({}))),
                ("villain", one(404, Json::Null)),
            ],
            false,
        );
        assert_eq!(response.status_code, 404);
    }

    #[test]
    fn test_status_zero_normalizes_to_500() {
        let response = respond_to("from hero", vec![("hero", one(0, Json::Null))], false);
        assert_eq!(response.status_code, 500);
    }

    #[test]
    fn test_ignore_errors_pins_contribution_to_200() {
        let mut failed = DoneResource::synthetic(500, true);
        failed.status = 500;
        let response = respond_to(
            "from hero ignore-errors",
            vec![("hero", Resource::One(failed))],
            false,
        );
        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.body["hero"]["details"]["metadata"]["ignore-errors"],
            json!("ignore")
        );
    }

    #[test]
    fn test_multiplexed_statement_contributes_its_max() {
        let resource = Resource::Many(vec![one(200, json!(1)), one(408, Json::Null)]);
        let response = respond_to("from hero", vec![("hero", resource)], false);
        assert_eq!(response.status_code, 408);
        assert_eq!(
            response.body["hero"]["details"],
            json!([
                {"status": 200, "success": true, "metadata": {}},
                {"status": 408, "success": false, "metadata": {}}
            ])
        );
        assert_eq!(response.body["hero"]["result"], json!([1, null]));
    }

    #[test]
    fn test_multiplexed_all_null_results_omit_result() {
        let resource = Resource::Many(vec![one(204, Json::Null), one(204, Json::Null)]);
        let response = respond_to("from hero", vec![("hero", resource)], false);
        assert!(response.body["hero"].get("result").is_none());
    }

    #[test]
    fn test_hidden_statement_is_absent() {
        let response = respond_to(
            "from token hidden\nfrom hero",
            vec![
                ("token", one(500, json!("secret"))),
                ("hero", one(200, json!({"id": 1}))),
            ],
            false,
        );
        assert!(response.body.get("token").is_none());
        // hidden statements do not contribute to the aggregate status
        assert_eq!(response.status_code, 200);
    }

    #[test]
    fn test_body_keys_follow_statement_order() {
        let response = respond_to(
            "from zulu\nfrom alpha",
            vec![
                ("zulu", one(200, Json::Null)),
                ("alpha", one(200, Json::Null)),
            ],
            false,
        );
        let keys: Vec<&String> = match &response.body {
            Json::Object(map) => map.keys().collect(),
            _ => panic!("expected object body"),
        };
        assert_eq!(keys, vec!["zulu", "alpha"]);
    }

    #[test]
    fn test_cache_control_minimum_wins() {
        let mut hero = DoneResource::synthetic(200, false);
        hero.success = true;
        hero.cache_control.max_age = Some(600);
        hero.cache_control.s_max_age = Some(900);
        let mut villain = DoneResource::synthetic(200, false);
        villain.success = true;
        villain.cache_control.max_age = Some(60);

        let response = respond_to(
            "from hero\nfrom villain",
            vec![
                ("hero", Resource::One(hero)),
                ("villain", Resource::One(villain)),
            ],
            false,
        );
        assert_eq!(
            response.headers.get("Cache-Control").map(String::as_str),
            Some("max-age=60, s-maxage=900")
        );
    }

    #[test]
    fn test_no_cache_dominates() {
        let mut hero = DoneResource::synthetic(200, false);
        hero.cache_control.max_age = Some(600);
        let mut villain = DoneResource::synthetic(200, false);
        villain.cache_control.no_cache = true;

        let response = respond_to(
            "from hero\nfrom villain",
            vec![
                ("hero", Resource::One(hero)),
                ("villain", Resource::One(villain)),
            ],
            false,
        );
        assert_eq!(
            response.headers.get("Cache-Control").map(String::as_str),
            Some("no-cache")
        );
    }

    #[test]
    fn test_no_directives_no_header() {
        let response = respond_to("from hero", vec![("hero", one(200, Json::Null))], false);
        assert!(response.headers.get("Cache-Control").is_none());
    }

    #[test]
    fn test_debug_details_present_only_on_request() {
        let mut done = DoneResource::synthetic(200, false);
        done.success = true;
        done.request_method = "GET".to_string();
        done.request_url = "http://hero.api/hero".to_string();
        done.response_time_ms = 12;

        let with_debug = respond_to(
            "from hero",
            vec![("hero", Resource::One(done.clone()))],
            true,
        );
        assert_eq!(
            with_debug.body["hero"]["details"]["debug"]["url"],
            json!("http://hero.api/hero")
        );
        assert_eq!(
            with_debug.body["hero"]["details"]["debug"]["response-time"],
            json!(12)
        );

        let without_debug = respond_to("from hero", vec![("hero", Resource::One(done))], false);
        assert!(without_debug.body["hero"]["details"].get("debug").is_none());
    }
}
