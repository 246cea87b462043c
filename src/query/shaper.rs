//! Result shaping
//!
//! Post-execution transforms over the resource map, applied per statement
//! in source order:
//!
//! - `only` projection keeps the declared paths (`*` matches any key) and
//!   nulls out values that fail a `matches(regex)` guard. List-valued
//!   bodies are mapped element-wise.
//! - `in` aggregation nests the source body inside the target body at the
//!   declared path. Objects get the key set, list targets broadcast the
//!   source across elements, and equal-length lists zip index-wise. The
//!   source body is emptied afterwards so it appears once in the response.
//!
//! `hidden` is honored later by the responder; the resource must stay in
//! the map for chain references.

use crate::query::ast::{OnlyFilter, Query};
use crate::query::error::QueryResult;
use crate::query::resources::{Resource, Resources};
use regex::Regex;
use serde_json::{Map, Value as Json};

/// Apply projections and aggregations to the executed resources
pub fn shape(query: &Query, resources: &mut Resources) -> QueryResult<()> {
    for statement in &query.statements {
        if statement.only.is_empty() {
            continue;
        }
        let filters = compile_filters(&statement.only);
        if let Some(resource) = resources.get_mut(statement.key()) {
            project_resource(resource, &filters);
        }
    }

    for statement in &query.statements {
        let Some(target_path) = &statement.in_target else {
            continue;
        };
        if target_path.len() < 2 {
            continue;
        }
        let (target_key, nested_path) = (&target_path[0], &target_path[1..]);

        let Some(mut source) = resources.remove(statement.key()) else {
            continue;
        };
        if let Some(target) = resources.get_mut(target_key) {
            if !body_is_empty(&source) {
                let source_value = source.body_tree();
                merge_resource(target, &source_value, nested_path);
                empty_bodies(&mut source);
            }
        }
        resources.insert(statement.key().to_string(), source);
    }

    Ok(())
}

// ============================================================================
// Projection
// ============================================================================

struct CompiledFilter {
    path: Vec<String>,
    matches: Option<Regex>,
}

fn compile_filters(filters: &[OnlyFilter]) -> Vec<CompiledFilter> {
    filters
        .iter()
        .map(|f| CompiledFilter {
            path: f.path.clone(),
            // patterns were validated at parse time
            matches: f.matches.as_deref().and_then(|p| Regex::new(p).ok()),
        })
        .collect()
}

fn project_resource(resource: &mut Resource, filters: &[CompiledFilter]) {
    match resource {
        Resource::One(done) => {
            done.response_body = project(&done.response_body, filters);
        }
        Resource::Many(items) => {
            for item in items {
                project_resource(item, filters);
            }
        }
    }
}

/// Keep only the filtered paths of a body. Lists are mapped element-wise;
/// scalars pass through untouched.
fn project(body: &Json, filters: &[CompiledFilter]) -> Json {
    match body {
        Json::Array(items) => {
            Json::Array(items.iter().map(|item| project(item, filters)).collect())
        }
        Json::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                let applicable: Vec<&CompiledFilter> = filters
                    .iter()
                    .filter(|f| {
                        f.path
                            .first()
                            .is_some_and(|head| head == key || head.as_str() == "*")
                    })
                    .collect();
                if applicable.is_empty() {
                    continue;
                }

                if let Some(leaf) = applicable.iter().find(|f| f.path.len() == 1) {
                    out.insert(key.clone(), guard(value, leaf.matches.as_ref()));
                } else {
                    let tails: Vec<CompiledFilter> = applicable
                        .iter()
                        .map(|f| CompiledFilter {
                            path: f.path[1..].to_vec(),
                            matches: f.matches.clone(),
                        })
                        .collect();
                    out.insert(key.clone(), project(value, &tails));
                }
            }
            Json::Object(out)
        }
        other => other.clone(),
    }
}

/// Apply a `matches(regex)` guard: non-matching values become null.
/// List values are guarded element-wise.
fn guard(value: &Json, pattern: Option<&Regex>) -> Json {
    let Some(pattern) = pattern else {
        return value.clone();
    };
    match value {
        Json::Array(items) => {
            Json::Array(items.iter().map(|item| guard(item, Some(pattern))).collect())
        }
        other => {
            let text = match other {
                Json::String(s) => s.clone(),
                Json::Null => String::new(),
                v => v.to_string(),
            };
            if pattern.is_match(&text) {
                other.clone()
            } else {
                Json::Null
            }
        }
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Insert the source value into every exchange of the target resource.
/// A list-valued source zips with a multiplexed target of the same
/// length and broadcasts otherwise.
fn merge_resource(target: &mut Resource, source_value: &Json, path: &[String]) {
    match target {
        Resource::One(done) => {
            insert_at(&mut done.response_body, path, source_value.clone());
        }
        Resource::Many(items) => match source_value {
            Json::Array(values) => {
                // index-wise zip; unequal lengths leave the longer tail alone
                for (item, value) in items.iter_mut().zip(values) {
                    merge_resource(item, value, path);
                }
            }
            value => {
                for item in items {
                    merge_resource(item, value, path);
                }
            }
        },
    }
}

/// Insert `value` at `path` inside a body, creating intermediate objects.
/// List bodies broadcast the insertion across elements, zipping when the
/// value is a list of the same length.
fn insert_at(body: &mut Json, path: &[String], value: Json) {
    match body {
        Json::Array(items) => match value {
            Json::Array(values) if values.len() == items.len() => {
                for (item, v) in items.iter_mut().zip(values) {
                    insert_at(item, path, v);
                }
            }
            v => {
                for item in items.iter_mut() {
                    insert_at(item, path, v.clone());
                }
            }
        },
        Json::Object(map) => {
            if path.len() == 1 {
                map.insert(path[0].clone(), value);
            } else {
                let entry = map
                    .entry(path[0].clone())
                    .or_insert_with(|| Json::Object(Map::new()));
                insert_at(entry, &path[1..], value);
            }
        }
        Json::Null => {
            *body = Json::Object(Map::new());
            insert_at(body, path, value);
        }
        _ => {}
    }
}

fn body_is_empty(resource: &Resource) -> bool {
    match resource {
        Resource::One(done) => done.response_body.is_null(),
        Resource::Many(items) => items.iter().all(body_is_empty),
    }
}

fn empty_bodies(resource: &mut Resource) {
    match resource {
        Resource::One(done) => done.response_body = Json::Null,
        Resource::Many(items) => {
            for item in items {
                empty_bodies(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::optimizer::optimize;
    use crate::query::parser::parse_query;
    use crate::query::resources::DoneResource;
    use serde_json::json;
    use std::collections::HashMap;

    fn one(body: Json) -> Resource {
        Resource::One(DoneResource {
            status: 200,
            success: true,
            response_body: body,
            ..DoneResource::synthetic(200, false)
        })
    }

    fn many(bodies: Vec<Json>) -> Resource {
        Resource::Many(bodies.into_iter().map(one).collect())
    }

    fn body_of(resources: &Resources, key: &str) -> Json {
        resources.get(key).expect("resource").body_tree()
    }

    fn shaped(query_text: &str, entries: Vec<(&str, Resource)>) -> Resources {
        let query = optimize(parse_query(query_text).unwrap());
        let mut resources: Resources = HashMap::new();
        for (key, resource) in entries {
            resources.insert(key.to_string(), resource);
        }
        shape(&query, &mut resources).unwrap();
        resources
    }

    #[test]
    fn test_no_aggregator_is_noop() {
        let resources = shaped(
            "from hero\nfrom sidekick",
            vec![
                ("hero", one(json!({"id": 1}))),
                ("sidekick", one(json!({"id": 10}))),
            ],
        );
        assert_eq!(body_of(&resources, "hero"), json!({"id": 1}));
        assert_eq!(body_of(&resources, "sidekick"), json!({"id": 10}));
    }

    #[test]
    fn test_aggregate_one_resource_inside_other() {
        let resources = shaped(
            "from hero\nfrom sidekick in hero.sidekick",
            vec![
                ("hero", one(json!({"id": 1, "name": "batman"}))),
                ("sidekick", one(json!({"id": 10, "name": "robin"}))),
            ],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!({"id": 1, "name": "batman", "sidekick": {"id": 10, "name": "robin"}})
        );
        assert_eq!(body_of(&resources, "sidekick"), Json::Null);
    }

    #[test]
    fn test_aggregate_in_deep_location_creates_objects() {
        let resources = shaped(
            "from hero\nfrom sidekick in hero.info.partners.sidekick",
            vec![
                ("hero", one(json!({"id": 1}))),
                ("sidekick", one(json!({"id": 10}))),
            ],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!({"id": 1, "info": {"partners": {"sidekick": {"id": 10}}}})
        );
    }

    #[test]
    fn test_aggregate_list_body_inserted_whole() {
        let resources = shaped(
            "from hero\nfrom sidekick in hero.sidekick",
            vec![
                ("hero", one(json!({"id": 1}))),
                ("sidekick", one(json!([{"id": 10}, {"id": 11}]))),
            ],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!({"id": 1, "sidekick": [{"id": 10}, {"id": 11}]})
        );
    }

    #[test]
    fn test_aggregate_into_multiplexed_target_broadcasts() {
        let resources = shaped(
            "from hero\nfrom sidekick in hero.sidekick",
            vec![
                (
                    "hero",
                    many(vec![json!({"id": 1}), json!({"id": 2})]),
                ),
                ("sidekick", one(json!({"id": 10}))),
            ],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!([
                {"id": 1, "sidekick": {"id": 10}},
                {"id": 2, "sidekick": {"id": 10}}
            ])
        );
    }

    #[test]
    fn test_aggregate_into_list_body_broadcasts() {
        let resources = shaped(
            "from hero\nfrom sidekick in hero.sidekick",
            vec![
                ("hero", one(json!([{"id": 1}, {"id": 2}]))),
                ("sidekick", one(json!({"id": 10}))),
            ],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!([
                {"id": 1, "sidekick": {"id": 10}},
                {"id": 2, "sidekick": {"id": 10}}
            ])
        );
    }

    #[test]
    fn test_aggregate_multiplexed_source_into_single_target() {
        let resources = shaped(
            "from hero\nfrom sidekick in hero.sidekick",
            vec![
                ("hero", one(json!({"id": 1}))),
                (
                    "sidekick",
                    many(vec![json!({"id": 10}), json!({"id": 11})]),
                ),
            ],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!({"id": 1, "sidekick": [{"id": 10}, {"id": 11}]})
        );
        assert_eq!(body_of(&resources, "sidekick"), json!([null, null]));
    }

    #[test]
    fn test_aggregate_multiplexed_source_zips_multiplexed_target() {
        let resources = shaped(
            "from hero\nfrom sidekick in hero.sidekick",
            vec![
                (
                    "hero",
                    many(vec![json!({"id": 1}), json!({"id": 2})]),
                ),
                (
                    "sidekick",
                    many(vec![json!({"id": 10}), json!({"id": 11})]),
                ),
            ],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!([
                {"id": 1, "sidekick": {"id": 10}},
                {"id": 2, "sidekick": {"id": 11}}
            ])
        );
    }

    #[test]
    fn test_aggregate_list_body_zips_list_body() {
        let resources = shaped(
            "from hero\nfrom sidekick in hero.sidekick",
            vec![
                ("hero", one(json!([{"id": 1}, {"id": 2}]))),
                ("sidekick", one(json!([{"id": 10}, {"id": 11}]))),
            ],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!([
                {"id": 1, "sidekick": {"id": 10}},
                {"id": 2, "sidekick": {"id": 11}}
            ])
        );
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let query = optimize(
            parse_query("from hero\nfrom sidekick in hero.sidekick").unwrap(),
        );
        let mut resources: Resources = HashMap::new();
        resources.insert("hero".to_string(), one(json!({"id": 1})));
        resources.insert("sidekick".to_string(), one(json!({"id": 10})));

        shape(&query, &mut resources).unwrap();
        let after_first: Json = body_of(&resources, "hero");
        shape(&query, &mut resources).unwrap();
        assert_eq!(body_of(&resources, "hero"), after_first);
        assert_eq!(body_of(&resources, "sidekick"), Json::Null);
    }

    #[test]
    fn test_only_keeps_declared_paths() {
        let resources = shaped(
            "from hero only name, stats.strength",
            vec![(
                "hero",
                one(json!({
                    "name": "batman",
                    "age": 40,
                    "stats": {"strength": 9, "speed": 7}
                })),
            )],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!({"name": "batman", "stats": {"strength": 9}})
        );
    }

    #[test]
    fn test_only_wildcard_matches_any_key() {
        let resources = shaped(
            "from hero only skills.*.name",
            vec![(
                "hero",
                one(json!({
                    "skills": {
                        "primary": {"name": "stealth", "level": 10},
                        "secondary": {"name": "gadgets", "level": 8}
                    }
                })),
            )],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!({
                "skills": {
                    "primary": {"name": "stealth"},
                    "secondary": {"name": "gadgets"}
                }
            })
        );
    }

    #[test]
    fn test_only_matches_guard_nulls_nonmatching() {
        let resources = shaped(
            r#"from hero only name, age -> matches("^[0-9]+$")"#,
            vec![("hero", one(json!({"name": "batman", "age": "forty"})))],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!({"name": "batman", "age": null})
        );
    }

    #[test]
    fn test_only_matches_guard_keeps_matching() {
        let resources = shaped(
            r#"from hero only age -> matches("^[0-9]+$")"#,
            vec![("hero", one(json!({"age": "40"})))],
        );
        assert_eq!(body_of(&resources, "hero"), json!({"age": "40"}));
    }

    #[test]
    fn test_only_applies_elementwise_to_lists() {
        let resources = shaped(
            "from hero only name",
            vec![(
                "hero",
                one(json!([
                    {"name": "batman", "age": 40},
                    {"name": "robin", "age": 20}
                ])),
            )],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!([{"name": "batman"}, {"name": "robin"}])
        );
    }

    #[test]
    fn test_only_applies_to_multiplexed_resource() {
        let resources = shaped(
            "from hero only name",
            vec![(
                "hero",
                many(vec![
                    json!({"name": "batman", "age": 40}),
                    json!({"name": "diana", "age": 3000}),
                ]),
            )],
        );
        assert_eq!(
            body_of(&resources, "hero"),
            json!([{"name": "batman"}, {"name": "diana"}])
        );
    }
}
