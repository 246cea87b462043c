//! Query normalization
//!
//! Rewrites a freshly parsed AST into its canonical executable form:
//!
//! - `use` defaults are pushed into every statement that does not override
//!   them, so downstream stages never consult the query-level modifiers.
//! - String literals that unambiguously hold numbers become numeric
//!   literals (they commonly arrive through client parameter substitution).
//! - A chain whose head names a prior statement is collapsed into a plain
//!   variable reference; the nearest prior statement in source order wins.
//!
//! Optimization is idempotent: running it twice yields the same query.

use crate::query::ast::{ChainSegment, Query, Statement, ValueExpr};
use serde_json::Value as Json;

/// Normalize a parsed query
pub fn optimize(mut query: Query) -> Query {
    let keys: Vec<String> = query
        .statements
        .iter()
        .map(|s| s.key().to_string())
        .collect();

    for (index, statement) in query.statements.iter_mut().enumerate() {
        merge_defaults(statement, &query.defaults);
        let prior = &keys[..index];
        rewrite_statement(statement, prior);
    }

    query
}

/// Fill absent timeout and cache directives from the `use` defaults.
/// Statement-level values always win.
fn merge_defaults(statement: &mut Statement, defaults: &crate::query::ast::Modifiers) {
    if statement.timeout.is_none() {
        if let Some(timeout) = defaults.timeout {
            statement.timeout = Some(ValueExpr::Literal(Json::from(timeout)));
        }
    }
    if statement.cache_control.max_age.is_none() {
        if let Some(max_age) = defaults.max_age {
            statement.cache_control.max_age = Some(ValueExpr::Literal(Json::from(max_age)));
        }
    }
    if statement.cache_control.s_max_age.is_none() {
        if let Some(s_max_age) = defaults.s_max_age {
            statement.cache_control.s_max_age = Some(ValueExpr::Literal(Json::from(s_max_age)));
        }
    }
}

fn rewrite_statement(statement: &mut Statement, prior_keys: &[String]) {
    for (_, value) in statement.headers.iter_mut() {
        rewrite_expr(value, prior_keys);
    }
    if let Some(timeout) = statement.timeout.as_mut() {
        rewrite_expr(timeout, prior_keys);
        numeric_coercion(timeout);
    }
    if let Some(max_age) = statement.cache_control.max_age.as_mut() {
        rewrite_expr(max_age, prior_keys);
        numeric_coercion(max_age);
    }
    if let Some(s_max_age) = statement.cache_control.s_max_age.as_mut() {
        rewrite_expr(s_max_age, prior_keys);
        numeric_coercion(s_max_age);
    }
    for param in statement.with.iter_mut() {
        rewrite_expr(&mut param.value, prior_keys);
    }
}

/// Collapse literal-headed chains into variable references when the head
/// names a prior statement, recursing through lists and objects.
fn rewrite_expr(expr: &mut ValueExpr, prior_keys: &[String]) {
    match expr {
        ValueExpr::Chain(segments) => {
            let all_idents = segments
                .iter()
                .all(|s| matches!(s, ChainSegment::Ident(_)));
            if !all_idents {
                return;
            }
            let head_matches = match segments.first() {
                Some(ChainSegment::Ident(head)) => {
                    prior_keys.iter().rev().any(|key| key == head)
                }
                _ => false,
            };
            if head_matches {
                let path = segments
                    .iter()
                    .map(|s| match s {
                        ChainSegment::Ident(name) => name.clone(),
                        ChainSegment::Variable(_) => unreachable!(),
                    })
                    .collect();
                *expr = ValueExpr::Variable(path);
            }
        }
        ValueExpr::List(items) => {
            for item in items {
                rewrite_expr(item, prior_keys);
            }
        }
        ValueExpr::Object(entries) => {
            for (_, value) in entries {
                rewrite_expr(value, prior_keys);
            }
        }
        _ => {}
    }
}

/// Turn `"250"` into `250` where the position expects a number
fn numeric_coercion(expr: &mut ValueExpr) {
    if let ValueExpr::Literal(Json::String(text)) = expr {
        if let Ok(parsed) = text.trim().parse::<u64>() {
            *expr = ValueExpr::Literal(Json::from(parsed));
        }
    }
}
