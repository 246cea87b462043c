//! Query language parser
//!
//! Converts query text into the typed [`Query`](crate::query::ast::Query)
//! AST. The grammar is implemented with nom combinators in [`grammar`];
//! this module wraps it with error translation so every failure surfaces
//! as a `SyntaxError` carrying the line and column where parsing stopped.

mod grammar;

use crate::query::ast::Query;
use crate::query::error::{QueryError, QueryResult};
use std::collections::HashSet;

/// Parse a query string into an AST
///
/// Returns a syntax error on any grammar violation; no partial AST is
/// produced.
pub fn parse_query(input: &str) -> QueryResult<Query> {
    let query = match grammar::query(input) {
        Ok((remaining, query)) => {
            if remaining.trim().is_empty() {
                query
            } else {
                let (line, col) = position_of(input, remaining);
                return Err(QueryError::syntax(
                    format!("unexpected input `{}`", snippet(remaining)),
                    line,
                    col,
                ));
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let (line, col) = position_of(input, e.input);
            return Err(QueryError::syntax(
                format!("malformed query near `{}`", snippet(e.input)),
                line,
                col,
            ));
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(QueryError::syntax("unexpected end of query", 1, 1));
        }
    };

    validate(input, &query)?;
    Ok(query)
}

/// Semantic checks that are still grammar-level concerns: unique statement
/// keys and well-formed `matches()` patterns.
fn validate(input: &str, query: &Query) -> QueryResult<()> {
    let mut seen = HashSet::new();
    for statement in &query.statements {
        if !seen.insert(statement.key().to_string()) {
            let (line, col) = locate(input, statement.key());
            return Err(QueryError::syntax(
                format!("duplicate statement key `{}`", statement.key()),
                line,
                col,
            ));
        }

        for filter in &statement.only {
            if let Some(pattern) = &filter.matches {
                if let Err(e) = regex::Regex::new(pattern) {
                    let (line, col) = locate(input, pattern);
                    return Err(QueryError::syntax(
                        format!("invalid matches() pattern: {e}"),
                        line,
                        col,
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Line/column of the point where `remaining` starts inside `full`
fn position_of(full: &str, remaining: &str) -> (u32, u32) {
    let consumed = full.len() - remaining.len();
    offset_position(full, consumed)
}

/// Line/column of the first occurrence of `needle`, falling back to 1:1
fn locate(full: &str, needle: &str) -> (u32, u32) {
    match full.find(needle) {
        Some(offset) => offset_position(full, offset),
        None => (1, 1),
    }
}

fn offset_position(full: &str, offset: usize) -> (u32, u32) {
    let before = &full[..offset.min(full.len())];
    let line = before.matches('\n').count() as u32 + 1;
    let col = match before.rfind('\n') {
        Some(nl) => (offset - nl) as u32,
        None => offset as u32 + 1,
    };
    (line, col)
}

fn snippet(input: &str) -> String {
    let trimmed = input.trim_start();
    let mut out: String = trimmed.chars().take(24).collect();
    if trimmed.chars().count() > 24 {
        out.push('…');
    }
    out
}
