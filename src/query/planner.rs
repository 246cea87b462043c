//! Execution planning
//!
//! Derives the statement dependency graph and partitions it into layers.
//! Statement S depends on statement T when any variable or chain in S's
//! headers, `with` parameters, timeout or cache directives starts with T's
//! key, or when S's `in` target is rooted at T's key. Layers are produced
//! with Kahn's algorithm: every statement lands in the earliest layer whose
//! predecessors are all placed, keeping source order inside a layer.

use crate::query::ast::{Query, Statement, ValueExpr};
use crate::query::error::{QueryError, QueryResult};
use std::collections::{BTreeSet, HashMap};

/// An executable plan: statement indices grouped into dependency layers
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Layers in execution order; indices refer to `Query::statements`
    pub layers: Vec<Vec<usize>>,
    /// Per-statement dependency sets, by statement index
    pub dependencies: Vec<BTreeSet<usize>>,
}

impl QueryPlan {
    /// Number of statements covered by the plan
    pub fn statement_count(&self) -> usize {
        self.dependencies.len()
    }
}

/// Build the dependency plan for an optimized query
pub fn plan(query: &Query) -> QueryResult<QueryPlan> {
    let index_by_key: HashMap<&str, usize> = query
        .statements
        .iter()
        .enumerate()
        .map(|(i, s)| (s.key(), i))
        .collect();

    let dependencies: Vec<BTreeSet<usize>> = query
        .statements
        .iter()
        .enumerate()
        .map(|(i, statement)| {
            statement_dependencies(statement)
                .into_iter()
                .filter_map(|head| index_by_key.get(head.as_str()).copied())
                .filter(|&dep| dep != i)
                .collect()
        })
        .collect();

    let mut placed = vec![false; query.statements.len()];
    let mut layers = Vec::new();
    let mut remaining = query.statements.len();

    while remaining > 0 {
        let ready: Vec<usize> = (0..query.statements.len())
            .filter(|&i| !placed[i] && dependencies[i].iter().all(|&d| placed[d]))
            .collect();

        if ready.is_empty() {
            let cycle: Vec<&str> = (0..query.statements.len())
                .filter(|&i| !placed[i])
                .map(|i| query.statements[i].key())
                .collect();
            return Err(QueryError::cycle(format!(
                "statement dependencies form a cycle: {}",
                cycle.join(" -> ")
            )));
        }

        for &i in &ready {
            placed[i] = true;
        }
        remaining -= ready.len();
        layers.push(ready);
    }

    Ok(QueryPlan {
        layers,
        dependencies,
    })
}

/// Every key another statement could be referenced by in this statement
fn statement_dependencies(statement: &Statement) -> BTreeSet<String> {
    let mut heads = BTreeSet::new();

    let mut collect = |expr: &ValueExpr| {
        expr.visit(&mut |e| {
            if let Some(head) = e.reference_head() {
                heads.insert(head.to_string());
            }
        });
    };

    for (_, value) in &statement.headers {
        collect(value);
    }
    if let Some(timeout) = &statement.timeout {
        collect(timeout);
    }
    if let Some(max_age) = &statement.cache_control.max_age {
        collect(max_age);
    }
    if let Some(s_max_age) = &statement.cache_control.s_max_age {
        collect(s_max_age);
    }
    for param in &statement.with {
        collect(&param.value);
    }

    if let Some(target) = &statement.in_target {
        if let Some(head) = target.first() {
            heads.insert(head.clone());
        }
    }

    heads
}
