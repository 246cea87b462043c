//! Query Abstract Syntax Tree (AST)
//!
//! Defines the structure of the aggregation query language. A query is an
//! ordered sequence of statements, each targeting one upstream resource,
//! plus global `use` defaults.
//!
//! # Example
//!
//! ```text
//! use timeout = 800
//!
//! from hero as protagonist
//!     with id = $id
//!     only name, stats.strength
//!
//! from sidekick in protagonist.sidekick
//!     with hero = $protagonist.id
//!     ignore-errors
//! ```

use serde_json::Value as Json;

// ============================================================================
// Query and Statements
// ============================================================================

/// A parsed query: global defaults plus ordered statements
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Global defaults from `use` clauses
    pub defaults: Modifiers,
    /// Statements in source order
    pub statements: Vec<Statement>,
}

/// Global defaults declared with `use`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Modifiers {
    /// Default statement timeout in milliseconds
    pub timeout: Option<u64>,
    /// Default `max-age` cache directive in seconds
    pub max_age: Option<u64>,
    /// Default `s-max-age` cache directive in seconds
    pub s_max_age: Option<u64>,
}

/// HTTP method behind each statement keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `from`, issued as GET
    From,
    /// `to`, issued as POST
    To,
    /// `into`, issued as PUT
    Into,
    /// `update`, issued as PATCH
    Update,
    /// `delete`, issued as DELETE
    Delete,
}

impl Method {
    /// HTTP method name on the wire
    pub fn as_http(&self) -> &'static str {
        match self {
            Method::From => "GET",
            Method::To => "POST",
            Method::Into => "PUT",
            Method::Update => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether remaining `with` parameters travel in the request body
    pub fn sends_body(&self) -> bool {
        matches!(self, Method::To | Method::Into | Method::Update)
    }
}

/// One statement of a query
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Statement method keyword
    pub method: Method,
    /// Upstream resource name, resolved through the mappings
    pub resource: String,
    /// Optional alias; the result key when present
    pub alias: Option<String>,
    /// Aggregation target path (`in hero.sidekick`)
    pub in_target: Option<Vec<String>>,
    /// Request headers, in declaration order
    pub headers: Vec<(String, ValueExpr)>,
    /// Per-statement timeout in milliseconds
    pub timeout: Option<ValueExpr>,
    /// Request parameters, in declaration order
    pub with: Vec<WithParam>,
    /// Projection filters; empty means keep the whole body
    pub only: Vec<OnlyFilter>,
    /// Suppress this resource from the response body
    pub hidden: bool,
    /// Declared cache directives
    pub cache_control: CacheControlExpr,
    /// Record upstream failures without failing the query
    pub ignore_errors: bool,
}

impl Statement {
    /// Create a bare statement for a resource
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            method,
            resource: resource.into(),
            alias: None,
            in_target: None,
            headers: Vec::new(),
            timeout: None,
            with: Vec::new(),
            only: Vec::new(),
            hidden: false,
            cache_control: CacheControlExpr::default(),
            ignore_errors: false,
        }
    }

    /// Result key: the alias when present, the resource name otherwise
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.resource)
    }
}

/// Declared cache directives, possibly variable-valued
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheControlExpr {
    /// `max-age` directive
    pub max_age: Option<ValueExpr>,
    /// `s-max-age` directive
    pub s_max_age: Option<ValueExpr>,
}

// ============================================================================
// Value Expressions
// ============================================================================

/// A parameter or header value before resolution
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    /// A JSON literal
    Literal(Json),
    /// `$name.path`: a reference into a prior result or a client parameter
    Variable(Vec<String>),
    /// A dotted path template with optional embedded variables
    Chain(Vec<ChainSegment>),
    /// A list literal containing nested expressions
    List(Vec<ValueExpr>),
    /// An object literal containing nested expressions
    Object(Vec<(String, ValueExpr)>),
}

impl ValueExpr {
    /// The head identifier when this expression references another statement
    pub fn reference_head(&self) -> Option<&str> {
        match self {
            ValueExpr::Variable(path) => path.first().map(String::as_str),
            ValueExpr::Chain(segments) => match segments.first() {
                Some(ChainSegment::Ident(head)) => Some(head),
                _ => None,
            },
            _ => None,
        }
    }

    /// Walk every nested expression, including self
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a ValueExpr)) {
        f(self);
        match self {
            ValueExpr::List(items) => {
                for item in items {
                    item.visit(f);
                }
            }
            ValueExpr::Object(entries) => {
                for (_, value) in entries {
                    value.visit(f);
                }
            }
            _ => {}
        }
    }
}

/// One segment of a chain template
#[derive(Debug, Clone, PartialEq)]
pub enum ChainSegment {
    /// Literal identifier
    Ident(String),
    /// `$name`, substituted at resolution time
    Variable(String),
}

/// Functions applicable to a `with` value via `->`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyFn {
    /// Suppress multiplex expansion for this parameter
    NoMultiplex,
    /// Base64-encode the UTF-8 string form of the value
    Base64,
    /// JSON-encode the value to a string
    Json,
    /// Send this parameter as the request body
    AsBody,
    /// Flatten one level of list nesting
    Flatten,
}

/// A named `with` parameter and its apply-chain
#[derive(Debug, Clone, PartialEq)]
pub struct WithParam {
    /// Parameter name; also fills `:name` path placeholders
    pub name: String,
    /// Value expression
    pub value: ValueExpr,
    /// Functions applied in declaration order
    pub functions: Vec<ApplyFn>,
}

/// One `only` projection path with an optional regex guard
#[derive(Debug, Clone, PartialEq)]
pub struct OnlyFilter {
    /// Dotted path; `*` matches any key at that level
    pub path: Vec<String>,
    /// `matches(regex)` guard source, validated at parse time
    pub matches: Option<String>,
}
