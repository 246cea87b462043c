//! Execution state
//!
//! The `Resources` map is the running state of a query: one entry per
//! statement key, created by the runner and reshaped by the shaper. A
//! multiplexed statement produces a `Resource::Many` whose elements stay
//! index-aligned with the list that drove the expansion; nested expansion
//! nests the variant.

use serde_json::Value as Json;
use std::collections::HashMap;

/// Ordered-by-statement execution state, keyed by alias or resource name
pub type Resources = HashMap<String, Resource>;

/// Result of one statement: a single upstream exchange or an
/// index-aligned tree of them
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    /// One upstream exchange
    One(DoneResource),
    /// Multiplexed exchanges, index-aligned with the driving list
    Many(Vec<Resource>),
}

impl Resource {
    /// Visit every leaf exchange
    pub fn for_each(&self, f: &mut impl FnMut(&DoneResource)) {
        match self {
            Resource::One(done) => f(done),
            Resource::Many(items) => {
                for item in items {
                    item.for_each(f);
                }
            }
        }
    }

    /// The response bodies of this resource, preserving multiplex shape
    pub fn body_tree(&self) -> Json {
        match self {
            Resource::One(done) => done.response_body.clone(),
            Resource::Many(items) => Json::Array(items.iter().map(Resource::body_tree).collect()),
        }
    }

    /// Whether every leaf completed successfully
    pub fn success(&self) -> bool {
        let mut ok = true;
        self.for_each(&mut |done| ok &= done.success);
        ok
    }
}

/// A completed upstream exchange
#[derive(Debug, Clone, PartialEq)]
pub struct DoneResource {
    /// Upstream status; 408 synthesized on timeout, 0 on transport error
    pub status: u16,
    /// `200 <= status < 400`
    pub success: bool,
    /// Failures recorded without failing the query
    pub ignore_errors: bool,
    /// Parsed response body; raw text when the payload is not JSON
    pub response_body: Json,
    /// Upstream response headers
    pub response_headers: HashMap<String, String>,
    /// Request method on the wire
    pub request_method: String,
    /// Full request URL
    pub request_url: String,
    /// Request headers sent upstream
    pub request_headers: HashMap<String, String>,
    /// Query/form parameters sent upstream
    pub request_params: Json,
    /// Request body, when one was sent
    pub request_body: Option<Json>,
    /// Upstream round-trip time in milliseconds
    pub response_time_ms: u64,
    /// Effective cache directives for this exchange
    pub cache_control: ResourceCacheControl,
}

impl DoneResource {
    /// An empty exchange used for synthesized failures
    pub fn synthetic(status: u16, ignore_errors: bool) -> Self {
        Self {
            status,
            success: false,
            ignore_errors,
            response_body: Json::Null,
            response_headers: HashMap::new(),
            request_method: String::new(),
            request_url: String::new(),
            request_headers: HashMap::new(),
            request_params: Json::Null,
            request_body: None,
            response_time_ms: 0,
            cache_control: ResourceCacheControl::default(),
        }
    }
}

/// Cache directives attached to one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCacheControl {
    /// `no-cache` observed; dominates both ages
    pub no_cache: bool,
    /// `max-age` in seconds
    pub max_age: Option<u64>,
    /// `s-maxage` in seconds
    pub s_max_age: Option<u64>,
}

impl ResourceCacheControl {
    /// Parse the directives we honor out of an upstream `Cache-Control`
    /// header value. Unknown directives are ignored.
    pub fn from_header(value: &str) -> Self {
        let mut out = Self::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            if directive.eq_ignore_ascii_case("no-cache") {
                out.no_cache = true;
            } else if let Some(age) = directive
                .strip_prefix("max-age=")
                .or_else(|| directive.strip_prefix("Max-Age="))
            {
                out.max_age = age.trim().parse().ok();
            } else if let Some(age) = directive
                .strip_prefix("s-maxage=")
                .or_else(|| directive.strip_prefix("S-Maxage="))
            {
                out.s_max_age = age.trim().parse().ok();
            }
        }
        out
    }
}
