//! Resource mappings
//!
//! A mapping binds a resource name to an upstream URL template. Templates
//! may contain `:param` path segments which are filled from the matching
//! `with` parameters at request-assembly time.
//!
//! Mappings are resolved in precedence order: environment variables
//! (`RESTWEAVE_MAPPING_<NAME>`), the static table from configuration, and
//! finally the database plugin for the requesting tenant. Tenant lookups
//! are cached.

use crate::plugins::DatabasePlugin;
use crate::query::error::{QueryError, QueryResult};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// A resource-to-upstream binding
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    /// Resource name used in queries
    pub resource_name: String,
    /// `http` or `https`
    pub schema: String,
    /// Host, including port when present
    pub host: String,
    /// Path template with `:param` placeholders
    pub path: String,
    /// Placeholder names in path order
    pub path_params: Vec<String>,
}

impl Mapping {
    /// Build a mapping from a URL template like
    /// `http://hero.api/hero/:id`
    pub fn from_url(resource_name: impl Into<String>, template: &str) -> QueryResult<Self> {
        let resource_name = resource_name.into();
        let parsed = Url::parse(template).map_err(|e| {
            QueryError::internal(format!(
                "invalid mapping url for `{resource_name}`: {e}"
            ))
        })?;

        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(QueryError::internal(format!(
                    "mapping url for `{resource_name}` has no host"
                )))
            }
        };

        let path = parsed.path().to_string();
        let path_params = path
            .split('/')
            .filter_map(|segment| segment.strip_prefix(':'))
            .map(String::from)
            .collect();

        Ok(Self {
            resource_name,
            schema: parsed.scheme().to_string(),
            host,
            path,
            path_params,
        })
    }

    /// Render the URL, filling `:param` segments from `values`
    pub fn url_for(&self, values: &HashMap<String, String>) -> QueryResult<String> {
        let mut rendered = String::new();
        for segment in self.path.split('/') {
            if segment.is_empty() {
                continue;
            }
            rendered.push('/');
            match segment.strip_prefix(':') {
                Some(param) => match values.get(param) {
                    Some(value) => rendered.push_str(value),
                    None => {
                        return Err(QueryError::missing_path_param(
                            &self.resource_name,
                            param,
                        ))
                    }
                },
                None => rendered.push_str(segment),
            }
        }
        Ok(format!("{}://{}{}", self.schema, self.host, rendered))
    }
}

/// Environment prefix for mapping overrides
const ENV_PREFIX: &str = "RESTWEAVE_MAPPING_";

/// Resolves resource names to mappings for a tenant
pub struct MappingResolver {
    static_mappings: HashMap<String, Mapping>,
    database: Option<Arc<dyn DatabasePlugin>>,
    tenant_cache: DashMap<String, Arc<HashMap<String, Mapping>>>,
}

impl MappingResolver {
    /// Create a resolver over a static table and an optional database
    /// plugin. Environment mappings are read once at construction.
    pub fn new(
        configured: &HashMap<String, String>,
        database: Option<Arc<dyn DatabasePlugin>>,
    ) -> Self {
        let mut static_mappings = HashMap::new();

        for (name, template) in configured {
            match Mapping::from_url(name.clone(), template) {
                Ok(mapping) => {
                    static_mappings.insert(name.clone(), mapping);
                }
                Err(e) => {
                    tracing::warn!(resource = %name, error = %e, "skipping invalid configured mapping");
                }
            }
        }

        for (key, template) in std::env::vars() {
            if let Some(raw_name) = key.strip_prefix(ENV_PREFIX) {
                let name = raw_name.to_ascii_lowercase().replace('_', "-");
                match Mapping::from_url(name.clone(), &template) {
                    Ok(mapping) => {
                        static_mappings.insert(name, mapping);
                    }
                    Err(e) => {
                        tracing::warn!(resource = %name, error = %e, "skipping invalid env mapping");
                    }
                }
            }
        }

        Self {
            static_mappings,
            database,
            tenant_cache: DashMap::new(),
        }
    }

    /// Look up the mapping for a resource, falling back to the database
    /// plugin for the tenant
    pub async fn resolve(&self, tenant: &str, resource: &str) -> QueryResult<Mapping> {
        if let Some(mapping) = self.static_mappings.get(resource) {
            return Ok(mapping.clone());
        }

        if let Some(found) = self.tenant_mappings(tenant).await.get(resource) {
            return Ok(found.clone());
        }

        Err(QueryError::mapping_not_found(resource))
    }

    async fn tenant_mappings(&self, tenant: &str) -> Arc<HashMap<String, Mapping>> {
        if let Some(cached) = self.tenant_cache.get(tenant) {
            return cached.clone();
        }

        let mut found = HashMap::new();
        if let Some(database) = &self.database {
            match database.find_mappings_for_tenant(tenant).await {
                Ok(mappings) => {
                    for mapping in mappings {
                        found.insert(mapping.resource_name.clone(), mapping);
                    }
                }
                Err(e) => {
                    tracing::debug!(tenant = %tenant, error = %e, "database mappings unavailable");
                }
            }
        }

        let found = Arc::new(found);
        self.tenant_cache.insert(tenant.to_string(), found.clone());
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    #[test]
    fn test_mapping_from_url_extracts_path_params() {
        let mapping = Mapping::from_url("hero", "http://hero.api:8080/hero/:id/gear/:slot")
            .unwrap();
        assert_eq!(mapping.schema, "http");
        assert_eq!(mapping.host, "hero.api:8080");
        assert_eq!(mapping.path_params, vec!["id", "slot"]);
    }

    #[test]
    fn test_url_for_fills_placeholders() {
        let mapping = Mapping::from_url("hero", "http://hero.api/hero/:id").unwrap();
        let mut values = HashMap::new();
        values.insert("id".to_string(), "42".to_string());
        assert_eq!(mapping.url_for(&values).unwrap(), "http://hero.api/hero/42");
    }

    #[test]
    fn test_url_for_missing_param_fails() {
        let mapping = Mapping::from_url("hero", "http://hero.api/hero/:id").unwrap();
        let err = mapping.url_for(&HashMap::new()).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::MissingPathParam);
    }

    #[test]
    fn test_plain_template_has_no_params() {
        let mapping = Mapping::from_url("heroes", "https://hero.api/heroes").unwrap();
        assert!(mapping.path_params.is_empty());
        assert_eq!(
            mapping.url_for(&HashMap::new()).unwrap(),
            "https://hero.api/heroes"
        );
    }

    #[tokio::test]
    async fn test_resolver_prefers_static_table() {
        let mut configured = HashMap::new();
        configured.insert("hero".to_string(), "http://hero.api/hero".to_string());
        let resolver = MappingResolver::new(&configured, None);
        let mapping = resolver.resolve("any-tenant", "hero").await.unwrap();
        assert_eq!(mapping.host, "hero.api");
    }

    #[tokio::test]
    async fn test_resolver_unknown_resource_is_not_found() {
        let resolver = MappingResolver::new(&HashMap::new(), None);
        let err = resolver.resolve("any-tenant", "ghost").await.unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::MappingNotFound);
    }
}
