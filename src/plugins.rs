//! Plugin surfaces
//!
//! The engine depends on capability traits, never on a concrete plugin. A
//! missing plugin degrades to a no-op: mapping and saved-query lookups
//! fail softly, lifecycle hooks do nothing, and the cache never hits.
//!
//! Plugins register into a process-wide registry at startup; the engine
//! takes a registry snapshot as a constructor dependency so tests can
//! inject their own.

use crate::mappings::Mapping;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by plugin implementations
#[derive(Debug, Error)]
pub enum PluginError {
    /// No database plugin is registered
    #[error("no database plugin registered")]
    NoDatabase,
    /// The plugin failed to serve the request
    #[error("{0}")]
    Failure(String),
}

/// Persistence capability: tenant mappings and saved queries
#[async_trait]
pub trait DatabasePlugin: Send + Sync {
    /// All mappings owned by a tenant
    async fn find_mappings_for_tenant(&self, tenant: &str)
        -> Result<Vec<Mapping>, PluginError>;

    /// Saved query text under namespace/name/revision coordinates
    async fn find_query(
        &self,
        namespace: &str,
        name: &str,
        revision: u64,
    ) -> Result<String, PluginError>;
}

/// Hook points around query and upstream-request execution. Every method
/// has a no-op default; hook failures must never fail the core, so the
/// hooks are infallible by construction.
pub trait LifecyclePlugin: Send + Sync {
    /// Called before a query is parsed and executed
    fn before_query(&self, _query_text: &str) {}

    /// Called after a query finishes, with the aggregate status
    fn after_query(&self, _query_text: &str, _status: u16) {}

    /// Called before each upstream request
    fn before_request(&self, _method: &str, _url: &str) {}

    /// Called after each upstream request
    fn after_request(&self, _method: &str, _url: &str, _status: u16) {}
}

/// Cache capability used for saved-query text
pub trait CachePlugin: Send + Sync {
    /// Fetch a cached entry
    fn get(&self, key: &str) -> Option<String>;

    /// Store an entry with a time-to-live
    fn set(&self, key: &str, value: String, ttl: Duration);
}

/// Registered plugins, snapshotted into the engine at construction
#[derive(Clone, Default)]
pub struct PluginRegistry {
    database: Option<Arc<dyn DatabasePlugin>>,
    lifecycle: Vec<Arc<dyn LifecyclePlugin>>,
    cache: Option<Arc<dyn CachePlugin>>,
}

impl PluginRegistry {
    /// An empty registry; every capability is a no-op
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the process-wide registry
    pub fn from_global() -> Self {
        global().read().clone()
    }

    /// Set the database plugin
    pub fn with_database(mut self, plugin: Arc<dyn DatabasePlugin>) -> Self {
        self.database = Some(plugin);
        self
    }

    /// Add a lifecycle plugin
    pub fn with_lifecycle(mut self, plugin: Arc<dyn LifecyclePlugin>) -> Self {
        self.lifecycle.push(plugin);
        self
    }

    /// Set the cache plugin
    pub fn with_cache(mut self, plugin: Arc<dyn CachePlugin>) -> Self {
        self.cache = Some(plugin);
        self
    }

    /// The database plugin, when registered
    pub fn database(&self) -> Option<Arc<dyn DatabasePlugin>> {
        self.database.clone()
    }

    /// The registered lifecycle plugins
    pub fn lifecycle(&self) -> &[Arc<dyn LifecyclePlugin>] {
        &self.lifecycle
    }

    /// The cache plugin, when registered
    pub fn cache(&self) -> Option<Arc<dyn CachePlugin>> {
        self.cache.clone()
    }
}

fn global() -> &'static RwLock<PluginRegistry> {
    static REGISTRY: OnceLock<RwLock<PluginRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(PluginRegistry::new()))
}

/// Register the database plugin into the process-wide registry
pub fn register_database_plugin(plugin: Arc<dyn DatabasePlugin>) {
    global().write().database = Some(plugin);
}

/// Register a lifecycle plugin into the process-wide registry
pub fn register_lifecycle_plugin(plugin: Arc<dyn LifecyclePlugin>) {
    global().write().lifecycle.push(plugin);
}

/// Register the cache plugin into the process-wide registry
pub fn register_cache_plugin(plugin: Arc<dyn CachePlugin>) {
    global().write().cache = Some(plugin);
}

/// Clear the process-wide registry; called on shutdown
pub fn teardown() {
    *global().write() = PluginRegistry::new();
}
