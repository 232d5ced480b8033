//! Cache configuration.
//!
//! Controls the shared backend and the caches registered at start-up via
//! `graphql-cache.toml`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::backend::{DEFAULT_DIRECTORY, FileSystemBackend, MemoryBackend, SharedBackend};
use super::keys::Zone;

// Default values for cache configuration
const DEFAULT_RESPONSE_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Which storage backs the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Filesystem,
    Memory,
}

/// Cache configuration from `graphql-cache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Administrative switch; when off no cache participates in requests.
    pub enabled: bool,
    /// Storage used for every registered cache.
    pub backend: BackendKind,
    /// Root directory of the filesystem backend.
    pub directory: PathBuf,
    /// Emit `x-graphql-duration` with the status headers.
    pub measure_performance: bool,
    /// Largest executor response the HTTP layer buffers for caching.
    pub response_body_limit_bytes: usize,
    /// Field caches registered when the registry is created.
    pub fields: Vec<FieldCacheConfig>,
    /// Query caches registered when the registry is created.
    pub queries: Vec<QueryCacheConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::default(),
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            measure_performance: false,
            response_body_limit_bytes: DEFAULT_RESPONSE_BODY_LIMIT_BYTES,
            fields: Vec::new(),
            queries: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Instantiate the configured backend.
    pub fn build_backend(&self) -> SharedBackend {
        match self.backend {
            BackendKind::Filesystem => Arc::new(FileSystemBackend::new(self.directory.clone())),
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        }
    }
}

/// Registration of a single root field cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldCacheConfig {
    #[serde(default)]
    pub zone: Zone,
    /// Operation name to match.
    pub query_name: String,
    /// Root field (response key) to match.
    pub field_name: String,
    /// Maximum age in seconds; absent or zero means no age limit.
    #[serde(default)]
    pub expire: Option<u64>,
}

impl FieldCacheConfig {
    pub fn new(query_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            zone: Zone::default(),
            query_name: query_name.into(),
            field_name: field_name.into(),
            expire: None,
        }
    }

    pub fn zone(mut self, zone: impl Into<Zone>) -> Self {
        self.zone = zone.into();
        self
    }

    pub fn expire(mut self, seconds: u64) -> Self {
        self.expire = Some(seconds);
        self
    }
}

/// Registration of a whole-response cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryCacheConfig {
    #[serde(default)]
    pub zone: Zone,
    /// Operation name to match, or `*` for every operation.
    pub query_name: String,
    #[serde(default)]
    pub expire: Option<u64>,
}

impl QueryCacheConfig {
    pub fn new(query_name: impl Into<String>) -> Self {
        Self {
            zone: Zone::default(),
            query_name: query_name.into(),
            expire: None,
        }
    }

    pub fn zone(mut self, zone: impl Into<Zone>) -> Self {
        self.zone = zone.into();
        self
    }

    pub fn expire(mut self, seconds: u64) -> Self {
        self.expire = Some(seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.backend, BackendKind::Filesystem);
        assert_eq!(config.directory, PathBuf::from("/tmp/graphql-cache"));
        assert!(!config.measure_performance);
        assert_eq!(config.response_body_limit_bytes, 1024 * 1024);
        assert!(config.fields.is_empty());
        assert!(config.queries.is_empty());
    }

    #[test]
    fn registration_tables_deserialize() {
        let raw = r#"{
            "backend": "memory",
            "fields": [
                {"zone": "functional_test", "query_name": "getPosts", "field_name": "post"}
            ],
            "queries": [
                {"query_name": "*", "expire": 60}
            ]
        }"#;
        let config: CacheConfig = serde_json::from_str(raw).expect("parse cache config");

        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(
            config.fields,
            vec![FieldCacheConfig::new("getPosts", "post").zone("functional_test")]
        );
        assert_eq!(config.queries, vec![QueryCacheConfig::new("*").expire(60)]);
        assert_eq!(config.queries[0].zone, Zone::default());
    }

    #[test]
    fn builders_set_fields() {
        let field = FieldCacheConfig::new("getPosts", "post").zone("test").expire(1);
        assert_eq!(field.zone.as_str(), "test");
        assert_eq!(field.expire, Some(1));
    }
}
