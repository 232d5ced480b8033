//! GraphQL lookaside cache.
//!
//! Two granularities share one controller lifecycle:
//!
//! - **Field caches** store the value of one root field of a named operation
//!   and let the executor skip that field's resolver on a hit.
//! - **Query caches** store the whole serialized response and answer a hit
//!   before anything is executed.
//!
//! Entries live in a [`CacheBackend`] partitioned by [`Zone`]; expiration is
//! evaluated lazily when an entry is read.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "filesystem"
//! directory = "/tmp/graphql-cache"
//!
//! [[cache.fields]]
//! zone = "posts"
//! query_name = "getPosts"
//! field_name = "post"
//! expire = 60
//!
//! [[cache.queries]]
//! query_name = "*"
//! ```

pub mod backend;
mod config;
mod controller;
mod entry;
mod error;
mod field;
mod hooks;
mod keys;
mod lock;
mod middleware;
mod query;
mod registry;
mod status;

pub use backend::{CacheBackend, FileSystemBackend, MemoryBackend, SharedBackend};
pub use config::{BackendKind, CacheConfig, FieldCacheConfig, QueryCacheConfig};
pub use controller::{CacheController, CacheKind, LookupState};
pub use entry::CacheEntry;
pub use error::{BackendError, CacheUsageError, InvalidZone, RegistryError};
pub use field::{FieldCache, FieldCacheState};
pub use hooks::{
    EarlyResponse, ExecutionHooks, ExecutionResponse, FieldResolve, GraphQLRequest, PathSegment,
    RequestStart, Resolution, ResponseBody, Transport,
};
pub use keys::{
    ANONYMOUS_QUERY, CacheKey, DEFAULT_ZONE, Principal, Zone, canonical_string, digest,
    extract_query_name, field_key, query_key, sanitize,
};
pub use middleware::{GraphQLCacheState, SharedScope, graphql_cache_layer};
pub use query::{QueryCache, QueryCacheState, WILDCARD};
pub use registry::{CacheRegistry, RequestScope};
pub use status::{
    DURATION_HEADER, FIELD_CACHE_HEADER, FieldStatus, Outcome, PendingStatus, QUERY_CACHE_HEADER,
};

pub(crate) use controller::{
    METRIC_EXPIRED_TOTAL, METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_SKIPPED_ERRORS_TOTAL,
    METRIC_WRITE_ERROR_TOTAL, METRIC_WRITE_TOTAL,
};
