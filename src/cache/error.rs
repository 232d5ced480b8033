use thiserror::Error;

/// Programmer misuse of a cache controller.
///
/// These are precondition violations and are never produced by ordinary
/// miss or expire flows.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheUsageError {
    #[error("cache key not derived yet; it is available only after the key-deriving hook ran")]
    KeyNotDerived,
    #[error("no cached value available; check `has_hit()` first")]
    NoCachedValue,
}

/// Failure to persist an entry.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Zone name rejected by [`Zone::parse`](super::keys::Zone::parse).
#[derive(Debug, Error, PartialEq, Eq)]
#[error("zone `{0}` must be non-empty and contain only [A-Za-z0-9_-]")]
pub struct InvalidZone(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("cache registry is already active")]
    AlreadyActive,
}
