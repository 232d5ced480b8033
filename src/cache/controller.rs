//! Lifecycle shared by field and query caches: read, expire, delete, write.
//!
//! Configuration lives in [`CacheController`] and never changes after
//! registration. Everything tied to one operation lives in [`LookupState`],
//! owned by the caller and reset between operations.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use once_cell::sync::OnceCell;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use super::backend::SharedBackend;
use super::entry::CacheEntry;
use super::error::CacheUsageError;
use super::keys::{CacheKey, Zone};

pub(crate) const METRIC_HIT_TOTAL: &str = "graphql_cache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "graphql_cache_miss_total";
pub(crate) const METRIC_EXPIRED_TOTAL: &str = "graphql_cache_expired_total";
pub(crate) const METRIC_WRITE_TOTAL: &str = "graphql_cache_write_total";
pub(crate) const METRIC_WRITE_ERROR_TOTAL: &str = "graphql_cache_write_error_total";
pub(crate) const METRIC_SKIPPED_ERRORS_TOTAL: &str = "graphql_cache_skipped_errors_total";

/// Granularity of a cache, used as a log and metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Field,
    Query,
}

impl CacheKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend shared between a registry and the caches it created.
///
/// Empty until the registry is activated; caches see the backend as soon as
/// it is set, whichever was created first.
pub(crate) type BackendSlot = Arc<OnceCell<SharedBackend>>;

/// Per-operation lookup state.
///
/// `IDLE` (no key) → `KEY_SET` → `HIT` (entry held) or `MISS` (no entry).
#[derive(Debug, Default, Clone)]
pub struct LookupState {
    key: Option<CacheKey>,
    entry: Option<CacheEntry>,
}

impl LookupState {
    pub fn cache_key(&self) -> Result<&CacheKey, CacheUsageError> {
        self.key.as_ref().ok_or(CacheUsageError::KeyNotDerived)
    }

    /// Move to `KEY_SET`, dropping any previously held entry.
    pub fn set_key(&mut self, key: CacheKey) {
        self.key = Some(key);
        self.entry = None;
    }

    /// True iff an unexpired entry is currently held.
    pub fn has_hit(&self) -> bool {
        self.entry.is_some()
    }

    pub fn cached_data(&self) -> Result<&Value, CacheUsageError> {
        self.entry
            .as_ref()
            .map(CacheEntry::data)
            .ok_or(CacheUsageError::NoCachedValue)
    }

    pub fn reset(&mut self) {
        self.key = None;
        self.entry = None;
    }
}

pub struct CacheController {
    kind: CacheKind,
    zone: Zone,
    expire: Option<Duration>,
    backend: BackendSlot,
}

impl CacheController {
    pub(crate) fn new(
        kind: CacheKind,
        zone: Zone,
        expire_seconds: Option<u64>,
        backend: BackendSlot,
    ) -> Self {
        let expire = expire_seconds
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
        Self {
            kind,
            zone,
            expire,
            backend,
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn expire(&self) -> Option<Duration> {
        self.expire
    }

    pub fn backend(&self) -> Option<&SharedBackend> {
        self.backend.get()
    }

    /// Fetch the entry for the state's key, discarding it if expired.
    pub fn read_cache(&self, state: &mut LookupState) -> Result<(), CacheUsageError> {
        let key = state.cache_key()?.clone();
        state.entry = self.fetch(&key);
        Ok(())
    }

    /// Delete the state's key from the backend and drop the held entry.
    pub fn delete(&self, state: &mut LookupState) -> Result<bool, CacheUsageError> {
        let key = state.cache_key()?;
        let removed = self
            .backend()
            .is_some_and(|backend| backend.delete(&self.zone, key));
        state.entry = None;
        Ok(removed)
    }

    /// Clear this cache's zone and drop the held entry.
    pub fn clear_zone(&self, state: &mut LookupState) -> bool {
        state.entry = None;
        let cleared = self
            .backend()
            .is_some_and(|backend| backend.clear_zone(&self.zone));
        info!(zone = %self.zone, kind = %self.kind, cleared, "cache zone cleared");
        cleared
    }

    /// Derive-and-read in one step: set `key` on the state and fetch it.
    pub(crate) fn lookup(&self, state: &mut LookupState, key: CacheKey) {
        state.entry = self.fetch(&key);
        state.key = Some(key);
    }

    fn fetch(&self, key: &CacheKey) -> Option<CacheEntry> {
        let Some(backend) = self.backend() else {
            debug!(kind = %self.kind, key = %key, "no backend configured; treating as miss");
            return None;
        };

        let entry = backend.get(&self.zone, key)?;
        if entry.is_expired(self.expire, OffsetDateTime::now_utc()) {
            info!(zone = %self.zone, kind = %self.kind, key = %key, outcome = "expired", "EXPIRED");
            counter!(METRIC_EXPIRED_TOTAL, "zone" => self.zone.to_string(), "kind" => self.kind.as_str())
                .increment(1);
            backend.delete(&self.zone, key);
            return None;
        }

        Some(entry)
    }

    /// Persist `data` under `key`. Failures are logged and reported as
    /// `false`; they never reach the request.
    pub(crate) fn write(&self, key: &CacheKey, data: Value) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };

        let entry = CacheEntry::new(data);
        match backend.set(&self.zone, key, &entry, self.expire) {
            Ok(()) => {
                debug!(zone = %self.zone, kind = %self.kind, key = %key, "cache entry stored");
                counter!(METRIC_WRITE_TOTAL, "zone" => self.zone.to_string(), "kind" => self.kind.as_str())
                    .increment(1);
                true
            }
            Err(err) => {
                warn!(
                    zone = %self.zone,
                    kind = %self.kind,
                    key = %key,
                    error = %err,
                    "failed to store cache entry"
                );
                counter!(
                    METRIC_WRITE_ERROR_TOTAL,
                    "zone" => self.zone.to_string(),
                    "kind" => self.kind.as_str()
                )
                .increment(1);
                false
            }
        }
    }

    pub(crate) fn record_outcome(&self, hit: bool) {
        let name = if hit { METRIC_HIT_TOTAL } else { METRIC_MISS_TOTAL };
        counter!(name, "zone" => self.zone.to_string(), "kind" => self.kind.as_str()).increment(1);
    }

    pub(crate) fn record_skipped_errors(&self) {
        counter!(
            METRIC_SKIPPED_ERRORS_TOTAL,
            "zone" => self.zone.to_string(),
            "kind" => self.kind.as_str()
        )
        .increment(1);
    }
}
