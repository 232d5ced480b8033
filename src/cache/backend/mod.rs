//! Storage backends.
//!
//! A backend stores one [`CacheEntry`] per `(zone, key)` pair. Expiration
//! hints are advisory: controllers re-check entry age on every read, so a
//! backend without native expiry simply ignores them.

mod filesystem;
mod memory;

use std::sync::Arc;

use time::Duration;

use super::entry::CacheEntry;
use super::error::BackendError;
use super::keys::{CacheKey, Zone};

pub use filesystem::{DEFAULT_DIRECTORY, FileSystemBackend};
pub use memory::MemoryBackend;

/// Key/value store partitioned by zone.
///
/// Implementations must be safe for concurrent use by unrelated requests and
/// must publish writes atomically per key: a concurrent reader sees either
/// the previous entry or the new one in full. Read, delete and clear
/// failures are reported as absence (`None` / `false`), never as errors.
pub trait CacheBackend: Send + Sync {
    fn set(
        &self,
        zone: &Zone,
        key: &CacheKey,
        entry: &CacheEntry,
        expire_hint: Option<Duration>,
    ) -> Result<(), BackendError>;

    fn get(&self, zone: &Zone, key: &CacheKey) -> Option<CacheEntry>;

    /// Remove one entry. Returns whether something was removed.
    fn delete(&self, zone: &Zone, key: &CacheKey) -> bool;

    /// Remove every entry in `zone`. Returns whether anything was removed.
    fn clear_zone(&self, zone: &Zone) -> bool;

    /// Remove every entry in every zone.
    fn clear(&self) -> bool;
}

pub type SharedBackend = Arc<dyn CacheBackend>;
