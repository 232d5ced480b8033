use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use time::Duration;
use tracing::debug;

use crate::cache::entry::CacheEntry;
use crate::cache::error::BackendError;
use crate::cache::keys::{CacheKey, Zone};
use crate::cache::lock::RecoverLock;

use super::CacheBackend;

struct Slot {
    entry: CacheEntry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now <= deadline)
    }
}

/// In-process store, shared by every request of the process.
///
/// Honors expiration hints natively: a slot past its hint is dropped the
/// next time it is looked at.
#[derive(Default)]
pub struct MemoryBackend {
    zones: RwLock<HashMap<Zone, HashMap<String, Slot>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all zones, including lapsed ones not
    /// looked at since.
    pub fn len(&self) -> usize {
        self.zones
            .read_recover("memory.len")
            .values()
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryBackend {
    fn set(
        &self,
        zone: &Zone,
        key: &CacheKey,
        entry: &CacheEntry,
        expire_hint: Option<Duration>,
    ) -> Result<(), BackendError> {
        let expires_at = expire_hint
            .and_then(|hint| std::time::Duration::try_from(hint).ok())
            .and_then(|hint| Instant::now().checked_add(hint));

        self.zones
            .write_recover("memory.set")
            .entry(zone.clone())
            .or_default()
            .insert(
                key.as_str().to_string(),
                Slot {
                    entry: entry.clone(),
                    expires_at,
                },
            );
        Ok(())
    }

    fn get(&self, zone: &Zone, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        {
            let zones = self.zones.read_recover("memory.get");
            match zones.get(zone).and_then(|entries| entries.get(key.as_str())) {
                None => return None,
                Some(slot) if slot.is_live(now) => return Some(slot.entry.clone()),
                Some(_) => {}
            }
        }

        debug!(zone = %zone, key = %key, "dropping entry past its expiration hint");
        self.delete(zone, key);
        None
    }

    fn delete(&self, zone: &Zone, key: &CacheKey) -> bool {
        self.zones
            .write_recover("memory.delete")
            .get_mut(zone)
            .is_some_and(|entries| entries.remove(key.as_str()).is_some())
    }

    fn clear_zone(&self, zone: &Zone) -> bool {
        self.zones
            .write_recover("memory.clear_zone")
            .remove(zone)
            .is_some_and(|entries| !entries.is_empty())
    }

    fn clear(&self) -> bool {
        let mut zones = self.zones.write_recover("memory.clear");
        let removed = zones.values().any(|entries| !entries.is_empty());
        zones.clear();
        removed
    }
}
