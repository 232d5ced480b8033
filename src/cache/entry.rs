//! Stored envelope around cached payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};

/// A cached payload together with the time it was written.
///
/// Wrapping the payload lets a store tell "absent" apart from a present
/// `false`, `0` or empty string, and lets expiration be evaluated outside
/// the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    data: Value,
    created_at: OffsetDateTime,
}

impl CacheEntry {
    /// Wrap `data`, stamped with the current time.
    pub fn new(data: Value) -> Self {
        Self::with_created_at(data, OffsetDateTime::now_utc())
    }

    pub fn with_created_at(data: Value, created_at: OffsetDateTime) -> Self {
        Self { data, created_at }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn age(&self, now: OffsetDateTime) -> Duration {
        now - self.created_at
    }

    /// True when the entry is older than `max_age`. Entries without a
    /// maximum age never expire.
    pub fn is_expired(&self, max_age: Option<Duration>, now: OffsetDateTime) -> bool {
        match max_age {
            Some(max_age) => self.age(now) > max_age,
            None => false,
        }
    }
}
