use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Lock access that survives a panic in another thread.
///
/// Cache state behind a poisoned lock is still structurally valid, so the
/// guard is recovered and the event logged instead of failing the request.
pub(crate) trait RecoverLock<T> {
    fn read_recover(&self, op: &'static str) -> RwLockReadGuard<'_, T>;
    fn write_recover(&self, op: &'static str) -> RwLockWriteGuard<'_, T>;
}

impl<T> RecoverLock<T> for RwLock<T> {
    fn read_recover(&self, op: &'static str) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| {
            log_poisoned(op, "rwlock.read");
            poisoned.into_inner()
        })
    }

    fn write_recover(&self, op: &'static str) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| {
            log_poisoned(op, "rwlock.write");
            poisoned.into_inner()
        })
    }
}

pub(crate) trait RecoverMutex<T> {
    fn lock_recover(&self, op: &'static str) -> MutexGuard<'_, T>;
}

impl<T> RecoverMutex<T> for Mutex<T> {
    fn lock_recover(&self, op: &'static str) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            log_poisoned(op, "mutex");
            poisoned.into_inner()
        })
    }
}

fn log_poisoned(op: &'static str, lock_kind: &'static str) {
    warn!(
        op,
        lock_kind,
        result = "poisoned_recovered",
        "Recovered from poisoned cache lock"
    );
}
