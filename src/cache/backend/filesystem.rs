use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use time::Duration;
use tracing::{debug, warn};

use crate::cache::entry::CacheEntry;
use crate::cache::error::BackendError;
use crate::cache::keys::{CacheKey, Zone};

use super::CacheBackend;

pub const DEFAULT_DIRECTORY: &str = "/tmp/graphql-cache";

/// Stores each entry as `<directory>/<zone>/<key>` holding the JSON encoded
/// envelope.
///
/// Writes land in a temporary file inside the zone directory and are then
/// renamed over the target, so readers observe either the old or the new
/// entry. Expiration hints are ignored.
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    directory: PathBuf,
}

impl FileSystemBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn zone_dir(&self, zone: &Zone) -> PathBuf {
        self.directory.join(zone.as_str())
    }

    fn entry_path(&self, zone: &Zone, key: &CacheKey) -> PathBuf {
        self.zone_dir(zone).join(key.as_str())
    }
}

impl Default for FileSystemBackend {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTORY)
    }
}

impl CacheBackend for FileSystemBackend {
    fn set(
        &self,
        zone: &Zone,
        key: &CacheKey,
        entry: &CacheEntry,
        _expire_hint: Option<Duration>,
    ) -> Result<(), BackendError> {
        let zone_dir = self.zone_dir(zone);
        create_private_dir(&zone_dir)?;

        let encoded = serde_json::to_vec(entry)?;

        // NamedTempFile is created 0600 on unix.
        let mut staged = NamedTempFile::new_in(&zone_dir)?;
        staged.write_all(&encoded)?;
        staged.flush()?;

        let path = self.entry_path(zone, key);
        staged.persist(&path).map_err(|err| err.error)?;

        debug!(zone = %zone, key = %key, path = %path.display(), "cache entry written");
        Ok(())
    }

    fn get(&self, zone: &Zone, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.entry_path(zone, key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(
                    zone = %zone,
                    key = %key,
                    path = %path.display(),
                    error = %err,
                    "failed to read cache entry; treating as miss"
                );
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(
                    zone = %zone,
                    key = %key,
                    path = %path.display(),
                    error = %err,
                    "unreadable cache entry; treating as miss"
                );
                None
            }
        }
    }

    fn delete(&self, zone: &Zone, key: &CacheKey) -> bool {
        let path = self.entry_path(zone, key);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to delete cache entry");
                false
            }
        }
    }

    fn clear_zone(&self, zone: &Zone) -> bool {
        remove_dir(&self.zone_dir(zone))
    }

    fn clear(&self) -> bool {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return false,
            Err(err) => {
                warn!(
                    directory = %self.directory.display(),
                    error = %err,
                    "failed to list cache zones"
                );
                return false;
            }
        };

        let mut removed = false;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                removed |= remove_dir(&path);
            }
        }
        removed
    }
}

/// Remove a zone directory; true when it held at least one entry.
fn remove_dir(path: &Path) -> bool {
    let had_entries = match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(err) if err.kind() == ErrorKind::NotFound => return false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to list cache zone");
            return false;
        }
    };

    match fs::remove_dir_all(path) {
        Ok(()) => had_entries,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to clear cache zone");
            false
        }
    }
}

fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}
