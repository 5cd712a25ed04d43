/*!
Storage tiers for snapshot payloads.

This module defines the payload store abstraction (port) and its adapters. A tier is a
named payload store; the [`TierRegistry`] maps tier names to stores. Payloads are
addressed by [`StoragePath`]: organization, media package, version and element id.
*/

pub mod local;
pub mod registry;
#[cfg(feature = "s3")]
pub mod s3;

use crate::model::Version;
use crate::{Result, StrataError};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub use local::LocalFileStorage;
pub use registry::TierRegistry;
#[cfg(feature = "s3")]
pub use s3::S3PayloadStore;

/// Location of one payload inside a tier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath {
    pub organization_id: String,
    pub media_package_id: String,
    pub version: Version,
    pub element_id: String,
}

impl StoragePath {
    pub fn new<O, M, E>(organization_id: O, media_package_id: M, version: Version, element_id: E) -> Self
    where
        O: Into<String>,
        M: Into<String>,
        E: Into<String>,
    {
        Self {
            organization_id: organization_id.into(),
            media_package_id: media_package_id.into(),
            version,
            element_id: element_id.into(),
        }
    }

    /// Key prefix shared by every payload of one snapshot
    pub fn snapshot_prefix(organization_id: &str, media_package_id: &str, version: Version) -> String {
        format!("{organization_id}/{media_package_id}/{version}/")
    }

    /// `org/mp/version/element`
    pub fn key(&self) -> String {
        format!(
            "{}{}",
            Self::snapshot_prefix(&self.organization_id, &self.media_package_id, self.version),
            self.element_id
        )
    }

    /// Rejects components that would escape their directory or collide with the separator
    pub fn validate(&self) -> Result<()> {
        for (name, part) in [
            ("organization id", &self.organization_id),
            ("media package id", &self.media_package_id),
            ("element id", &self.element_id),
        ] {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(StrataError::validation(format!(
                    "invalid {name} in storage path: {part:?}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Payload storage abstraction implemented by every tier
///
/// Implementations must be safe to call from many threads. Errors that mean "try again
/// later" are reported as `StrataError::BackendUnavailable`; a missing payload is
/// `StrataError::NotFound`.
pub trait PayloadStore: Send + Sync {
    /// Short description of the backend, e.g. `local` or `s3`
    fn store_type(&self) -> &str;

    /// Write a payload, replacing any previous content at `path`
    fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()>;

    /// Read a payload
    fn get(&self, path: &StoragePath) -> Result<Vec<u8>>;

    /// Check whether a payload exists
    fn contains(&self, path: &StoragePath) -> Result<bool>;

    /// Remove a payload; removing a missing payload is not an error
    fn delete(&self, path: &StoragePath) -> Result<()>;

    /// Remove every payload of one snapshot version and return how many were removed
    fn delete_snapshot(&self, organization_id: &str, media_package_id: &str, version: Version)
        -> Result<usize>;

    /// Cheap reachability check used before a migration is accepted
    fn check_reachable(&self) -> Result<()> {
        Ok(())
    }
}

/// Memory-based payload store
///
/// Keeps payloads in a HashMap. Used for tests and as a scratch tier; it can be switched
/// offline to simulate an unreachable backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Bytes>>,
    offline: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `BackendUnavailable` until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted keys of all stored payloads
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StrataError::backend_unavailable("memory store is offline"))
        } else {
            Ok(())
        }
    }
}

impl PayloadStore for MemoryStorage {
    fn store_type(&self) -> &str {
        "memory"
    }

    fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        self.ensure_online()?;
        self.lock().insert(path.key(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        self.ensure_online()?;
        self.lock()
            .get(&path.key())
            .map(|b| b.to_vec())
            .ok_or_else(|| StrataError::not_found(format!("payload {path}")))
    }

    fn contains(&self, path: &StoragePath) -> Result<bool> {
        self.ensure_online()?;
        Ok(self.lock().contains_key(&path.key()))
    }

    fn delete(&self, path: &StoragePath) -> Result<()> {
        self.ensure_online()?;
        self.lock().remove(&path.key());
        Ok(())
    }

    fn delete_snapshot(
        &self,
        organization_id: &str,
        media_package_id: &str,
        version: Version,
    ) -> Result<usize> {
        self.ensure_online()?;
        let prefix = StoragePath::snapshot_prefix(organization_id, media_package_id, version);
        let mut data = self.lock();
        let before = data.len();
        data.retain(|key, _| !key.starts_with(&prefix));
        Ok(before - data.len())
    }

    fn check_reachable(&self) -> Result<()> {
        self.ensure_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(element: &str) -> StoragePath {
        StoragePath::new("org", "mp-1", Version(2), element)
    }

    #[test]
    fn test_storage_path_key() {
        assert_eq!(path("track-1").key(), "org/mp-1/2/track-1");
        assert_eq!(
            StoragePath::snapshot_prefix("org", "mp-1", Version(2)),
            "org/mp-1/2/"
        );
    }

    #[test]
    fn test_storage_path_validation() {
        assert!(path("track-1").validate().is_ok());
        assert!(path("..").validate().is_err());
        assert!(path("a/b").validate().is_err());
        assert!(StoragePath::new("", "mp", Version(0), "e").validate().is_err());
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();

        storage.put(&path("t1"), b"payload").unwrap();
        assert!(storage.contains(&path("t1")).unwrap());
        assert_eq!(storage.get(&path("t1")).unwrap(), b"payload");

        storage.delete(&path("t1")).unwrap();
        assert!(!storage.contains(&path("t1")).unwrap());
        assert!(storage.get(&path("t1")).unwrap_err().is_not_found());
        // deleting again is fine
        storage.delete(&path("t1")).unwrap();
    }

    #[test]
    fn test_memory_delete_snapshot_only_touches_one_version() {
        let storage = MemoryStorage::new();
        storage.put(&path("t1"), b"a").unwrap();
        storage.put(&path("t2"), b"b").unwrap();
        storage
            .put(&StoragePath::new("org", "mp-1", Version(3), "t1"), b"c")
            .unwrap();

        assert_eq!(storage.delete_snapshot("org", "mp-1", Version(2)).unwrap(), 2);
        assert_eq!(storage.keys(), vec!["org/mp-1/3/t1".to_string()]);
    }

    #[test]
    fn test_offline_memory_storage() {
        let storage = MemoryStorage::new();
        storage.set_offline(true);
        assert!(matches!(
            storage.put(&path("t1"), b"x"),
            Err(StrataError::BackendUnavailable(_))
        ));
        assert!(storage.check_reachable().is_err());
        storage.set_offline(false);
        assert!(storage.check_reachable().is_ok());
    }
}
