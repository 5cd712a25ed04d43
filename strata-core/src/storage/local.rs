/*!
Local filesystem tier.
*/

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{PayloadStore, StoragePath};
use crate::model::Version;
use crate::{Result, StrataError};
use tracing::debug;

/// Local filesystem payload store
///
/// Payloads live at `<base_dir>/<org>/<media package>/<version>/<element>`. Writes go to a
/// temporary file in the target directory first and are renamed into place, so a reader
/// never observes a half written payload.
///
/// # Example
/// ```rust
/// use strata_core::storage::{LocalFileStorage, PayloadStore, StoragePath};
/// use strata_core::model::Version;
///
/// let dir = tempfile::tempdir()?;
/// let storage = LocalFileStorage::new(dir.path());
/// let path = StoragePath::new("org", "mp-1", Version(0), "track-1");
/// storage.put(&path, b"media bytes")?;
/// assert_eq!(storage.get(&path)?, b"media bytes");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
}

impl LocalFileStorage {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &StoragePath) -> Result<PathBuf> {
        path.validate()?;
        Ok(self
            .base_dir
            .join(&path.organization_id)
            .join(&path.media_package_id)
            .join(path.version.to_string())
            .join(&path.element_id))
    }

    fn snapshot_dir(&self, organization_id: &str, media_package_id: &str, version: Version) -> PathBuf {
        self.base_dir
            .join(organization_id)
            .join(media_package_id)
            .join(version.to_string())
    }

    fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StrataError::storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

impl PayloadStore for LocalFileStorage {
    fn store_type(&self) -> &str {
        "local"
    }

    fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        let full_path = self.resolve(path)?;
        self.ensure_parent_dir(&full_path)?;

        let dir = full_path.parent().unwrap_or(&self.base_dir);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&full_path).map_err(|e| {
            StrataError::storage(format!(
                "Failed to write payload to {}: {}",
                full_path.display(),
                e.error
            ))
        })?;

        debug!(path = %full_path.display(), size = data.len(), "Wrote payload");
        Ok(())
    }

    fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        let full_path = self.resolve(path)?;
        fs::read(&full_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StrataError::not_found(format!("payload {path}")),
            _ => StrataError::storage(format!(
                "Failed to read payload from {}: {}",
                full_path.display(),
                e
            )),
        })
    }

    fn contains(&self, path: &StoragePath) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    fn delete(&self, path: &StoragePath) -> Result<()> {
        let full_path = self.resolve(path)?;
        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::storage(format!(
                "Failed to delete payload {}: {}",
                full_path.display(),
                e
            ))),
        }
    }

    fn delete_snapshot(
        &self,
        organization_id: &str,
        media_package_id: &str,
        version: Version,
    ) -> Result<usize> {
        // validates the components the same way single payload paths are validated
        StoragePath::new(organization_id, media_package_id, version, "_").validate()?;
        let dir = self.snapshot_dir(organization_id, media_package_id, version);
        if !dir.is_dir() {
            return Ok(0);
        }
        let removed = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .count();
        fs::remove_dir_all(&dir).map_err(|e| {
            StrataError::storage(format!("Failed to delete {}: {}", dir.display(), e))
        })?;
        Ok(removed)
    }

    fn check_reachable(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).map_err(|e| {
            StrataError::backend_unavailable(format!(
                "local tier at {} is not writable: {}",
                self.base_dir.display(),
                e
            ))
        })
    }
}
