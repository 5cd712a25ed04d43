/*!
Access to element content at snapshot time.

When a snapshot is taken, every archived element is read through a [`Workspace`] by its
URI, checksummed if the document did not carry a checksum, and written into the primary
tier.
*/

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::{Result, StrataError};

/// Source of element content addressed by URI
pub trait Workspace: Send + Sync {
    fn read(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Reads `file://` URIs and plain paths from the local filesystem
///
/// Relative paths are resolved against the workspace root.
#[derive(Debug, Clone)]
pub struct FileWorkspace {
    root: PathBuf,
}

impl FileWorkspace {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let raw = uri.strip_prefix("file://").unwrap_or(uri);
        if raw.is_empty() {
            return Err(StrataError::validation("empty element URI"));
        }
        if let Some((scheme, _)) = raw.split_once("://") {
            return Err(StrataError::validation(format!(
                "unsupported URI scheme '{scheme}' in {uri}"
            )));
        }
        let path = Path::new(raw);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        })
    }
}

impl Default for FileWorkspace {
    fn default() -> Self {
        Self::new(".")
    }
}

impl Workspace for FileWorkspace {
    fn read(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.resolve(uri)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StrataError::not_found(format!("element content at {uri}")),
            _ => StrataError::Io(e),
        })
    }
}

/// In-memory workspace for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    content: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>, B: Into<Vec<u8>>>(&self, uri: S, data: B) {
        self.content
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(uri.into(), data.into());
    }

    pub fn with_content<S: Into<String>, B: Into<Vec<u8>>>(self, uri: S, data: B) -> Self {
        self.insert(uri, data);
        self
    }
}

impl Workspace for MemoryWorkspace {
    fn read(&self, uri: &str) -> Result<Vec<u8>> {
        self.content
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(uri)
            .cloned()
            .ok_or_else(|| StrataError::not_found(format!("element content at {uri}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_workspace_reads_relative_and_file_uris() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("track.mp4"), b"frames").unwrap();
        let workspace = FileWorkspace::new(dir.path());

        assert_eq!(workspace.read("track.mp4").unwrap(), b"frames");
        let absolute = format!("file://{}", dir.path().join("track.mp4").display());
        assert_eq!(workspace.read(&absolute).unwrap(), b"frames");
        assert!(workspace.read("missing.mp4").unwrap_err().is_not_found());
    }

    #[test]
    fn test_file_workspace_rejects_remote_schemes() {
        let workspace = FileWorkspace::default();
        assert!(matches!(
            workspace.read("http://example.com/a.mp4"),
            Err(StrataError::Validation(_))
        ));
    }

    #[test]
    fn test_memory_workspace() {
        let workspace = MemoryWorkspace::new().with_content("mem://a", b"abc".to_vec());
        assert_eq!(workspace.read("mem://a").unwrap(), b"abc");
        assert!(workspace.read("mem://b").unwrap_err().is_not_found());
    }
}
