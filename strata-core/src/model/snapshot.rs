/*!
Snapshot rows and versions.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::MediaPackage;
use crate::StrataError;

/// Owner tag used when the caller does not name one
pub const DEFAULT_OWNER: &str = "default";

/// Per media package version number, assigned when a snapshot is taken
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub const FIRST: Version = Version(0);

    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Version(v)
    }
}

impl FromStr for Version {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .trim_start_matches('v')
            .parse::<u64>()
            .map(Version)
            .map_err(|_| StrataError::validation(format!("not a version: {s:?}")))
    }
}

/// Primary key of a snapshot row
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub media_package_id: String,
    pub version: Version,
}

impl SnapshotKey {
    pub fn new<S: Into<String>>(media_package_id: S, version: Version) -> Self {
        Self {
            media_package_id: media_package_id.into(),
            version,
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.media_package_id, self.version)
    }
}

/// One preserved state of a media package.
///
/// Everything except `storage_tier` and `row_version` is fixed at creation.
/// `row_version` increments on every tier change and backs optimistic updates.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub media_package_id: String,
    pub version: Version,
    pub owner: String,
    pub organization_id: String,
    pub created_at: DateTime<Utc>,
    pub storage_tier: String,
    #[serde(default)]
    pub row_version: u64,
    pub document: MediaPackage,
}

impl Snapshot {
    pub fn new<O, G, T>(
        document: MediaPackage,
        version: Version,
        owner: O,
        organization_id: G,
        storage_tier: T,
    ) -> Self
    where
        O: Into<String>,
        G: Into<String>,
        T: Into<String>,
    {
        Self {
            media_package_id: document.id.clone(),
            version,
            owner: owner.into(),
            organization_id: organization_id.into(),
            created_at: Utc::now(),
            storage_tier: storage_tier.into(),
            row_version: 0,
            document,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.media_package_id.clone(), self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!("3".parse::<Version>().unwrap(), Version(3));
        assert_eq!("v12".parse::<Version>().unwrap(), Version(12));
        assert!("latest".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version(1) < Version(2));
        assert_eq!(Version::FIRST.next(), Version(1));
    }

    #[test]
    fn test_snapshot_takes_id_from_document() {
        let snapshot = Snapshot::new(MediaPackage::new("mp-9"), Version(4), "default", "org", "local");
        assert_eq!(snapshot.media_package_id, "mp-9");
        assert_eq!(snapshot.key().to_string(), "mp-9@v4");
        assert_eq!(snapshot.row_version, 0);
    }

    #[test]
    fn test_snapshot_serialization_roundtrip() {
        let snapshot = Snapshot::new(MediaPackage::new("mp-9"), Version(1), "default", "org", "local");
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
