/*!
Snapshot repository: the durable table of snapshot rows.

Rows are keyed by organization and `(media_package_id, version)`. Every read and write is
scoped to one organization: rows, version claims and properties of other organizations
behave exactly like missing ones.

Committed snapshot mutations are published to subscribed [`ChangeListener`]s, one
[`ChangeEvent`] per mutation, after the mutation is visible to readers.
*/

pub mod memory;

use serde::Serialize;
use std::sync::Arc;

use crate::model::{Property, Snapshot, SnapshotKey, Version};
use crate::Result;

pub use memory::MemorySnapshotRepository;

/// One committed repository mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    Created {
        organization_id: String,
        key: SnapshotKey,
        storage_tier: String,
    },
    TierChanged {
        organization_id: String,
        key: SnapshotKey,
        from: String,
        to: String,
    },
    Deleted {
        organization_id: String,
        key: SnapshotKey,
    },
}

impl ChangeEvent {
    pub fn key(&self) -> &SnapshotKey {
        match self {
            ChangeEvent::Created { key, .. }
            | ChangeEvent::TierChanged { key, .. }
            | ChangeEvent::Deleted { key, .. } => key,
        }
    }
}

/// Receives the change feed, e.g. to keep a search index in sync
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event)
    }
}

/// Persistent store of snapshot rows
pub trait SnapshotRepository: Send + Sync {
    /// Atomically claim the next version number of a media package
    ///
    /// Claimed numbers are never handed out twice within the organization, even after the
    /// snapshot that used one is deleted.
    fn claim_version(&self, organization_id: &str, media_package_id: &str) -> Result<Version>;

    /// Insert a new row; `Conflict` if the organization already has the key
    fn put(&self, snapshot: Snapshot) -> Result<()>;

    fn get(&self, organization_id: &str, media_package_id: &str, version: Version) -> Result<Snapshot>;

    /// Highest existing version; `NotFound` if the media package has no visible snapshot
    fn latest_version(&self, organization_id: &str, media_package_id: &str) -> Result<Version>;

    /// Remove one row and return it as it was at removal time
    ///
    /// `None` when there was nothing to delete. The returned row names the tier that held
    /// the payloads when the row went away, which may differ from an earlier read if a
    /// migration committed in between.
    fn delete(&self, organization_id: &str, media_package_id: &str, version: Version) -> Result<Option<Snapshot>>;

    /// Change the storage tier of a row if its `row_version` still equals `expected_row_version`
    ///
    /// Returns the updated row. `StaleWrite` if the row changed since it was read,
    /// `NotFound` if it is gone.
    fn update_tier(
        &self,
        organization_id: &str,
        media_package_id: &str,
        version: Version,
        expected_row_version: u64,
        new_tier: &str,
    ) -> Result<Snapshot>;

    /// Every row visible to `organization_id`, ordered by key
    fn scan(&self, organization_id: &str) -> Result<Vec<Snapshot>>;

    /// Number of distinct media packages with at least one snapshot
    fn count_media_packages(&self, organization_id: &str) -> Result<usize>;

    /// Insert or replace a property
    ///
    /// Returns `false`, storing nothing, when the media package has no snapshot.
    fn save_property(&self, organization_id: &str, property: Property) -> Result<bool>;

    /// Properties of a media package, ordered by namespace and name; all namespaces when
    /// `namespace` is `None`
    fn select_properties(
        &self,
        organization_id: &str,
        media_package_id: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<Property>>;

    /// Remove properties of a media package; returns how many were removed
    fn delete_properties(
        &self,
        organization_id: &str,
        media_package_id: &str,
        namespace: Option<&str>,
    ) -> Result<usize>;

    fn subscribe(&self, listener: Arc<dyn ChangeListener>);
}
