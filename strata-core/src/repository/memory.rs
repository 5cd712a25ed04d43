/*!
In-process snapshot repository with an optional on-disk index.
*/

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use super::{ChangeEvent, ChangeListener, SnapshotRepository};
use crate::compression::{Compressor, GzipCompressor};
use crate::model::{Property, PropertyId, PropertyValue, Snapshot, SnapshotKey, Version};
use crate::{Result, StrataError};

const INDEX_FORMAT: u32 = 2;

/// Organization plus snapshot key
type RowKey = (String, SnapshotKey);

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<RowKey, Snapshot>,
    /// Next unclaimed version per organization and media package
    next_versions: HashMap<(String, String), u64>,
    properties: BTreeMap<(String, PropertyId), PropertyValue>,
}

impl Table {
    fn row_key(organization_id: &str, media_package_id: &str, version: Version) -> RowKey {
        (
            organization_id.to_string(),
            SnapshotKey::new(media_package_id, version),
        )
    }

    fn key_range(organization_id: &str, media_package_id: &str) -> RangeInclusive<RowKey> {
        Self::row_key(organization_id, media_package_id, Version(0))
            ..=Self::row_key(organization_id, media_package_id, Version(u64::MAX))
    }

    fn visible(&self, organization_id: &str, media_package_id: &str, version: Version) -> Option<&Snapshot> {
        self.rows
            .get(&Self::row_key(organization_id, media_package_id, version))
    }

    fn max_version(&self, organization_id: &str, media_package_id: &str) -> Option<Version> {
        self.rows
            .range(Self::key_range(organization_id, media_package_id))
            .next_back()
            .map(|((_, key), _)| key.version)
    }

    fn has_snapshot(&self, organization_id: &str, media_package_id: &str) -> bool {
        self.max_version(organization_id, media_package_id).is_some()
    }

    fn tenant_rows<'a>(&'a self, organization_id: &'a str) -> impl Iterator<Item = &'a Snapshot> + 'a {
        self.rows
            .range(Self::row_key(organization_id, "", Version(0))..)
            .take_while(move |((org, _), _)| org == organization_id)
            .map(|(_, snapshot)| snapshot)
    }

    fn properties_of<'a>(
        &'a self,
        organization_id: &'a str,
        media_package_id: &'a str,
        namespace: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a (String, PropertyId), &'a PropertyValue)> + 'a {
        let start = (organization_id.to_string(), PropertyId::new(media_package_id, "", ""));
        self.properties
            .range(start..)
            .take_while(move |((org, id), _)| org == organization_id && id.media_package_id == media_package_id)
            .filter(move |((_, id), _)| namespace.map_or(true, |ns| id.namespace == ns))
    }
}

/// On-disk form of the table
#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    format: u32,
    compression: String,
    rows: Vec<Snapshot>,
    claims: Vec<VersionClaim>,
    #[serde(default)]
    properties: Vec<StoredProperty>,
}

#[derive(Serialize, Deserialize)]
struct VersionClaim {
    organization_id: String,
    media_package_id: String,
    next: u64,
}

#[derive(Serialize, Deserialize)]
struct StoredProperty {
    organization_id: String,
    property: Property,
}

/// Snapshot repository backed by an in-memory table
///
/// All mutations go through one mutex, which makes version claims and unique-key inserts
/// atomic. When opened with [`MemorySnapshotRepository::persistent`], the whole table is
/// written as a gzip-compressed JSON index after every committed mutation, replacing the
/// previous index atomically. A mutation whose index write fails is not applied.
pub struct MemorySnapshotRepository {
    table: Mutex<Table>,
    index_path: Option<PathBuf>,
    compressor: GzipCompressor,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl std::fmt::Debug for MemorySnapshotRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySnapshotRepository")
            .field("rows", &self.lock().rows.len())
            .field("index_path", &self.index_path)
            .finish()
    }
}

impl Default for MemorySnapshotRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySnapshotRepository {
    /// Volatile repository
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            index_path: None,
            compressor: GzipCompressor::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Repository persisted at `index_path`, loading the existing index if there is one
    pub fn persistent<P: AsRef<Path>>(index_path: P) -> Result<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        let compressor = GzipCompressor::new();
        let table = if index_path.exists() {
            load_index(&index_path, &compressor)?
        } else {
            Table::default()
        };
        info!(
            path = %index_path.display(),
            rows = table.rows.len(),
            properties = table.properties.len(),
            "Opened snapshot index"
        );
        Ok(Self {
            table: Mutex::new(table),
            index_path: Some(index_path),
            compressor,
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Number of rows across all organizations
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `mutate` under the table lock, persist, then publish its event
    fn commit<R, F>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut Table) -> Result<(R, Option<ChangeEvent>)>,
    {
        let (value, event) = {
            let mut table = self.lock();
            match &self.index_path {
                None => mutate(&mut table)?,
                Some(path) => {
                    let mut staged = table.clone();
                    let outcome = mutate(&mut staged)?;
                    save_index(path, &staged, &self.compressor)?;
                    *table = staged;
                    outcome
                }
            }
        };

        if let Some(event) = event {
            self.publish(&event);
        }
        Ok(value)
    }

    fn publish(&self, event: &ChangeEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener.on_change(event);
        }
    }
}

impl SnapshotRepository for MemorySnapshotRepository {
    fn claim_version(&self, organization_id: &str, media_package_id: &str) -> Result<Version> {
        let version = self.commit(|table| {
            let floor = table
                .max_version(organization_id, media_package_id)
                .map_or(0, |v| v.0 + 1);
            let claim = (organization_id.to_string(), media_package_id.to_string());
            let next = table.next_versions.get(&claim).copied().unwrap_or(0).max(floor);
            table.next_versions.insert(claim, next + 1);
            Ok((Version(next), None))
        })?;
        debug!(
            organization_id = %organization_id,
            media_package_id = %media_package_id,
            version = %version,
            "Claimed version"
        );
        Ok(version)
    }

    fn put(&self, snapshot: Snapshot) -> Result<()> {
        self.commit(|table| {
            let key = snapshot.key();
            let row_key = (snapshot.organization_id.clone(), key.clone());
            if table.rows.contains_key(&row_key) {
                return Err(StrataError::conflict(format!("snapshot {key} already exists")));
            }
            // a row inserted with an explicit version also consumes that number
            let next = table
                .next_versions
                .entry((snapshot.organization_id.clone(), key.media_package_id.clone()))
                .or_insert(0);
            *next = (*next).max(key.version.0 + 1);

            let event = ChangeEvent::Created {
                organization_id: snapshot.organization_id.clone(),
                key,
                storage_tier: snapshot.storage_tier.clone(),
            };
            table.rows.insert(row_key, snapshot);
            Ok(((), Some(event)))
        })
    }

    fn get(&self, organization_id: &str, media_package_id: &str, version: Version) -> Result<Snapshot> {
        self.lock()
            .visible(organization_id, media_package_id, version)
            .cloned()
            .ok_or_else(|| {
                StrataError::not_found(format!("snapshot {media_package_id}@v{version}"))
            })
    }

    fn latest_version(&self, organization_id: &str, media_package_id: &str) -> Result<Version> {
        self.lock()
            .max_version(organization_id, media_package_id)
            .ok_or_else(|| StrataError::not_found(format!("media package {media_package_id}")))
    }

    fn delete(&self, organization_id: &str, media_package_id: &str, version: Version) -> Result<Option<Snapshot>> {
        if self.lock().visible(organization_id, media_package_id, version).is_none() {
            return Ok(None);
        }
        self.commit(|table| {
            let row_key = Table::row_key(organization_id, media_package_id, version);
            let Some(removed) = table.rows.remove(&row_key) else {
                return Ok((None, None));
            };
            let event = ChangeEvent::Deleted {
                organization_id: organization_id.to_string(),
                key: row_key.1,
            };
            Ok((Some(removed), Some(event)))
        })
    }

    fn update_tier(
        &self,
        organization_id: &str,
        media_package_id: &str,
        version: Version,
        expected_row_version: u64,
        new_tier: &str,
    ) -> Result<Snapshot> {
        self.commit(|table| {
            let key = SnapshotKey::new(media_package_id, version);
            let row = table
                .rows
                .get_mut(&(organization_id.to_string(), key.clone()))
                .ok_or_else(|| StrataError::not_found(format!("snapshot {key}")))?;

            if row.row_version != expected_row_version {
                return Err(StrataError::stale_write(format!(
                    "snapshot {key} changed (row version {} != {})",
                    row.row_version, expected_row_version
                )));
            }

            let from = std::mem::replace(&mut row.storage_tier, new_tier.to_string());
            row.row_version += 1;
            let updated = row.clone();
            Ok((
                updated,
                Some(ChangeEvent::TierChanged {
                    organization_id: organization_id.to_string(),
                    key,
                    from,
                    to: new_tier.to_string(),
                }),
            ))
        })
    }

    fn scan(&self, organization_id: &str) -> Result<Vec<Snapshot>> {
        Ok(self.lock().tenant_rows(organization_id).cloned().collect())
    }

    fn count_media_packages(&self, organization_id: &str) -> Result<usize> {
        let table = self.lock();
        let ids: BTreeSet<&str> = table
            .tenant_rows(organization_id)
            .map(|s| s.media_package_id.as_str())
            .collect();
        Ok(ids.len())
    }

    fn save_property(&self, organization_id: &str, property: Property) -> Result<bool> {
        property.id.validate()?;
        if !self
            .lock()
            .has_snapshot(organization_id, &property.id.media_package_id)
        {
            debug!(property = %property.id, "No snapshot to attach property to");
            return Ok(false);
        }
        self.commit(|table| {
            if !table.has_snapshot(organization_id, &property.id.media_package_id) {
                return Ok((false, None));
            }
            table
                .properties
                .insert((organization_id.to_string(), property.id), property.value);
            Ok((true, None))
        })
    }

    fn select_properties(
        &self,
        organization_id: &str,
        media_package_id: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<Property>> {
        Ok(self
            .lock()
            .properties_of(organization_id, media_package_id, namespace)
            .map(|((_, id), value)| Property::new(id.clone(), value.clone()))
            .collect())
    }

    fn delete_properties(
        &self,
        organization_id: &str,
        media_package_id: &str,
        namespace: Option<&str>,
    ) -> Result<usize> {
        let doomed: Vec<(String, PropertyId)> = self
            .lock()
            .properties_of(organization_id, media_package_id, namespace)
            .map(|(key, _)| key.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        self.commit(|table| {
            let removed = doomed
                .iter()
                .filter(|key| table.properties.remove(*key).is_some())
                .count();
            Ok((removed, None))
        })
    }

    fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }
}

fn load_index(path: &Path, compressor: &GzipCompressor) -> Result<Table> {
    let compressed = std::fs::read(path)?;
    let json = compressor.decompress(&compressed)?;
    let index: PersistedIndex = serde_json::from_slice(&json)?;
    if index.format != INDEX_FORMAT || index.compression != compressor.algorithm_name() {
        return Err(StrataError::invalid_format(format!(
            "unsupported snapshot index format {} ({}) in {}",
            index.format,
            index.compression,
            path.display()
        )));
    }

    let mut table = Table {
        next_versions: index
            .claims
            .into_iter()
            .map(|c| ((c.organization_id, c.media_package_id), c.next))
            .collect(),
        properties: index
            .properties
            .into_iter()
            .map(|p| ((p.organization_id, p.property.id), p.property.value))
            .collect(),
        ..Table::default()
    };
    for snapshot in index.rows {
        let key = snapshot.key();
        if table
            .rows
            .insert((snapshot.organization_id.clone(), key.clone()), snapshot)
            .is_some()
        {
            return Err(StrataError::invalid_format(format!(
                "duplicate snapshot {key} in {}",
                path.display()
            )));
        }
    }
    Ok(table)
}

fn save_index(path: &Path, table: &Table, compressor: &GzipCompressor) -> Result<()> {
    let index = PersistedIndex {
        format: INDEX_FORMAT,
        compression: compressor.algorithm_name().to_string(),
        rows: table.rows.values().cloned().collect(),
        claims: table
            .next_versions
            .iter()
            .map(|((org, id), next)| VersionClaim {
                organization_id: org.clone(),
                media_package_id: id.clone(),
                next: *next,
            })
            .collect(),
        properties: table
            .properties
            .iter()
            .map(|((org, id), value)| StoredProperty {
                organization_id: org.clone(),
                property: Property::new(id.clone(), value.clone()),
            })
            .collect(),
    };
    let json = serde_json::to_vec(&index)?;
    let compressed = compressor.compress(&json)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&compressed)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        StrataError::storage(format!(
            "Failed to write snapshot index {}: {}",
            path.display(),
            e.error
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaPackage;

    fn snapshot(org: &str, id: &str, version: u64) -> Snapshot {
        Snapshot::new(MediaPackage::new(id), Version(version), "default", org, "hot")
    }

    #[test]
    fn test_put_get_and_conflict() {
        let repo = MemorySnapshotRepository::new();
        repo.put(snapshot("org", "mp-1", 0)).unwrap();

        let row = repo.get("org", "mp-1", Version(0)).unwrap();
        assert_eq!(row.storage_tier, "hot");
        assert!(matches!(
            repo.put(snapshot("org", "mp-1", 0)),
            Err(StrataError::Conflict(_))
        ));
    }

    #[test]
    fn test_other_tenant_sees_nothing() {
        let repo = MemorySnapshotRepository::new();
        repo.put(snapshot("org-a", "mp-1", 0)).unwrap();

        assert!(repo.get("org-b", "mp-1", Version(0)).unwrap_err().is_not_found());
        assert!(repo.latest_version("org-b", "mp-1").unwrap_err().is_not_found());
        assert!(repo.delete("org-b", "mp-1", Version(0)).unwrap().is_none());
        assert!(repo.scan("org-b").unwrap().is_empty());
        assert!(matches!(
            repo.update_tier("org-b", "mp-1", Version(0), 0, "cold"),
            Err(StrataError::NotFound(_))
        ));
        assert_eq!(repo.count_media_packages("org-b").unwrap(), 0);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_tenants_number_versions_independently() {
        let repo = MemorySnapshotRepository::new();
        for _ in 0..3 {
            let v = repo.claim_version("org-a", "mp-1").unwrap();
            repo.put(snapshot("org-a", "mp-1", v.0)).unwrap();
        }

        // the same id in another organization starts from scratch and never conflicts
        let v = repo.claim_version("org-b", "mp-1").unwrap();
        assert_eq!(v, Version(0));
        repo.put(snapshot("org-b", "mp-1", v.0)).unwrap();
        assert_eq!(repo.latest_version("org-b", "mp-1").unwrap(), Version(0));
        assert_eq!(repo.latest_version("org-a", "mp-1").unwrap(), Version(2));

        assert!(repo.delete("org-b", "mp-1", Version(0)).unwrap().is_some());
        assert_eq!(repo.get("org-a", "mp-1", Version(0)).unwrap().organization_id, "org-a");
        assert_eq!(repo.claim_version("org-a", "mp-1").unwrap(), Version(3));
    }

    #[test]
    fn test_claims_are_never_reused() {
        let repo = MemorySnapshotRepository::new();
        for expected in 0..3 {
            let v = repo.claim_version("org", "mp-1").unwrap();
            assert_eq!(v, Version(expected));
            repo.put(snapshot("org", "mp-1", v.0)).unwrap();
        }

        assert!(repo.delete("org", "mp-1", Version(2)).unwrap().is_some());
        assert_eq!(repo.latest_version("org", "mp-1").unwrap(), Version(1));
        assert_eq!(repo.claim_version("org", "mp-1").unwrap(), Version(3));
        assert_eq!(repo.claim_version("org", "mp-2").unwrap(), Version(0));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let repo = MemorySnapshotRepository::new();
        repo.put(snapshot("org", "mp-1", 0)).unwrap();
        assert!(repo.delete("org", "mp-1", Version(0)).unwrap().is_some());
        assert!(repo.delete("org", "mp-1", Version(0)).unwrap().is_none());
        assert!(repo.latest_version("org", "mp-1").is_err());
    }

    #[test]
    fn test_delete_returns_row_as_last_committed() {
        let repo = MemorySnapshotRepository::new();
        repo.put(snapshot("org", "mp-1", 0)).unwrap();
        let read_earlier = repo.get("org", "mp-1", Version(0)).unwrap();
        repo.update_tier("org", "mp-1", Version(0), 0, "cold").unwrap();

        let removed = repo.delete("org", "mp-1", Version(0)).unwrap().unwrap();
        assert_eq!(read_earlier.storage_tier, "hot");
        assert_eq!(removed.storage_tier, "cold");
        assert_eq!(removed.row_version, 1);
    }

    #[test]
    fn test_properties_need_a_snapshot_and_stay_in_their_tenant() {
        let repo = MemorySnapshotRepository::new();
        let state = Property::new(PropertyId::new("mp-1", "workflow", "state"), "running");
        assert!(!repo.save_property("org", state.clone()).unwrap());

        repo.put(snapshot("org", "mp-1", 0)).unwrap();
        repo.put(snapshot("org", "mp-10", 0)).unwrap();
        assert!(repo.save_property("org", state).unwrap());
        assert!(repo
            .save_property("org", Property::new(PropertyId::new("mp-1", "workflow", "state"), "done"))
            .unwrap());
        assert!(repo
            .save_property("org", Property::new(PropertyId::new("mp-1", "acl", "admin:read"), true))
            .unwrap());
        assert!(repo
            .save_property("org", Property::new(PropertyId::new("mp-10", "workflow", "state"), 1i64))
            .unwrap());

        let all = repo.select_properties("org", "mp-1", None).unwrap();
        let names: Vec<String> = all.iter().map(|p| p.id.to_string()).collect();
        assert_eq!(names, vec!["mp-1/acl:admin:read", "mp-1/workflow:state"]);
        let workflow = repo.select_properties("org", "mp-1", Some("workflow")).unwrap();
        assert_eq!(workflow.len(), 1);
        assert_eq!(workflow[0].value, PropertyValue::String("done".to_string()));

        assert!(repo.select_properties("org-b", "mp-1", None).unwrap().is_empty());
        assert_eq!(repo.delete_properties("org-b", "mp-1", None).unwrap(), 0);

        assert_eq!(repo.delete_properties("org", "mp-1", Some("acl")).unwrap(), 1);
        assert_eq!(repo.delete_properties("org", "mp-1", None).unwrap(), 1);
        assert_eq!(repo.select_properties("org", "mp-10", None).unwrap().len(), 1);
    }

    #[test]
    fn test_count_media_packages() {
        let repo = MemorySnapshotRepository::new();
        repo.put(snapshot("org", "mp-1", 0)).unwrap();
        repo.put(snapshot("org", "mp-1", 1)).unwrap();
        repo.put(snapshot("org", "mp-2", 0)).unwrap();
        repo.put(snapshot("org-b", "mp-3", 0)).unwrap();

        assert_eq!(repo.count_media_packages("org").unwrap(), 2);
        assert_eq!(repo.count_media_packages("org-b").unwrap(), 1);
        assert_eq!(repo.count_media_packages("org-c").unwrap(), 0);
    }

    #[test]
    fn test_update_tier_is_optimistic() {
        let repo = MemorySnapshotRepository::new();
        repo.put(snapshot("org", "mp-1", 0)).unwrap();

        let updated = repo.update_tier("org", "mp-1", Version(0), 0, "cold").unwrap();
        assert_eq!(updated.storage_tier, "cold");
        assert_eq!(updated.row_version, 1);

        assert!(matches!(
            repo.update_tier("org", "mp-1", Version(0), 0, "warm"),
            Err(StrataError::StaleWrite(_))
        ));
        assert_eq!(repo.get("org", "mp-1", Version(0)).unwrap().storage_tier, "cold");
    }

    #[test]
    fn test_change_feed_sees_each_mutation_once() {
        let repo = MemorySnapshotRepository::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        repo.subscribe(Arc::new(move |event: &ChangeEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        repo.put(snapshot("org", "mp-1", 0)).unwrap();
        repo.update_tier("org", "mp-1", Version(0), 0, "cold").unwrap();
        repo.delete("org", "mp-1", Version(0)).unwrap();
        repo.delete("org", "mp-1", Version(0)).unwrap();
        let _ = repo.put(snapshot("org", "mp-2", 0));
        let _ = repo.put(snapshot("org", "mp-2", 0));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ChangeEvent::Created { .. }));
        assert!(matches!(
            &events[1],
            ChangeEvent::TierChanged { from, to, .. } if from == "hot" && to == "cold"
        ));
        assert!(matches!(events[2], ChangeEvent::Deleted { .. }));
        assert_eq!(events[3].key(), &SnapshotKey::new("mp-2", Version(0)));
    }

    #[test]
    fn test_persistent_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("snapshots.json.gz");

        {
            let repo = MemorySnapshotRepository::persistent(&path).unwrap();
            for _ in 0..3 {
                let v = repo.claim_version("org", "mp-1").unwrap();
                repo.put(snapshot("org", "mp-1", v.0)).unwrap();
            }
            repo.delete("org", "mp-1", Version(2)).unwrap();
            repo.update_tier("org", "mp-1", Version(0), 0, "cold").unwrap();
            repo.save_property(
                "org",
                Property::new(PropertyId::new("mp-1", "workflow", "state"), "archived"),
            )
            .unwrap();
        }

        let repo = MemorySnapshotRepository::persistent(&path).unwrap();
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.latest_version("org", "mp-1").unwrap(), Version(1));
        assert_eq!(repo.get("org", "mp-1", Version(0)).unwrap().row_version, 1);
        assert_eq!(repo.select_properties("org", "mp-1", Some("workflow")).unwrap().len(), 1);
        // the deleted version stays claimed across restarts
        assert_eq!(repo.claim_version("org", "mp-1").unwrap(), Version(3));
    }

    #[test]
    fn test_corrupt_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.json.gz");
        std::fs::write(&path, b"not gzip").unwrap();
        assert!(MemorySnapshotRepository::persistent(&path).is_err());
    }
}
