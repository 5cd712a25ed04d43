/*!
Asset manager: the entry point workflows use to snapshot, query, delete and migrate media
packages.

Every call is scoped to the organization reported by the [`SecurityContext`]. Snapshot
creation writes element payloads and a compressed manifest into the primary tier before
the row is committed, so a visible snapshot always has its payloads in the tier its row
names.
*/

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use strata_retry::{tier_transfer_backoff_policy, RetryPolicy};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::compression::{Compressor, GzipCompressor};
use crate::config::StrataConfig;
use crate::jobs::{InProcessDispatcher, JobDispatcher};
use crate::migration::{JobHandle, MigrationCoordinator, MigrationReport, MoveSnapshotService};
use crate::model::checksum::compute_checksums;
use crate::model::{ElementFilter, MediaPackage, Property, Snapshot, Version, DEFAULT_OWNER};
use crate::observability;
use crate::query::{mediapackage_id, version, DeleteQuery, OrderBy, Predicate, QueryEngine, SelectQuery};
use crate::repository::{ChangeListener, MemorySnapshotRepository, SnapshotRepository};
use crate::security::{SecurityContext, StaticSecurityContext};
use crate::storage::{PayloadStore, StoragePath, TierRegistry};
use crate::workspace::{FileWorkspace, Workspace};
use crate::{Result, StrataError};

/// Which version of a media package to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Exact(Version),
    Latest,
    /// Newest version in which no element carries any of these tags
    WithoutTags(BTreeSet<String>),
}

/// Facade over the repository, query engine, tiers and migration coordinator
pub struct AssetManager {
    repository: Arc<dyn SnapshotRepository>,
    queries: QueryEngine,
    tiers: TierRegistry,
    migrations: MigrationCoordinator,
    workspace: Arc<dyn Workspace>,
    security: Arc<dyn SecurityContext>,
    compressor: GzipCompressor,
    version_claim_attempts: u32,
}

impl std::fmt::Debug for AssetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetManager")
            .field("tiers", &self.tiers)
            .field("version_claim_attempts", &self.version_claim_attempts)
            .finish()
    }
}

impl AssetManager {
    pub fn builder(tiers: TierRegistry) -> AssetManagerBuilder {
        AssetManagerBuilder::new(tiers)
    }

    pub fn tiers(&self) -> &TierRegistry {
        &self.tiers
    }

    pub fn organization_id(&self) -> String {
        self.security.organization_id()
    }

    /// Register a listener on the repository change feed
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.repository.subscribe(listener);
    }

    /// Preserve the current state of a media package as a new version
    ///
    /// Element content is read from the workspace. Elements without a checksum get one;
    /// elements with a checksum must match their content. Payloads and the manifest are
    /// written to the primary tier, then the row is committed under a freshly claimed
    /// version. A claimed version whose primary-tier location already holds data is
    /// skipped without writing to it. The first snapshot of a media package clears
    /// properties left over from an earlier life of the id.
    ///
    /// # Errors
    /// * `StrataError::Validation` - empty owner or malformed document
    /// * `StrataError::IntegrityCheckFailed` - element content does not match its checksum
    /// * `StrataError::Conflict` - no version could be claimed within the attempt limit
    pub fn take_snapshot(&self, owner: &str, document: MediaPackage) -> Result<Snapshot> {
        if owner.trim().is_empty() {
            return Err(StrataError::validation("snapshot owner cannot be empty"));
        }
        document.validate()?;

        let organization_id = self.security.organization_id();
        let mut document = document;
        let payloads = self.load_payloads(&mut document)?;
        let manifest_id = document.manifest_id();
        let manifest = self.compressor.compress(document.to_json()?.as_bytes())?;
        let primary = self.tiers.primary();
        if !self.snapshot_exists(&document.id)? {
            self.clear_stale_properties(&organization_id, &document.id);
        }

        for attempt in 1..=self.version_claim_attempts {
            let version = self.repository.claim_version(&organization_id, &document.id)?;
            let manifest_path =
                StoragePath::new(organization_id.as_str(), document.id.as_str(), version, manifest_id.as_str());
            if location_occupied(primary.as_ref(), &manifest_path, &payloads)? {
                warn!(media_package_id = %document.id, %version, attempt, "Payload location already in use, retrying");
                continue;
            }
            if let Err(e) = store_payloads(primary.as_ref(), &manifest_path, &payloads, &manifest) {
                discard_payloads(primary.as_ref(), &organization_id, &document.id, version);
                return Err(e);
            }

            let snapshot = Snapshot::new(
                document.clone(),
                version,
                owner,
                organization_id.as_str(),
                self.tiers.primary_name(),
            );
            match self.repository.put(snapshot.clone()) {
                Ok(()) => {
                    info!(
                        snapshot = %snapshot.key(),
                        owner = %owner,
                        tier = %snapshot.storage_tier,
                        payloads = payloads.len(),
                        "Took snapshot"
                    );
                    observability::record_snapshot_taken();
                    return Ok(snapshot);
                }
                // a concurrent writer used this location after the occupancy check; leave it
                Err(StrataError::Conflict(reason)) => {
                    warn!(media_package_id = %document.id, %version, attempt, %reason, "Version conflict, retrying");
                }
                Err(e) => {
                    discard_payloads(primary.as_ref(), &organization_id, &document.id, version);
                    return Err(e);
                }
            }
        }

        Err(StrataError::conflict(format!(
            "could not claim a version for media package {} after {} attempts",
            document.id, self.version_claim_attempts
        )))
    }

    /// Snapshot with the owner of the latest existing version, or the default owner
    pub fn take_snapshot_default(&self, document: MediaPackage) -> Result<Snapshot> {
        let organization_id = self.security.organization_id();
        let owner = match self.repository.latest_version(&organization_id, &document.id) {
            Ok(latest) => self.repository.get(&organization_id, &document.id, latest)?.owner,
            Err(e) if e.is_not_found() => DEFAULT_OWNER.to_string(),
            Err(e) => return Err(e),
        };
        self.take_snapshot(&owner, document)
    }

    /// Snapshot only the elements matching `filter`
    ///
    /// References to dropped elements are relinked to their nearest kept ancestor.
    pub fn take_partial_snapshot(
        &self,
        owner: &str,
        document: MediaPackage,
        filter: &ElementFilter,
    ) -> Result<Snapshot> {
        let mut document = document;
        let removed = document.prune(|e| filter.matches(e));
        debug!(media_package_id = %document.id, removed, "Pruned elements for partial snapshot");
        self.take_snapshot(owner, document)
    }

    /// Delete every version of `media_package_id` owned by `owner`
    ///
    /// With `keep_latest`, the latest version (whoever owns it) is computed first and
    /// excluded. Returns the number of deleted versions.
    pub fn delete_all_versions(&self, owner: &str, media_package_id: &str, keep_latest: bool) -> Result<usize> {
        let organization_id = self.security.organization_id();
        let mut filter = mediapackage_id(media_package_id);
        if keep_latest {
            match self.repository.latest_version(&organization_id, media_package_id) {
                Ok(latest) => filter = filter & !version().eq(latest),
                Err(e) if e.is_not_found() => return Ok(0),
                Err(e) => return Err(e),
            }
        }
        self.delete_where(&organization_id, DeleteQuery::new(owner, filter))
    }

    /// Delete one version if `owner` owns it; returns 0 or 1
    pub fn delete_version(&self, owner: &str, media_package_id: &str, v: Version) -> Result<usize> {
        let organization_id = self.security.organization_id();
        self.delete_where(
            &organization_id,
            DeleteQuery::new(owner, mediapackage_id(media_package_id) & version().eq(v)),
        )
    }

    /// Rows come back from the repository as they were when removed, so payloads are
    /// discarded from the tier that held them then, even if a migration moved them after
    /// the candidates were selected.
    fn delete_where(&self, organization_id: &str, query: DeleteQuery) -> Result<usize> {
        let deleted = self.queries.delete_matching(organization_id, &query)?;
        for snapshot in &deleted {
            match self.tiers.get(&snapshot.storage_tier) {
                Ok(store) => discard_payloads(
                    store.as_ref(),
                    organization_id,
                    &snapshot.media_package_id,
                    snapshot.version,
                ),
                Err(e) => warn!(snapshot = %snapshot.key(), error = %e, "Payloads left in unknown tier"),
            }
        }
        if !deleted.is_empty() {
            info!(owner = %query.owner, deleted = deleted.len(), "Deleted snapshots");
            observability::record_snapshots_deleted(deleted.len());
        }

        let emptied: BTreeSet<&str> = deleted.iter().map(|s| s.media_package_id.as_str()).collect();
        for media_package_id in emptied {
            match self.repository.latest_version(organization_id, media_package_id) {
                Err(e) if e.is_not_found() => self.clear_stale_properties(organization_id, media_package_id),
                Err(e) => return Err(e),
                Ok(_) => {}
            }
        }
        Ok(deleted.len())
    }

    /// Drop every property of a media package that has no snapshot left
    fn clear_stale_properties(&self, organization_id: &str, media_package_id: &str) {
        match self
            .repository
            .delete_properties(organization_id, media_package_id, None)
        {
            Ok(0) => {}
            Ok(removed) => debug!(media_package_id = %media_package_id, removed, "Removed stale properties"),
            Err(e) => warn!(media_package_id = %media_package_id, error = %e, "Could not remove stale properties"),
        }
    }

    /// Attach a property to a media package, replacing any previous value
    ///
    /// Returns `false` when the media package has no snapshot; nothing is stored then.
    pub fn set_property(&self, property: Property) -> Result<bool> {
        let saved = self
            .repository
            .save_property(&self.security.organization_id(), property.clone())?;
        if saved {
            debug!(property = %property.id, value = %property.value, "Saved property");
        }
        Ok(saved)
    }

    /// Properties of a media package in one namespace, or in all namespaces
    pub fn select_properties(&self, media_package_id: &str, namespace: Option<&str>) -> Result<Vec<Property>> {
        self.repository
            .select_properties(&self.security.organization_id(), media_package_id, namespace)
    }

    /// Remove properties of a media package in one namespace, or all of them
    pub fn delete_properties(&self, media_package_id: &str, namespace: Option<&str>) -> Result<usize> {
        let removed = self.repository.delete_properties(
            &self.security.organization_id(),
            media_package_id,
            namespace,
        )?;
        debug!(media_package_id = %media_package_id, namespace = ?namespace, removed, "Deleted properties");
        Ok(removed)
    }

    /// Number of media packages of the caller's organization with at least one snapshot
    pub fn count_media_packages(&self) -> Result<usize> {
        self.repository
            .count_media_packages(&self.security.organization_id())
    }

    /// Document of the selected version
    pub fn select_version(&self, media_package_id: &str, selector: &VersionSelector) -> Result<MediaPackage> {
        let organization_id = self.security.organization_id();
        match selector {
            VersionSelector::Exact(v) => Ok(self.repository.get(&organization_id, media_package_id, *v)?.document),
            VersionSelector::Latest => {
                let latest = self.repository.latest_version(&organization_id, media_package_id)?;
                Ok(self.repository.get(&organization_id, media_package_id, latest)?.document)
            }
            // linear in the number of versions; stops at the first match
            VersionSelector::WithoutTags(tags) => self
                .queries
                .select(
                    &organization_id,
                    &SelectQuery::new(mediapackage_id(media_package_id)).order_by(OrderBy::Version.desc()),
                )?
                .into_iter()
                .find(|s| !s.document.has_any_tag(tags))
                .map(|s| s.document)
                .ok_or_else(|| {
                    StrataError::not_found(format!(
                        "version of {media_package_id} without tags {tags:?}"
                    ))
                }),
        }
    }

    /// Latest document of a media package
    pub fn get_media_package(&self, media_package_id: &str) -> Result<MediaPackage> {
        self.select_version(media_package_id, &VersionSelector::Latest)
    }

    pub fn get_snapshot(&self, media_package_id: &str, v: Version) -> Result<Snapshot> {
        self.repository
            .get(&self.security.organization_id(), media_package_id, v)
    }

    pub fn snapshot_exists(&self, media_package_id: &str) -> Result<bool> {
        match self.latest_version(media_package_id) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn latest_version(&self, media_package_id: &str) -> Result<Version> {
        self.repository
            .latest_version(&self.security.organization_id(), media_package_id)
    }

    pub fn select(&self, query: &SelectQuery) -> Result<Vec<Snapshot>> {
        self.queries.select(&self.security.organization_id(), query)
    }

    /// Shorthand for an unordered, unpaginated select
    pub fn select_where(&self, filter: Predicate) -> Result<Vec<Snapshot>> {
        self.select(&SelectQuery::new(filter))
    }

    /// Tier that currently holds the payloads of a snapshot
    pub fn storage_location(&self, media_package_id: &str, v: Version) -> Result<String> {
        Ok(self.get_snapshot(media_package_id, v)?.storage_tier)
    }

    /// Read one stored payload of a snapshot from its current tier
    pub fn read_payload(&self, media_package_id: &str, v: Version, element_id: &str) -> Result<Vec<u8>> {
        let snapshot = self.get_snapshot(media_package_id, v)?;
        let store = self.tiers.get(&snapshot.storage_tier)?;
        store.get(&StoragePath::new(
            snapshot.organization_id,
            snapshot.media_package_id,
            v,
            element_id,
        ))
    }

    /// Read the manifest stored alongside a snapshot's payloads
    pub fn read_manifest(&self, media_package_id: &str, v: Version) -> Result<MediaPackage> {
        let snapshot = self.get_snapshot(media_package_id, v)?;
        let compressed = self.read_payload(media_package_id, v, &snapshot.document.manifest_id())?;
        let json = self.compressor.decompress(&compressed)?;
        let json = String::from_utf8(json)
            .map_err(|e| StrataError::invalid_format(format!("manifest is not UTF-8: {e}")))?;
        MediaPackage::from_json(&json)
    }

    /// Start moving one version (or all versions) to `target_tier`
    pub fn migrate(&self, media_package_id: &str, v: Option<Version>, target_tier: &str) -> Result<JobHandle> {
        self.migrations.move_by_id_and_version(
            &self.security.organization_id(),
            v,
            media_package_id,
            target_tier,
        )
    }

    /// Start moving every snapshot taken within `[start, end]` that is not in
    /// `target_tier` yet; one handle per media package
    pub fn migrate_by_date(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        target_tier: &str,
    ) -> Result<Vec<JobHandle>> {
        self.migrations
            .move_by_date(&self.security.organization_id(), start, end, target_tier)
    }

    /// Start moving the versions of one media package taken within `[start, end]`
    pub fn migrate_by_id_and_date(
        &self,
        media_package_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        target_tier: &str,
    ) -> Result<JobHandle> {
        self.migrations.move_by_id_and_date(
            &self.security.organization_id(),
            media_package_id,
            start,
            end,
            target_tier,
        )
    }

    /// Start a migration and poll until every sub-job is terminal
    pub async fn migrate_and_wait(
        &self,
        media_package_id: &str,
        v: Option<Version>,
        target_tier: &str,
    ) -> Result<MigrationReport> {
        self.migrate(media_package_id, v, target_tier)?.wait().await
    }

    /// Element content plus checksums, filling in missing checksums and sizes
    fn load_payloads(&self, document: &mut MediaPackage) -> Result<Vec<(String, Vec<u8>)>> {
        let mut payloads = Vec::new();
        for element in document.archived_elements() {
            let data = self.workspace.read(&element.uri)?;
            payloads.push((element.id.clone(), data));
        }

        let slices: Vec<&[u8]> = payloads.iter().map(|(_, data)| data.as_slice()).collect();
        let checksums = compute_checksums(&slices);

        for ((id, data), checksum) in payloads.iter().zip(checksums) {
            let Some(element) = document.elements.iter_mut().find(|e| e.id == *id) else {
                continue;
            };
            match &element.checksum {
                Some(expected) if !expected.eq_ignore_ascii_case(&checksum) => {
                    return Err(StrataError::IntegrityCheckFailed {
                        expected: expected.clone(),
                        actual: checksum,
                    });
                }
                Some(_) => {}
                None => element.checksum = Some(checksum),
            }
            element.size = Some(data.len() as u64);
        }
        Ok(payloads)
    }
}

/// Whether any payload or the manifest already exists at a snapshot location
fn location_occupied(
    store: &dyn PayloadStore,
    manifest_path: &StoragePath,
    payloads: &[(String, Vec<u8>)],
) -> Result<bool> {
    if store.contains(manifest_path)? {
        return Ok(true);
    }
    for (element_id, _) in payloads {
        let path = StoragePath {
            element_id: element_id.clone(),
            ..manifest_path.clone()
        };
        if store.contains(&path)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Write element payloads and the manifest; `manifest_path` names the snapshot location
fn store_payloads(
    store: &dyn PayloadStore,
    manifest_path: &StoragePath,
    payloads: &[(String, Vec<u8>)],
    manifest: &[u8],
) -> Result<()> {
    for (element_id, data) in payloads {
        let path = StoragePath {
            element_id: element_id.clone(),
            ..manifest_path.clone()
        };
        store.put(&path, data)?;
    }
    store.put(manifest_path, manifest)
}

fn discard_payloads(store: &dyn PayloadStore, organization_id: &str, media_package_id: &str, v: Version) {
    if let Err(e) = store.delete_snapshot(organization_id, media_package_id, v) {
        warn!(
            media_package_id = %media_package_id,
            version = %v,
            error = %e,
            "Could not remove snapshot payloads"
        );
    }
}

/// Assembles an [`AssetManager`]
///
/// Unset collaborators default to an in-memory repository, a [`FileWorkspace`] rooted
/// at the working directory, the default organization and an [`InProcessDispatcher`] on
/// the current tokio runtime. A dispatcher passed in with
/// [`AssetManagerBuilder::dispatcher`] must already route `move-snapshot` jobs.
pub struct AssetManagerBuilder {
    tiers: TierRegistry,
    repository: Option<Arc<dyn SnapshotRepository>>,
    workspace: Option<Arc<dyn Workspace>>,
    security: Option<Arc<dyn SecurityContext>>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
    runtime: Option<Handle>,
    copy_timeout: Duration,
    retry_policy: RetryPolicy,
    max_concurrent_jobs: usize,
    poll_interval: Duration,
    job_retention: Duration,
    version_claim_attempts: u32,
}

impl AssetManagerBuilder {
    pub fn new(tiers: TierRegistry) -> Self {
        let defaults = StrataConfig::default();
        Self {
            tiers,
            repository: None,
            workspace: None,
            security: None,
            dispatcher: None,
            runtime: None,
            copy_timeout: defaults.copy_timeout(),
            retry_policy: RetryPolicy::new(defaults.max_job_attempts as usize, tier_transfer_backoff_policy()),
            max_concurrent_jobs: defaults.concurrency(),
            poll_interval: defaults.poll_interval(),
            job_retention: defaults.finished_job_retention(),
            version_claim_attempts: defaults.version_claim_attempts,
        }
    }

    pub fn repository(mut self, repository: Arc<dyn SnapshotRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn security(mut self, security: Arc<dyn SecurityContext>) -> Self {
        self.security = Some(security);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Runtime the default dispatcher spawns jobs on
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn copy_timeout(mut self, timeout: Duration) -> Self {
        self.copy_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long the default dispatcher keeps finished sub-jobs queryable
    pub fn job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    pub fn version_claim_attempts(mut self, attempts: u32) -> Self {
        self.version_claim_attempts = attempts.max(1);
        self
    }

    pub fn build(self) -> Result<AssetManager> {
        let repository: Arc<dyn SnapshotRepository> = self
            .repository
            .unwrap_or_else(|| Arc::new(MemorySnapshotRepository::new()));

        let dispatcher: Arc<dyn JobDispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => {
                let handle = match self.runtime {
                    Some(handle) => handle,
                    None => Handle::try_current().map_err(|e| {
                        StrataError::validation(format!("asset manager needs a tokio runtime: {e}"))
                    })?,
                };
                let dispatcher = InProcessDispatcher::new(handle, self.max_concurrent_jobs, self.retry_policy)
                    .with_retention(self.job_retention);
                dispatcher.register(Arc::new(MoveSnapshotService::new(
                    Arc::clone(&repository),
                    self.tiers.clone(),
                    self.copy_timeout,
                )));
                Arc::new(dispatcher)
            }
        };

        let migrations = MigrationCoordinator::new(
            Arc::clone(&repository),
            self.tiers.clone(),
            dispatcher,
            self.poll_interval,
        );

        Ok(AssetManager {
            queries: QueryEngine::new(Arc::clone(&repository)),
            repository,
            tiers: self.tiers,
            migrations,
            workspace: self
                .workspace
                .unwrap_or_else(|| Arc::new(FileWorkspace::default())),
            security: self
                .security
                .unwrap_or_else(|| Arc::new(StaticSecurityContext::default())),
            compressor: GzipCompressor::new(),
            version_claim_attempts: self.version_claim_attempts,
        })
    }
}

/// Build an asset manager from configuration
///
/// The snapshot index is persisted when `index_path` is set. Must be called inside a
/// tokio runtime.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use strata_core::{create_manager_from_config, FileWorkspace, StaticSecurityContext, StrataConfig};
///
/// # async fn run() -> strata_core::Result<()> {
/// let config = StrataConfig::from_json_file("strata.json")?;
/// let manager = create_manager_from_config(
///     &config,
///     Arc::new(FileWorkspace::new("/srv/media")),
///     Arc::new(StaticSecurityContext::new("org-1")),
/// )?;
/// println!("{} tiers", manager.tiers().names().len());
/// # Ok(())
/// # }
/// ```
pub fn create_manager_from_config(
    config: &StrataConfig,
    workspace: Arc<dyn Workspace>,
    security: Arc<dyn SecurityContext>,
) -> Result<AssetManager> {
    config.validate()?;
    let tiers = TierRegistry::from_config(config)?;
    let repository: Arc<dyn SnapshotRepository> = match &config.index_path {
        Some(path) => Arc::new(MemorySnapshotRepository::persistent(path)?),
        None => Arc::new(MemorySnapshotRepository::new()),
    };

    AssetManager::builder(tiers)
        .repository(repository)
        .workspace(workspace)
        .security(security)
        .copy_timeout(config.copy_timeout())
        .retry_policy(RetryPolicy::new(
            config.max_job_attempts as usize,
            tier_transfer_backoff_policy(),
        ))
        .max_concurrent_jobs(config.concurrency())
        .poll_interval(config.poll_interval())
        .job_retention(config.finished_job_retention())
        .version_claim_attempts(config.version_claim_attempts)
        .build()
}
