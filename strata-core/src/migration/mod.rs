/*!
Migration of snapshot payloads between storage tiers.

[`MigrationCoordinator::move_by_id_and_version`] validates the target tier, resolves the
affected versions and submits one `move-snapshot` sub-job per version. It returns at once
with a [`JobHandle`]; the caller polls or waits on the handle. The date-range variants
select versions by creation time and hand back one handle per media package. Dropping the handle does not
cancel anything, and a failing sub-job never rolls back its siblings.
*/

pub mod mover;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::jobs::{DispatchStatus, JobDispatcher, JobId};
use crate::model::Version;
use crate::query::{
    created_after, created_before, mediapackage_id, storage_tier, OrderBy, Predicate, QueryEngine, SelectQuery,
};
use crate::repository::SnapshotRepository;
use crate::storage::TierRegistry;
use crate::{Result, StrataError};

pub use mover::{MoveRequest, MoveSnapshotService, MOVE_SNAPSHOT};

/// State of one per-version sub-job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubJobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    /// Lost a race against a concurrent move or delete; nothing was changed
    Aborted,
}

impl SubJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubJobStatus::Succeeded | SubJobStatus::Failed | SubJobStatus::Aborted
        )
    }

    fn from_dispatch(status: &DispatchStatus) -> Self {
        match status {
            DispatchStatus::Queued => SubJobStatus::Queued,
            DispatchStatus::Running => SubJobStatus::Running,
            DispatchStatus::Finished { success: true, payload } if payload == mover::OUTCOME_ABORTED => {
                SubJobStatus::Aborted
            }
            DispatchStatus::Finished { success: true, .. } => SubJobStatus::Succeeded,
            DispatchStatus::Finished { success: false, .. } => SubJobStatus::Failed,
        }
    }
}

impl std::fmt::Display for SubJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubJobStatus::Queued => "queued",
            SubJobStatus::Running => "running",
            SubJobStatus::Succeeded => "succeeded",
            SubJobStatus::Failed => "failed",
            SubJobStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Per-version outcome of a migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub statuses: BTreeMap<Version, SubJobStatus>,
    /// Failure reasons of failed sub-jobs
    pub errors: BTreeMap<Version, String>,
}

impl MigrationReport {
    pub fn is_finished(&self) -> bool {
        self.statuses.values().all(|s| s.is_terminal())
    }

    pub fn all_succeeded(&self) -> bool {
        self.statuses.values().all(|s| *s == SubJobStatus::Succeeded)
    }

    pub fn count(&self, status: SubJobStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }
}

/// Handle on a running migration
#[derive(Clone)]
pub struct JobHandle {
    media_package_id: String,
    target_tier: String,
    jobs: BTreeMap<Version, JobId>,
    dispatcher: Arc<dyn JobDispatcher>,
    poll_interval: Duration,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("media_package_id", &self.media_package_id)
            .field("target_tier", &self.target_tier)
            .field("jobs", &self.jobs)
            .finish()
    }
}

impl JobHandle {
    pub fn media_package_id(&self) -> &str {
        &self.media_package_id
    }

    pub fn target_tier(&self) -> &str {
        &self.target_tier
    }

    /// Sub-job ids by version
    pub fn jobs(&self) -> &BTreeMap<Version, JobId> {
        &self.jobs
    }

    /// Current state of every sub-job
    ///
    /// `NotFound` once the dispatcher has evicted a finished sub-job.
    pub fn report(&self) -> Result<MigrationReport> {
        let mut statuses = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for (version, id) in &self.jobs {
            let status = self.dispatcher.status(*id)?;
            if let DispatchStatus::Finished { success: false, payload } = &status {
                errors.insert(*version, payload.clone());
            }
            statuses.insert(*version, SubJobStatus::from_dispatch(&status));
        }
        Ok(MigrationReport { statuses, errors })
    }

    pub fn statuses(&self) -> Result<BTreeMap<Version, SubJobStatus>> {
        Ok(self.report()?.statuses)
    }

    /// Poll until every sub-job is terminal
    pub async fn wait(&self) -> Result<MigrationReport> {
        loop {
            let report = self.report()?;
            if report.is_finished() {
                return Ok(report);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Like [`JobHandle::wait`], giving up with `Timeout` after `limit`
    ///
    /// Giving up does not cancel the sub-jobs.
    pub async fn wait_timeout(&self, limit: Duration) -> Result<MigrationReport> {
        tokio::time::timeout(limit, self.wait()).await.map_err(|_| {
            StrataError::timeout(format!(
                "migration of {} to '{}' still running after {:?}",
                self.media_package_id, self.target_tier, limit
            ))
        })?
    }
}

/// Fans a migration out into per-version sub-jobs
pub struct MigrationCoordinator {
    queries: QueryEngine,
    repository: Arc<dyn SnapshotRepository>,
    tiers: TierRegistry,
    dispatcher: Arc<dyn JobDispatcher>,
    poll_interval: Duration,
}

impl MigrationCoordinator {
    pub fn new(
        repository: Arc<dyn SnapshotRepository>,
        tiers: TierRegistry,
        dispatcher: Arc<dyn JobDispatcher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queries: QueryEngine::new(Arc::clone(&repository)),
            repository,
            tiers,
            dispatcher,
            poll_interval,
        }
    }

    /// Move one version, or every version when `version` is `None`, to `target_tier`
    ///
    /// # Errors
    /// * `StrataError::InvalidTarget` - unknown or unreachable target tier; nothing is submitted
    /// * `StrataError::NotFound` - no matching snapshot is visible to the organization
    pub fn move_by_id_and_version(
        &self,
        organization_id: &str,
        version: Option<Version>,
        media_package_id: &str,
        target_tier: &str,
    ) -> Result<JobHandle> {
        self.tiers.ensure_reachable(target_tier)?;

        let versions: Vec<Version> = match version {
            Some(v) => {
                self.repository.get(organization_id, media_package_id, v)?;
                vec![v]
            }
            None => self
                .queries
                .select(
                    organization_id,
                    &SelectQuery::new(mediapackage_id(media_package_id))
                        .order_by(OrderBy::Version.asc()),
                )?
                .into_iter()
                .map(|s| s.version)
                .collect(),
        };
        if versions.is_empty() {
            return Err(StrataError::not_found(format!(
                "media package {media_package_id}"
            )));
        }
        self.submit(organization_id, media_package_id, versions, target_tier)
    }

    /// Move every snapshot created within `[start, end]` that is not in `target_tier` yet
    ///
    /// Returns one handle per affected media package, ordered by id.
    ///
    /// # Errors
    /// * `StrataError::InvalidTarget` - unknown or unreachable target tier
    /// * `StrataError::NotFound` - no snapshot in the range needs moving
    pub fn move_by_date(
        &self,
        organization_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        target_tier: &str,
    ) -> Result<Vec<JobHandle>> {
        self.tiers.ensure_reachable(target_tier)?;
        let rows = self.queries.select(
            organization_id,
            &SelectQuery::new(created_within(start, end) & !storage_tier(target_tier))
                .order_by(OrderBy::MediaPackageId.asc())
                .order_by(OrderBy::Version.asc()),
        )?;
        if rows.is_empty() {
            return Err(StrataError::not_found(format!(
                "snapshots created between {start} and {end}"
            )));
        }

        let mut by_id: BTreeMap<String, Vec<Version>> = BTreeMap::new();
        for row in rows {
            by_id.entry(row.media_package_id).or_default().push(row.version);
        }
        by_id
            .into_iter()
            .map(|(id, versions)| self.submit(organization_id, &id, versions, target_tier))
            .collect()
    }

    /// Move the versions of one media package created within `[start, end]`
    ///
    /// Versions already in `target_tier` are included and finish as no-ops.
    pub fn move_by_id_and_date(
        &self,
        organization_id: &str,
        media_package_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        target_tier: &str,
    ) -> Result<JobHandle> {
        self.tiers.ensure_reachable(target_tier)?;
        let versions: Vec<Version> = self
            .queries
            .select(
                organization_id,
                &SelectQuery::new(mediapackage_id(media_package_id) & created_within(start, end))
                    .order_by(OrderBy::Version.asc()),
            )?
            .into_iter()
            .map(|s| s.version)
            .collect();
        if versions.is_empty() {
            return Err(StrataError::not_found(format!(
                "media package {media_package_id} between {start} and {end}"
            )));
        }
        self.submit(organization_id, media_package_id, versions, target_tier)
    }

    fn submit(
        &self,
        organization_id: &str,
        media_package_id: &str,
        versions: Vec<Version>,
        target_tier: &str,
    ) -> Result<JobHandle> {
        let mut jobs = BTreeMap::new();
        for version in versions {
            let request = MoveRequest {
                organization_id: organization_id.to_string(),
                media_package_id: media_package_id.to_string(),
                version,
                target_tier: target_tier.to_string(),
            };
            let id = self.dispatcher.submit(request.to_descriptor())?;
            jobs.insert(version, id);
        }
        info!(
            media_package_id = %media_package_id,
            target_tier = %target_tier,
            sub_jobs = jobs.len(),
            "Submitted migration"
        );

        Ok(JobHandle {
            media_package_id: media_package_id.to_string(),
            target_tier: target_tier.to_string(),
            jobs,
            dispatcher: Arc::clone(&self.dispatcher),
            poll_interval: self.poll_interval,
        })
    }
}

/// Inclusive creation-time range
fn created_within(start: DateTime<Utc>, end: DateTime<Utc>) -> Predicate {
    !created_before(start) & !created_after(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::MockJobDispatcher;
    use crate::model::{MediaPackage, Snapshot};
    use crate::repository::MemorySnapshotRepository;
    use crate::storage::MemoryStorage;
    use mockall::predicate::function;
    use std::sync::Mutex;

    fn repo_with_versions(n: u64) -> Arc<MemorySnapshotRepository> {
        let repo = Arc::new(MemorySnapshotRepository::new());
        for v in 0..n {
            repo.put(Snapshot::new(MediaPackage::new("mp-1"), Version(v), "default", "org", "hot"))
                .unwrap();
        }
        repo
    }

    /// Rows of (id, version, created day in March 2024, tier)
    fn repo_with_dated(rows: &[(&str, u64, u32, &str)]) -> Arc<MemorySnapshotRepository> {
        let repo = Arc::new(MemorySnapshotRepository::new());
        for (id, v, day, tier) in rows {
            let mut snapshot = Snapshot::new(MediaPackage::new(*id), Version(*v), "default", "org", *tier);
            snapshot.created_at = march(*day);
            repo.put(snapshot).unwrap();
        }
        repo
    }

    fn march(day: u32) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn recording_dispatcher(submitted: Arc<Mutex<Vec<Vec<String>>>>) -> MockJobDispatcher {
        let mut dispatcher = MockJobDispatcher::new();
        dispatcher.expect_submit().returning(move |job| {
            submitted.lock().unwrap().push(job.arguments.clone());
            Ok(JobId::new())
        });
        dispatcher
    }

    fn tiers(cold_online: bool) -> TierRegistry {
        let cold = Arc::new(MemoryStorage::new());
        cold.set_offline(!cold_online);
        TierRegistry::new("hot", Arc::new(MemoryStorage::new())).with_tier("cold", cold)
    }

    #[test]
    fn test_invalid_target_submits_nothing() {
        let mut dispatcher = MockJobDispatcher::new();
        dispatcher.expect_submit().never();
        let coordinator = MigrationCoordinator::new(
            repo_with_versions(1),
            tiers(false),
            Arc::new(dispatcher),
            Duration::from_millis(1),
        );

        for target in ["cold", "glacier"] {
            assert!(matches!(
                coordinator.move_by_id_and_version("org", None, "mp-1", target),
                Err(StrataError::InvalidTarget(_))
            ));
        }
    }

    #[test]
    fn test_unknown_media_package_is_not_found() {
        let mut dispatcher = MockJobDispatcher::new();
        dispatcher.expect_submit().never();
        let coordinator = MigrationCoordinator::new(
            repo_with_versions(1),
            tiers(true),
            Arc::new(dispatcher),
            Duration::from_millis(1),
        );

        assert!(coordinator
            .move_by_id_and_version("org", None, "mp-2", "cold")
            .unwrap_err()
            .is_not_found());
        assert!(coordinator
            .move_by_id_and_version("org", Some(Version(7)), "mp-1", "cold")
            .unwrap_err()
            .is_not_found());
        assert!(coordinator
            .move_by_id_and_version("other-org", None, "mp-1", "cold")
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_one_sub_job_per_version_and_status_mapping() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let ids = [JobId::new(), JobId::new(), JobId::new()];

        let mut dispatcher = MockJobDispatcher::new();
        let seen = Arc::clone(&submitted);
        let mut next = ids.into_iter();
        dispatcher
            .expect_submit()
            .times(3)
            .with(function(|job: &crate::jobs::JobDescriptor| {
                job.operation == MOVE_SNAPSHOT && job.arguments.len() == 4
            }))
            .returning(move |job| {
                seen.lock().unwrap().push(job.arguments.clone());
                Ok(next.next().unwrap())
            });
        dispatcher.expect_status().returning(move |id| {
            Ok(if id == ids[0] {
                DispatchStatus::Finished {
                    success: true,
                    payload: "succeeded".to_string(),
                }
            } else if id == ids[1] {
                DispatchStatus::Finished {
                    success: true,
                    payload: "aborted".to_string(),
                }
            } else {
                DispatchStatus::Finished {
                    success: false,
                    payload: "integrity check failed".to_string(),
                }
            })
        });

        let coordinator = MigrationCoordinator::new(
            repo_with_versions(3),
            tiers(true),
            Arc::new(dispatcher),
            Duration::from_millis(1),
        );
        let handle = coordinator
            .move_by_id_and_version("org", None, "mp-1", "cold")
            .unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.statuses[&Version(0)], SubJobStatus::Succeeded);
        assert_eq!(report.statuses[&Version(1)], SubJobStatus::Aborted);
        assert_eq!(report.statuses[&Version(2)], SubJobStatus::Failed);
        assert_eq!(report.errors.len(), 1);
        assert!(!report.all_succeeded());
        assert_eq!(
            submitted.lock().unwrap()[1],
            vec!["org", "mp-1", "1", "cold"]
        );
    }

    #[test]
    fn test_move_by_date_skips_rows_already_in_target() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let repo = repo_with_dated(&[
            ("mp-1", 0, 1, "hot"),
            ("mp-1", 1, 10, "hot"),
            ("mp-1", 2, 20, "hot"),
            ("mp-2", 0, 12, "cold"),
            ("mp-3", 0, 15, "hot"),
        ]);
        let coordinator = MigrationCoordinator::new(
            repo,
            tiers(true),
            Arc::new(recording_dispatcher(Arc::clone(&submitted))),
            Duration::from_millis(1),
        );

        let handles = coordinator
            .move_by_date("org", march(10), march(15), "cold")
            .unwrap();
        let ids: Vec<&str> = handles.iter().map(|h| h.media_package_id()).collect();
        assert_eq!(ids, vec!["mp-1", "mp-3"]);
        assert_eq!(handles[0].jobs().keys().copied().collect::<Vec<_>>(), vec![Version(1)]);
        assert_eq!(
            *submitted.lock().unwrap(),
            vec![
                vec!["org", "mp-1", "1", "cold"],
                vec!["org", "mp-3", "0", "cold"],
            ]
        );

        assert!(coordinator
            .move_by_date("org", march(11), march(13), "cold")
            .unwrap_err()
            .is_not_found());
        assert!(coordinator
            .move_by_date("other-org", march(1), march(31), "cold")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_move_by_id_and_date() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let repo = repo_with_dated(&[
            ("mp-1", 0, 1, "hot"),
            ("mp-1", 1, 10, "cold"),
            ("mp-1", 2, 20, "hot"),
            ("mp-2", 0, 10, "hot"),
        ]);
        let coordinator = MigrationCoordinator::new(
            repo,
            tiers(true),
            Arc::new(recording_dispatcher(Arc::clone(&submitted))),
            Duration::from_millis(1),
        );

        let handle = coordinator
            .move_by_id_and_date("org", "mp-1", march(1), march(10), "cold")
            .unwrap();
        assert_eq!(
            handle.jobs().keys().copied().collect::<Vec<_>>(),
            vec![Version(0), Version(1)]
        );
        assert_eq!(submitted.lock().unwrap().len(), 2);

        assert!(coordinator
            .move_by_id_and_date("org", "mp-1", march(21), march(31), "cold")
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            coordinator.move_by_id_and_date("org", "mp-1", march(1), march(31), "glacier"),
            Err(StrataError::InvalidTarget(_))
        ));
    }
}
