/*!
The `move-snapshot` job: copy one snapshot's payloads to another tier.

Steps, in order:
1. read every payload (archived elements plus the manifest) from the current tier
2. write it to the target tier
3. read it back and verify it (SHA-256 against the element checksum, byte equality for
   the manifest and for elements without a checksum)
4. switch the row's storage tier with an optimistic `update_tier`
5. delete the source copy

Steps 1 to 3 run on the blocking pool under the copy timeout. The source copy is only
touched after step 4 committed, so a failed or lost move never loses data.
*/

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::jobs::{JobDescriptor, JobService};
use crate::model::{compute_checksum, verify_checksum, Snapshot, Version};
use crate::observability;
use crate::repository::SnapshotRepository;
use crate::storage::{PayloadStore, StoragePath, TierRegistry};
use crate::{Result, StrataError};

/// Operation name of the migration sub-job
pub const MOVE_SNAPSHOT: &str = "move-snapshot";

pub(crate) const OUTCOME_SUCCEEDED: &str = "succeeded";
pub(crate) const OUTCOME_ABORTED: &str = "aborted";

/// Arguments of one `move-snapshot` job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub organization_id: String,
    pub media_package_id: String,
    pub version: Version,
    pub target_tier: String,
}

impl MoveRequest {
    pub fn to_descriptor(&self) -> JobDescriptor {
        JobDescriptor::new(
            MOVE_SNAPSHOT,
            vec![
                self.organization_id.clone(),
                self.media_package_id.clone(),
                self.version.to_string(),
                self.target_tier.clone(),
            ],
        )
    }

    pub fn from_descriptor(job: &JobDescriptor) -> Result<Self> {
        if job.operation != MOVE_SNAPSHOT {
            return Err(StrataError::validation(format!(
                "expected a {MOVE_SNAPSHOT} job, got '{}'",
                job.operation
            )));
        }
        match job.arguments.as_slice() {
            [org, mp, version, target] => Ok(Self {
                organization_id: org.clone(),
                media_package_id: mp.clone(),
                version: version.parse()?,
                target_tier: target.clone(),
            }),
            args => Err(StrataError::validation(format!(
                "{MOVE_SNAPSHOT} takes 4 arguments, got {}",
                args.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveOutcome {
    Moved,
    AlreadyInTarget,
    /// Lost a race against a concurrent move or delete
    Aborted,
}

/// Job service executing `move-snapshot` jobs
pub struct MoveSnapshotService {
    repository: Arc<dyn SnapshotRepository>,
    tiers: TierRegistry,
    copy_timeout: Duration,
}

impl MoveSnapshotService {
    pub fn new(repository: Arc<dyn SnapshotRepository>, tiers: TierRegistry, copy_timeout: Duration) -> Self {
        Self {
            repository,
            tiers,
            copy_timeout,
        }
    }

    async fn move_snapshot(&self, request: &MoveRequest) -> Result<MoveOutcome> {
        let snapshot = match self.repository.get(
            &request.organization_id,
            &request.media_package_id,
            request.version,
        ) {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => {
                warn!(
                    media_package_id = %request.media_package_id,
                    version = %request.version,
                    "Snapshot vanished before it could be moved"
                );
                return Ok(MoveOutcome::Aborted);
            }
            Err(e) => return Err(e),
        };

        if snapshot.storage_tier == request.target_tier {
            debug!(
                snapshot = %snapshot.key(),
                tier = %request.target_tier,
                "Snapshot already in target tier"
            );
            return Ok(MoveOutcome::AlreadyInTarget);
        }

        let source = self.tiers.get(&snapshot.storage_tier)?;
        let target = self.tiers.get(&request.target_tier)?;
        let payloads = payload_manifest(&snapshot);

        let started = Instant::now();
        let copy = {
            let source = Arc::clone(&source);
            let target = Arc::clone(&target);
            let payloads = payloads.clone();
            tokio::task::spawn_blocking(move || copy_verified(source.as_ref(), target.as_ref(), &payloads))
        };
        match tokio::time::timeout(self.copy_timeout, copy).await {
            Err(_) => {
                error!(
                    snapshot = %snapshot.key(),
                    timeout_secs = self.copy_timeout.as_secs_f64(),
                    "Payload copy timed out"
                );
                return Err(StrataError::timeout(format!(
                    "copying {} to '{}' took longer than {:?}",
                    snapshot.key(),
                    request.target_tier,
                    self.copy_timeout
                )));
            }
            Ok(Err(join_error)) => {
                return Err(StrataError::storage(format!("copy task failed: {join_error}")));
            }
            Ok(Ok(Err(e))) => return self.after_failed_copy(&snapshot, request, target, e).await,
            Ok(Ok(Ok(()))) => {}
        }
        observability::record_copy_latency(started.elapsed());

        match self.repository.update_tier(
            &request.organization_id,
            &request.media_package_id,
            request.version,
            snapshot.row_version,
            &request.target_tier,
        ) {
            Ok(updated) => {
                info!(
                    snapshot = %updated.key(),
                    from = %snapshot.storage_tier,
                    to = %updated.storage_tier,
                    "Moved snapshot"
                );
            }
            Err(e @ (StrataError::StaleWrite(_) | StrataError::NotFound(_))) => {
                warn!(snapshot = %snapshot.key(), reason = %e, "Move lost a race, discarding copy");
                self.discard_target_copy(&snapshot, request, target).await;
                return Ok(MoveOutcome::Aborted);
            }
            Err(e) => {
                self.discard_target_copy(&snapshot, request, target).await;
                return Err(e);
            }
        }

        let org = snapshot.organization_id.clone();
        let mp = snapshot.media_package_id.clone();
        let version = snapshot.version;
        match tokio::task::spawn_blocking(move || source.delete_snapshot(&org, &mp, version)).await {
            Ok(Ok(removed)) => debug!(snapshot = %snapshot.key(), removed, "Deleted source copy"),
            Ok(Err(e)) => warn!(snapshot = %snapshot.key(), error = %e, "Source copy left behind"),
            Err(e) => warn!(snapshot = %snapshot.key(), error = %e, "Source cleanup task failed"),
        }
        Ok(MoveOutcome::Moved)
    }

    /// A copy failed: either this job lost a race (the row moved or vanished while copying)
    /// or the copy itself is broken. Either way the partial target copy goes.
    async fn after_failed_copy(
        &self,
        snapshot: &Snapshot,
        request: &MoveRequest,
        target: Arc<dyn PayloadStore>,
        cause: StrataError,
    ) -> Result<MoveOutcome> {
        let current = self.repository.get(
            &request.organization_id,
            &request.media_package_id,
            request.version,
        );
        let lost_race = match &current {
            Ok(row) => row.row_version != snapshot.row_version,
            Err(e) => e.is_not_found(),
        };

        self.discard_target_copy(snapshot, request, target).await;
        if lost_race {
            warn!(snapshot = %snapshot.key(), reason = %cause, "Snapshot changed during copy");
            Ok(MoveOutcome::Aborted)
        } else {
            error!(snapshot = %snapshot.key(), error = %cause, "Payload copy failed");
            Err(cause)
        }
    }

    /// Remove this job's copy from the target tier unless the row now lives there
    async fn discard_target_copy(&self, snapshot: &Snapshot, request: &MoveRequest, target: Arc<dyn PayloadStore>) {
        if let Ok(current) = self.repository.get(
            &request.organization_id,
            &request.media_package_id,
            request.version,
        ) {
            if current.storage_tier == request.target_tier {
                return;
            }
        }

        let org = snapshot.organization_id.clone();
        let mp = snapshot.media_package_id.clone();
        let version = snapshot.version;
        match tokio::task::spawn_blocking(move || target.delete_snapshot(&org, &mp, version)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(snapshot = %snapshot.key(), error = %e, "Could not discard target copy"),
            Err(e) => warn!(snapshot = %snapshot.key(), error = %e, "Target cleanup task failed"),
        }
    }
}

#[async_trait]
impl JobService for MoveSnapshotService {
    fn operation(&self) -> &str {
        MOVE_SNAPSHOT
    }

    async fn process(&self, job: &JobDescriptor) -> Result<String> {
        let request = MoveRequest::from_descriptor(job)?;
        let outcome = self.move_snapshot(&request).await;
        let label = match &outcome {
            Ok(MoveOutcome::Moved | MoveOutcome::AlreadyInTarget) => OUTCOME_SUCCEEDED,
            Ok(MoveOutcome::Aborted) => OUTCOME_ABORTED,
            Err(StrataError::BackendUnavailable(_)) => "retried",
            Err(_) => "failed",
        };
        observability::record_sub_job(label);
        outcome.map(|o| match o {
            MoveOutcome::Aborted => OUTCOME_ABORTED.to_string(),
            MoveOutcome::Moved | MoveOutcome::AlreadyInTarget => OUTCOME_SUCCEEDED.to_string(),
        })
    }
}

/// Every stored payload of a snapshot with the checksum its content must match
pub(crate) fn payload_manifest(snapshot: &Snapshot) -> Vec<(StoragePath, Option<String>)> {
    let path = |element_id: &str| {
        StoragePath::new(
            snapshot.organization_id.as_str(),
            snapshot.media_package_id.as_str(),
            snapshot.version,
            element_id,
        )
    };
    snapshot
        .document
        .archived_elements()
        .map(|e| (path(&e.id), e.checksum.clone()))
        .chain(std::iter::once((path(&snapshot.document.manifest_id()), None)))
        .collect()
}

fn copy_verified(
    source: &dyn PayloadStore,
    target: &dyn PayloadStore,
    payloads: &[(StoragePath, Option<String>)],
) -> Result<()> {
    for (path, checksum) in payloads {
        let data = source.get(path)?;
        target.put(path, &data)?;
        let written = target.get(path)?;
        match checksum {
            Some(expected) => verify_checksum(expected, &written)?,
            None if written != data => {
                return Err(StrataError::IntegrityCheckFailed {
                    expected: compute_checksum(&data),
                    actual: compute_checksum(&written),
                })
            }
            None => {}
        }
        debug!(path = %path, size = data.len(), "Copied payload");
    }
    Ok(())
}
