/*!
In-process job dispatcher running jobs on a tokio runtime.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use strata_retry::{BoxFuture, RetryPolicy};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{DispatchStatus, JobDescriptor, JobDispatcher, JobId, JobService};
use crate::{Result, StrataError};

/// How long a finished job's status stays queryable by default
pub const DEFAULT_FINISHED_JOB_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct JobEntry {
    status: DispatchStatus,
    finished_at: Option<Instant>,
}

type JobTable = Arc<Mutex<HashMap<JobId, JobEntry>>>;

/// Runs submitted jobs as tokio tasks
///
/// At most `max_concurrent` jobs run at once; the rest stay `Queued`. Every job is
/// wrapped in [`strata_retry::with_policy`], so transient failures are retried with
/// backoff up to the policy's attempt limit.
///
/// Finished jobs stay queryable for the retention window and are evicted on the next
/// submit after that; `status` of an evicted job is `NotFound`. Unfinished jobs are
/// never evicted.
pub struct InProcessDispatcher {
    handle: Handle,
    services: RwLock<HashMap<String, Arc<dyn JobService>>>,
    jobs: JobTable,
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
    retention: Duration,
}

impl std::fmt::Debug for InProcessDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessDispatcher")
            .field("available_permits", &self.semaphore.available_permits())
            .field("max_attempts", &self.policy.max_attempts)
            .field("retention", &self.retention)
            .finish()
    }
}

impl InProcessDispatcher {
    pub fn new(handle: Handle, max_concurrent: usize, policy: RetryPolicy) -> Self {
        let max_concurrent = max_concurrent.max(1);
        info!(
            max_concurrent,
            max_attempts = policy.max_attempts,
            "Job dispatcher initialized"
        );
        Self {
            handle,
            services: RwLock::new(HashMap::new()),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            policy,
            retention: DEFAULT_FINISHED_JOB_RETENTION,
        }
    }

    /// Keep finished jobs queryable for `retention`
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Dispatcher on the current tokio runtime, one job slot per CPU
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            StrataError::validation(format!("job dispatcher needs a tokio runtime: {e}"))
        })?;
        Ok(Self::new(handle, num_cpus::get(), RetryPolicy::default()))
    }

    /// Route jobs of `service.operation()` to `service`
    pub fn register(&self, service: Arc<dyn JobService>) {
        let operation = service.operation().to_string();
        debug!(operation = %operation, "Registered job service");
        self.services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(operation, service);
    }

    /// Number of jobs that have not finished yet
    pub fn pending(&self) -> usize {
        lock(&self.jobs)
            .values()
            .filter(|entry| !entry.status.is_finished())
            .count()
    }

    /// Number of tracked jobs, after evicting finished ones past the retention window
    pub fn tracked(&self) -> usize {
        self.evict_expired();
        lock(&self.jobs).len()
    }

    /// Drop finished jobs older than the retention window; returns how many went
    pub fn evict_expired(&self) -> usize {
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, entry| {
            entry
                .finished_at
                .map_or(true, |at| at.elapsed() < self.retention)
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(evicted, remaining = jobs.len(), "Evicted finished jobs");
        }
        evicted
    }
}

impl JobDispatcher for InProcessDispatcher {
    fn submit(&self, job: JobDescriptor) -> Result<JobId> {
        let service = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&job.operation)
            .cloned()
            .ok_or_else(|| {
                StrataError::validation(format!(
                    "no service registered for operation '{}'",
                    job.operation
                ))
            })?;

        self.evict_expired();
        let id = JobId::new();
        set_status(&self.jobs, id, DispatchStatus::Queued);
        debug!(job_id = %id, operation = %job.operation, arguments = ?job.arguments, "Submitted job");

        self.handle.spawn(run_job(
            id,
            job,
            service,
            Arc::clone(&self.semaphore),
            self.policy.clone(),
            Arc::clone(&self.jobs),
        ));
        Ok(id)
    }

    fn status(&self, id: JobId) -> Result<DispatchStatus> {
        lock(&self.jobs)
            .get(&id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| StrataError::not_found(format!("job {id}")))
    }
}

async fn run_job(
    id: JobId,
    job: JobDescriptor,
    service: Arc<dyn JobService>,
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
    jobs: JobTable,
) {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            set_status(&jobs, id, finished(false, "dispatcher shut down"));
            return;
        }
    };
    set_status(&jobs, id, DispatchStatus::Running);

    let operation = job.operation.clone();
    let job = Arc::new(job);
    let outcome = strata_retry::with_policy(&operation, policy, |attempt| -> BoxFuture<'static, String> {
        let service = Arc::clone(&service);
        let job = Arc::clone(&job);
        Box::pin(async move {
            debug!(job_id = %id, attempt, "Running job");
            service
                .process(&job)
                .await
                .map_err(|e| strata_retry::classify(&job.operation, e))
        })
    })
    .await;

    let status = match outcome {
        Ok(payload) => {
            debug!(job_id = %id, operation = %operation, "Job finished");
            finished(true, payload)
        }
        Err(err) => {
            warn!(job_id = %id, operation = %operation, error = %err, "Job failed");
            finished(false, err.source_error().to_string())
        }
    };
    set_status(&jobs, id, status);
}

fn finished<S: Into<String>>(success: bool, payload: S) -> DispatchStatus {
    DispatchStatus::Finished {
        success,
        payload: payload.into(),
    }
}

fn set_status(jobs: &JobTable, id: JobId, status: DispatchStatus) {
    let finished_at = status.is_finished().then(Instant::now);
    lock(jobs).insert(id, JobEntry { status, finished_at });
}

fn lock(jobs: &JobTable) -> std::sync::MutexGuard<'_, HashMap<JobId, JobEntry>> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use strata_retry::immediate_backoff_policy;

    struct FlakyService {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobService for FlakyService {
        fn operation(&self) -> &str {
            "flaky"
        }

        async fn process(&self, job: &JobDescriptor) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if job.arguments.first().map(String::as_str) == Some("broken") {
                return Err(StrataError::validation("bad argument"));
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StrataError::backend_unavailable("tier offline"));
            }
            Ok("done".to_string())
        }
    }

    struct SlowService {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobService for SlowService {
        fn operation(&self) -> &str {
            "slow"
        }

        async fn process(&self, _job: &JobDescriptor) -> Result<String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    fn dispatcher(max_concurrent: usize, max_attempts: usize) -> InProcessDispatcher {
        InProcessDispatcher::new(
            Handle::current(),
            max_concurrent,
            RetryPolicy::new(max_attempts, immediate_backoff_policy()),
        )
    }

    async fn wait_finished(dispatcher: &InProcessDispatcher, id: JobId) -> DispatchStatus {
        loop {
            let status = dispatcher.status(id).unwrap();
            if status.is_finished() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let service = Arc::new(FlakyService {
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(2, 3);
        dispatcher.register(service.clone());

        let id = dispatcher.submit(JobDescriptor::new("flaky", vec![])).unwrap();
        assert_eq!(
            wait_finished(&dispatcher, id).await,
            DispatchStatus::Finished {
                success: true,
                payload: "done".to_string()
            }
        );
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let service = Arc::new(FlakyService {
            failures_left: AtomicUsize::new(10),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(2, 3);
        dispatcher.register(service.clone());

        let id = dispatcher.submit(JobDescriptor::new("flaky", vec![])).unwrap();
        match wait_finished(&dispatcher, id).await {
            DispatchStatus::Finished { success, payload } => {
                assert!(!success);
                assert!(payload.contains("tier offline"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let service = Arc::new(FlakyService {
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(2, 3);
        dispatcher.register(service.clone());

        let id = dispatcher
            .submit(JobDescriptor::new("flaky", vec!["broken".to_string()]))
            .unwrap();
        let status = wait_finished(&dispatcher, id).await;
        assert!(matches!(status, DispatchStatus::Finished { success: false, .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let service = Arc::new(SlowService {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(2, 1);
        dispatcher.register(service.clone());

        let ids: Vec<JobId> = (0..6)
            .map(|_| dispatcher.submit(JobDescriptor::new("slow", vec![])).unwrap())
            .collect();
        for id in ids {
            wait_finished(&dispatcher, id).await;
        }
        assert!(service.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.pending(), 0);
        // still inside the default retention window
        assert_eq!(dispatcher.tracked(), 6);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted_after_retention() {
        let service = Arc::new(SlowService {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(4, 1).with_retention(Duration::from_millis(30));
        dispatcher.register(service);

        let ids: Vec<JobId> = (0..4)
            .map(|_| dispatcher.submit(JobDescriptor::new("slow", vec![])).unwrap())
            .collect();
        assert_eq!(dispatcher.pending(), 4);
        for id in &ids {
            wait_finished(&dispatcher, *id).await;
        }
        assert_eq!(dispatcher.pending(), 0);
        assert!(dispatcher.status(ids[0]).unwrap().is_finished());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let fresh = dispatcher.submit(JobDescriptor::new("slow", vec![])).unwrap();
        assert!(dispatcher.status(ids[0]).unwrap_err().is_not_found());
        // the running job is kept no matter how old
        assert_eq!(dispatcher.tracked(), 1);
        wait_finished(&dispatcher, fresh).await;
    }

    #[tokio::test]
    async fn test_unknown_operation_and_job() {
        let dispatcher = dispatcher(1, 1);
        assert!(matches!(
            dispatcher.submit(JobDescriptor::new("nope", vec![])),
            Err(StrataError::Validation(_))
        ));
        assert!(dispatcher.status(JobId::new()).unwrap_err().is_not_found());
    }
}
