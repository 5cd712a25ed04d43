/*!
Job dispatch.

Long-running work (payload migration) is described by a [`JobDescriptor`], handed to a
[`JobDispatcher`] and executed by the [`JobService`] registered for the descriptor's
operation name. Callers poll [`JobDispatcher::status`] until the job is finished.
*/

pub mod dispatcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::Result;

pub use dispatcher::InProcessDispatcher;

/// Identifier of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unit of work: an operation name and its positional arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub operation: String,
    pub arguments: Vec<String>,
}

impl JobDescriptor {
    pub fn new<S: Into<String>>(operation: S, arguments: Vec<String>) -> Self {
        Self {
            operation: operation.into(),
            arguments,
        }
    }
}

/// Dispatcher-side state of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchStatus {
    Queued,
    Running,
    /// `payload` is the service's result on success and the error message on failure
    Finished { success: bool, payload: String },
}

impl DispatchStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, DispatchStatus::Finished { .. })
    }
}

/// Executes jobs of one operation
#[async_trait]
pub trait JobService: Send + Sync {
    /// Operation name this service is registered under
    fn operation(&self) -> &str;

    /// Run one job
    ///
    /// Errors classified as transient (`BackendUnavailable`) are retried by the
    /// dispatcher; any other error finishes the job unsuccessfully.
    async fn process(&self, job: &JobDescriptor) -> Result<String>;
}

/// Accepts jobs and reports their progress
#[cfg_attr(test, mockall::automock)]
pub trait JobDispatcher: Send + Sync {
    fn submit(&self, job: JobDescriptor) -> Result<JobId>;

    /// `NotFound` for ids this dispatcher never issued
    fn status(&self, id: JobId) -> Result<DispatchStatus>;
}
