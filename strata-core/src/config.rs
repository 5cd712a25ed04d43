//! Configuration for storage tiers and engine settings
//!
//! A [`StrataConfig`] names the configured tiers, picks the primary tier that new
//! snapshots land in, and carries the timeouts and retry bounds used by migration.
//! It is usually loaded from a JSON file:
//!
//! ```json
//! {
//!   "primary_tier": "hot",
//!   "tiers": [
//!     { "name": "hot", "backend": { "type": "local", "path": "/var/lib/strata/hot" } },
//!     { "name": "cold", "backend": { "type": "s3", "bucket": "strata-archive" } }
//!   ],
//!   "index_path": "/var/lib/strata/index.json.gz"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, StrataError};

/// Backend behind one named tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TierBackend {
    /// Local filesystem rooted at `path`
    Local { path: PathBuf },
    /// In-process memory; contents are lost on exit
    Memory,
    /// Amazon S3 bucket
    S3 {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
}

/// One named storage tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub backend: TierBackend,
}

impl TierConfig {
    pub fn local<S: Into<String>, P: Into<PathBuf>>(name: S, path: P) -> Self {
        Self {
            name: name.into(),
            backend: TierBackend::Local { path: path.into() },
        }
    }

    pub fn memory<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            backend: TierBackend::Memory,
        }
    }

    pub fn s3<S: Into<String>, B: Into<String>>(name: S, bucket: B, region: Option<String>) -> Self {
        Self {
            name: name.into(),
            backend: TierBackend::S3 {
                bucket: bucket.into(),
                region,
            },
        }
    }

    /// Parse a tier URI
    ///
    /// Supports formats:
    /// - `s3://bucket-name` for S3 storage
    /// - `memory://` for an in-process tier
    /// - `/local/path` or `./relative/path` for local storage
    pub fn from_uri<S: Into<String>>(name: S, uri: &str) -> Result<Self> {
        let name = name.into();
        if let Some(s3_part) = uri.strip_prefix("s3://") {
            let bucket = s3_part.split('/').next().unwrap_or("");
            if bucket.is_empty() {
                return Err(StrataError::validation("Invalid S3 URI: missing bucket name"));
            }
            Ok(Self::s3(name, bucket, None))
        } else if uri.starts_with("memory://") {
            Ok(Self::memory(name))
        } else if uri.is_empty() {
            Err(StrataError::validation(format!(
                "tier '{name}' has an empty location"
            )))
        } else {
            Ok(Self::local(name, uri.strip_prefix("file://").unwrap_or(uri)))
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Tier new snapshots are written to
    pub primary_tier: String,
    pub tiers: Vec<TierConfig>,
    /// Where the snapshot index is persisted; in-memory only when absent
    #[serde(default)]
    pub index_path: Option<PathBuf>,
    #[serde(default = "default_copy_timeout_secs")]
    pub copy_timeout_secs: u64,
    /// Attempts per migration sub-job when a tier is temporarily unavailable
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: u32,
    /// Defaults to the number of CPUs
    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_version_claim_attempts")]
    pub version_claim_attempts: u32,
    /// How long finished migration sub-jobs stay queryable
    #[serde(default = "default_finished_job_retention_secs")]
    pub finished_job_retention_secs: u64,
}

fn default_copy_timeout_secs() -> u64 {
    300
}

fn default_max_job_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_version_claim_attempts() -> u32 {
    3
}

fn default_finished_job_retention_secs() -> u64 {
    3600
}

impl StrataConfig {
    /// Single tier configuration, mostly useful for tests
    pub fn single_tier(tier: TierConfig) -> Self {
        Self {
            primary_tier: tier.name.clone(),
            tiers: vec![tier],
            index_path: None,
            copy_timeout_secs: default_copy_timeout_secs(),
            max_job_attempts: default_max_job_attempts(),
            max_concurrent_jobs: None,
            poll_interval_ms: default_poll_interval_ms(),
            version_claim_attempts: default_version_claim_attempts(),
            finished_job_retention_secs: default_finished_job_retention_secs(),
        }
    }

    pub fn with_tier(mut self, tier: TierConfig) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn with_index_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn with_copy_timeout(mut self, timeout: Duration) -> Self {
        self.copy_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Read and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StrataError::validation(format!(
                "cannot read configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tier(&self, name: &str) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn finished_job_retention(&self) -> Duration {
        Duration::from_secs(self.finished_job_retention_secs)
    }

    pub fn concurrency(&self) -> usize {
        self.max_concurrent_jobs.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(StrataError::validation("at least one storage tier is required"));
        }

        let mut seen = HashSet::new();
        for tier in &self.tiers {
            if tier.name.trim().is_empty() {
                return Err(StrataError::validation("tier names must not be empty"));
            }
            if !seen.insert(tier.name.as_str()) {
                return Err(StrataError::validation(format!(
                    "duplicate tier name '{}'",
                    tier.name
                )));
            }
            if let TierBackend::S3 { bucket, .. } = &tier.backend {
                if bucket.is_empty() {
                    return Err(StrataError::validation(format!(
                        "S3 tier '{}' requires a valid bucket name",
                        tier.name
                    )));
                }
            }
        }

        if !seen.contains(self.primary_tier.as_str()) {
            return Err(StrataError::validation(format!(
                "primary tier '{}' is not configured",
                self.primary_tier
            )));
        }
        if self.copy_timeout_secs == 0 {
            return Err(StrataError::validation("copy_timeout_secs must be positive"));
        }
        if self.max_job_attempts == 0 || self.version_claim_attempts == 0 {
            return Err(StrataError::validation("attempt limits must be at least 1"));
        }
        if self.max_concurrent_jobs == Some(0) {
            return Err(StrataError::validation("max_concurrent_jobs must be at least 1"));
        }
        Ok(())
    }
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self::single_tier(TierConfig::local("local", "./strata-data"))
    }
}
