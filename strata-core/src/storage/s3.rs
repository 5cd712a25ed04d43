/*!
Amazon S3 archival tier.

Objects are stored under `<prefix><org>/<media package>/<version>/<element>` in one
bucket. The AWS SDK is async; this adapter owns a small runtime and blocks on it, so it
must be called from a blocking context (the migration worker runs copies through
`spawn_blocking`).
*/

use aws_config::SdkConfig;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use super::{PayloadStore, StoragePath};
use crate::model::Version;
use crate::{Result, StrataError};

/// Amazon S3 payload store
///
/// Credentials come from the standard AWS provider chain (environment, profile,
/// instance or task role).
#[derive(Debug)]
pub struct S3PayloadStore {
    client: S3Client,
    bucket: String,
    prefix: String,
    runtime: Arc<Runtime>,
}

impl S3PayloadStore {
    /// Create a store for `bucket`, loading AWS configuration from the environment
    pub fn new(bucket: String, region: Option<String>) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| {
            StrataError::storage(format!("Failed to create async runtime for S3 client: {e}"))
        })?;

        let sdk_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(aws_config::Region::new(region));
            }
            loader.load().await
        });

        if sdk_config.credentials_provider().is_none() {
            return Err(StrataError::storage(
                "AWS credentials not found. Set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY and AWS_REGION",
            ));
        }

        Self::build(bucket, &sdk_config, runtime)
    }

    /// Create a store with explicit AWS configuration
    pub fn with_config(bucket: String, config: SdkConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| {
            StrataError::storage(format!("Failed to create async runtime for S3 client: {e}"))
        })?;
        Self::build(bucket, &config, runtime)
    }

    fn build(bucket: String, config: &SdkConfig, runtime: Runtime) -> Result<Self> {
        if bucket.is_empty() {
            return Err(StrataError::validation("S3 tier requires a bucket name"));
        }
        let client = S3Client::new(config);
        info!(bucket = %bucket, "Initialized S3 payload store");
        Ok(Self {
            client,
            bucket,
            prefix: String::new(),
            runtime: Arc::new(runtime),
        })
    }

    /// Place every object under `prefix` inside the bucket
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.prefix = prefix;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, path: &StoragePath) -> Result<String> {
        path.validate()?;
        Ok(format!("{}{}", self.prefix, path.key()))
    }
}

impl PayloadStore for S3PayloadStore {
    fn store_type(&self) -> &str {
        "s3"
    }

    fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        let key = self.object_key(path)?;
        debug!(bucket = %self.bucket, key = %key, size = data.len(), "put_object");

        self.runtime
            .block_on(async {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .body(ByteStream::from(data.to_vec()))
                    .send()
                    .await
            })
            .map(|_| ())
            .map_err(|e| {
                let mapped = map_s3_error("put_object", e, &key);
                error!(bucket = %self.bucket, key = %key, error = %mapped, "Failed to store payload in S3");
                mapped
            })
    }

    fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        let key = self.object_key(path)?;
        debug!(bucket = %self.bucket, key = %key, "get_object");

        self.runtime.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| map_s3_error("get_object", e, &key))?;
            let data = output.body.collect().await.map_err(|e| {
                StrataError::backend_unavailable(format!("Failed to read S3 object stream: {e}"))
            })?;
            Ok(data.into_bytes().to_vec())
        })
    }

    fn contains(&self, path: &StoragePath) -> Result<bool> {
        let key = self.object_key(path)?;
        let result = self.runtime.block_on(async {
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
        });
        match result {
            Ok(_) => Ok(true),
            Err(e) => match map_s3_error("head_object", e, &key) {
                StrataError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    fn delete(&self, path: &StoragePath) -> Result<()> {
        let key = self.object_key(path)?;
        debug!(bucket = %self.bucket, key = %key, "delete_object");

        self.runtime
            .block_on(async {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send()
                    .await
            })
            .map(|_| ())
            .map_err(|e| map_s3_error("delete_object", e, &key))
    }

    fn delete_snapshot(
        &self,
        organization_id: &str,
        media_package_id: &str,
        version: Version,
    ) -> Result<usize> {
        let prefix = format!(
            "{}{}",
            self.prefix,
            StoragePath::snapshot_prefix(organization_id, media_package_id, version)
        );

        self.runtime.block_on(async {
            let mut removed = 0;
            let mut continuation: Option<String> = None;
            loop {
                let page = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&prefix)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                    .map_err(|e| map_s3_error("list_objects_v2", e, &prefix))?;

                for object in page.contents() {
                    if let Some(key) = object.key() {
                        self.client
                            .delete_object()
                            .bucket(&self.bucket)
                            .key(key)
                            .send()
                            .await
                            .map_err(|e| map_s3_error("delete_object", e, key))?;
                        removed += 1;
                    }
                }

                match page.next_continuation_token() {
                    Some(token) => continuation = Some(token.to_string()),
                    None => break,
                }
            }
            Ok(removed)
        })
    }

    fn check_reachable(&self) -> Result<()> {
        self.runtime
            .block_on(async { self.client.head_bucket().bucket(&self.bucket).send().await })
            .map(|_| ())
            .map_err(|e| match map_s3_error("head_bucket", e, &self.bucket) {
                StrataError::BackendUnavailable(msg) => StrataError::BackendUnavailable(msg),
                other => StrataError::backend_unavailable(other.to_string()),
            })
    }
}

/// Map AWS SDK errors onto the Strata taxonomy
fn map_s3_error<E: ProvideErrorMetadata + std::fmt::Debug>(
    op: &str,
    error: aws_sdk_s3::error::SdkError<E, HttpResponse>,
    key: &str,
) -> StrataError {
    use aws_sdk_s3::error::SdkError;

    match &error {
        SdkError::DispatchFailure(dispatch_err) => StrataError::backend_unavailable(format!(
            "S3 {op} request failed to dispatch: {dispatch_err:?}"
        )),
        SdkError::TimeoutError(_) => {
            StrataError::backend_unavailable(format!("S3 {op} request timed out (key: {key})"))
        }
        SdkError::ResponseError(response_err) => {
            StrataError::backend_unavailable(format!("S3 {op} response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("NoSuchKey") | Some("NotFound") => {
                StrataError::not_found(format!("S3 object '{key}'"))
            }
            Some("NoSuchBucket") => StrataError::storage(format!("S3 bucket for '{key}' not found")),
            Some("AccessDenied") | Some("Forbidden") => StrataError::storage(
                "Access denied to S3 (check credentials and permissions)",
            ),
            Some("InternalError") | Some("SlowDown") | Some("ServiceUnavailable") => {
                StrataError::backend_unavailable(format!("S3 {op} transient service error"))
            }
            Some(code) => StrataError::storage(format!(
                "S3 service error ({}): {}",
                code,
                service_err.err().message().unwrap_or("Unknown error")
            )),
            None => StrataError::storage(format!("S3 {op} service error: {service_err:?}")),
        },
        _ => StrataError::storage(format!("S3 {op} error: {error}")),
    }
}
