pub mod client_builder;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::list_object_versions::ListObjectVersionsOutput;
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration, Delete,
    ObjectIdentifier, VersioningConfiguration,
};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use leaky_bucket::RateLimiter;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DEFAULT_REGION;
use crate::storage::StorageTrait;
use crate::types::error::ReconcileError;
use crate::types::{
    ContinuationToken, DeletionBatch, ListVersionsPage, NULL_VERSION_ID, ObjectVersionRef,
    VersionDeletion, VersioningStatus,
};

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// Non-service errors (network, timeout, construction failure) have no S3
/// error code; "N/A" is returned with the full error description.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E, HttpResponse>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

/// Map an S3 error code and HTTP status to the reconcile error taxonomy.
///
/// The error code wins when it is recognised; the status is the fallback,
/// which matters for HEAD requests whose error responses have no body.
pub(crate) fn classify_error_code(
    subject: &str,
    code: Option<&str>,
    status: Option<u16>,
    message: &str,
) -> ReconcileError {
    let detail = format!("{subject}: {} ({message})", code.unwrap_or("N/A"));

    match code {
        Some("NoSuchBucket" | "NotFound") => return ReconcileError::NotFound(detail),
        Some(
            "AccessDenied" | "AllAccessDisabled" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
            | "AccountProblem",
        ) => return ReconcileError::PermissionDenied(detail),
        Some(
            "SlowDown"
            | "Throttling"
            | "ThrottlingException"
            | "TooManyRequests"
            | "RequestLimitExceeded"
            | "ServiceUnavailable",
        ) => return ReconcileError::Throttled(detail),
        Some(
            "InternalError" | "OperationAborted" | "RequestTimeout" | "RequestTimeTooSkewed",
        ) => return ReconcileError::Unavailable(detail),
        Some("BucketNotEmpty") => return ReconcileError::BucketNotEmpty(detail),
        Some("BucketAlreadyExists") => return ReconcileError::AlreadyOwnedElsewhere(detail),
        Some("BucketAlreadyOwnedByYou") => return ReconcileError::AlreadyOwnedByYou(detail),
        _ => {}
    }

    match status {
        Some(404) => ReconcileError::NotFound(detail),
        Some(403) => ReconcileError::PermissionDenied(detail),
        Some(429 | 503) => ReconcileError::Throttled(detail),
        Some(500 | 502 | 504) => ReconcileError::Unavailable(detail),
        _ => ReconcileError::Storage(detail),
    }
}

fn classify_sdk_error<E>(subject: &str, e: &SdkError<E, HttpResponse>) -> ReconcileError
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
{
    match e {
        SdkError::ServiceError(service_err) => classify_error_code(
            subject,
            service_err.err().code(),
            Some(service_err.raw().status().as_u16()),
            service_err.err().message().unwrap_or("no message"),
        ),
        SdkError::TimeoutError(_) => {
            ReconcileError::Unavailable(format!("{subject}: request timed out"))
        }
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ReconcileError::Unavailable(format!("{subject}: {e}"))
        }
        _ => ReconcileError::Storage(format!("{subject}: {e}")),
    }
}

/// Wrap an SDK error so that its classification can be recovered with
/// [`crate::types::error::classify_error`] and its source chain is kept.
fn into_classified_error<E>(
    subject: &str,
    operation: &'static str,
    e: SdkError<E, HttpResponse>,
) -> anyhow::Error
where
    E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
{
    let classified = classify_sdk_error(subject, &e);
    anyhow!(e).context(operation).context(classified)
}

/// What a failed HeadBucket says about existence, when it says anything.
///
/// A 301 means the bucket exists in a region other than the client's.
pub(crate) fn existence_from_head_bucket_error(
    classified: &ReconcileError,
    status: Option<u16>,
) -> Option<bool> {
    match (classified, status) {
        (ReconcileError::NotFound(_), _) => Some(false),
        (_, Some(301)) => Some(true),
        _ => None,
    }
}

/// `us-east-1` is the default location and must not be sent as a constraint.
fn location_constraint(region: &str) -> Option<BucketLocationConstraint> {
    if region.is_empty() || region == DEFAULT_REGION {
        None
    } else {
        Some(BucketLocationConstraint::from(region))
    }
}

fn versioning_status_from(status: Option<&BucketVersioningStatus>) -> VersioningStatus {
    match status {
        Some(BucketVersioningStatus::Enabled) => VersioningStatus::Enabled,
        Some(BucketVersioningStatus::Suspended) => VersioningStatus::Suspended,
        _ => VersioningStatus::Unversioned,
    }
}

/// Convert one ListObjectVersions response into a page of refs.
///
/// Versions come first, then delete markers. Entries without a key are
/// skipped; a missing version id is the `"null"` version.
fn page_from_output(bucket: &str, output: &ListObjectVersionsOutput) -> ListVersionsPage {
    let mut items = Vec::with_capacity(output.versions().len() + output.delete_markers().len());

    for version in output.versions() {
        let Some(key) = version.key() else {
            tracing::warn!(bucket = bucket, "Skipping object version without a key.");
            continue;
        };
        items.push(ObjectVersionRef::version(
            key,
            version.version_id().unwrap_or(NULL_VERSION_ID),
        ));
    }

    for marker in output.delete_markers() {
        let Some(key) = marker.key() else {
            tracing::warn!(bucket = bucket, "Skipping delete marker without a key.");
            continue;
        };
        items.push(ObjectVersionRef::delete_marker(
            key,
            marker.version_id().unwrap_or(NULL_VERSION_ID),
        ));
    }

    let next_token = if output.is_truncated() == Some(true) {
        Some(ContinuationToken::new(
            output.next_key_marker().map(String::from),
            output.next_version_id_marker().map(String::from),
        ))
    } else {
        None
    };

    ListVersionsPage { items, next_token }
}

/// Pair every ref of a batch with the per-item error S3 reported for it.
///
/// DeleteObjects runs in quiet mode, so refs without an error entry were
/// deleted.
fn map_delete_results(
    batch: &DeletionBatch,
    errors: &[aws_sdk_s3::types::Error],
) -> Vec<VersionDeletion> {
    let mut error_map: HashMap<(&str, &str), &aws_sdk_s3::types::Error> = HashMap::new();
    for error in errors {
        let Some(key) = error.key() else {
            continue;
        };
        error_map.insert((key, error.version_id().unwrap_or_default()), error);
    }

    batch
        .items()
        .iter()
        .map(|version| {
            let error = error_map
                .get(&(version.key.as_str(), version.version_id.as_str()))
                .or_else(|| error_map.get(&(version.key.as_str(), "")));
            match error {
                None => VersionDeletion::deleted(version.clone()),
                Some(error) => VersionDeletion::failed(
                    version.clone(),
                    error.code().unwrap_or("unknown"),
                    error.message().unwrap_or("no message"),
                ),
            }
        })
        .collect()
}

/// S3 implementation of [`StorageTrait`].
#[derive(Clone)]
pub struct S3Storage {
    client: Arc<Client>,
    rate_limit_objects_per_sec: Option<Arc<RateLimiter>>,
}

impl S3Storage {
    pub fn new(client: Arc<Client>, rate_limit_objects_per_sec: Option<Arc<RateLimiter>>) -> Self {
        Self {
            client,
            rate_limit_objects_per_sec,
        }
    }

    /// Region a bucket is created in: the requested one, else the region the
    /// client resolved from its configuration, environment or profile.
    fn creation_region(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_string)
            .or_else(|| self.client.config().region().map(|region| region.to_string()))
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Acquire a single rate limit token. Used for listing calls.
    async fn exec_rate_limit_objects_per_sec(&self) {
        if let Some(ref rate_limiter) = self.rate_limit_objects_per_sec {
            rate_limiter.acquire_one().await;
        }
    }

    /// Acquire one token per object of a batch delete.
    async fn exec_rate_limit_objects_per_sec_n(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(ref rate_limiter) = self.rate_limit_objects_per_sec {
            rate_limiter.acquire(count).await;
        }
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let classified = classify_sdk_error(bucket, &e);
                let status = e.raw_response().map(|response| response.status().as_u16());
                if let Some(exists) = existence_from_head_bucket_error(&classified, status) {
                    tracing::debug!(
                        bucket = bucket,
                        exists = exists,
                        status = status,
                        "HeadBucket failed but answered the existence check."
                    );
                    return Ok(exists);
                }

                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 HeadBucket API call failed for bucket '{}': {} ({}).",
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                Err(anyhow!(e)
                    .context("aws_sdk_s3::client::head_bucket() failed.")
                    .context(classified))
            }
        }
    }

    async fn list_object_versions_page(
        &self,
        bucket: &str,
        token: Option<ContinuationToken>,
        max_keys: i32,
    ) -> Result<ListVersionsPage> {
        self.exec_rate_limit_objects_per_sec().await;

        let token = token.unwrap_or_default();
        let output = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .set_key_marker(token.key_marker)
            .set_version_id_marker(token.version_id_marker)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 ListObjectVersions API call failed for bucket '{}': {} ({}).",
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                into_classified_error(
                    bucket,
                    "aws_sdk_s3::client::list_object_versions() failed.",
                    e,
                )
            })?;

        Ok(page_from_output(bucket, &output))
    }

    async fn delete_versions(
        &self,
        bucket: &str,
        batch: &DeletionBatch,
    ) -> Result<Vec<VersionDeletion>> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        self.exec_rate_limit_objects_per_sec_n(batch.len()).await;

        let objects = batch
            .items()
            .iter()
            .map(|version| {
                ObjectIdentifier::builder()
                    .key(&version.key)
                    .version_id(&version.version_id)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to build ObjectIdentifier")?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .context("Failed to build Delete request")?;

        let object_count = batch.len();
        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    object_count = object_count,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObjects API call failed for {} versions in bucket '{}': {} ({}).",
                    object_count,
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                into_classified_error(bucket, "aws_sdk_s3::client::delete_objects() failed.", e)
            })?;

        for error in output.errors() {
            tracing::warn!(
                bucket = bucket,
                key = error.key().unwrap_or_default(),
                version_id = error.version_id().unwrap_or_default(),
                s3_error_code = error.code().unwrap_or_default(),
                s3_error_message = error.message().unwrap_or_default(),
                "Failed to delete object version.",
            );
        }

        Ok(map_delete_results(batch, output.errors()))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::warn!(
                    bucket = bucket,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteBucket API call failed for bucket '{}': {} ({}).",
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                into_classified_error(bucket, "aws_sdk_s3::client::delete_bucket() failed.", e)
            })?;

        Ok(())
    }

    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        let region = self.creation_region(region);
        let region = region.as_str();
        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(constraint) = location_constraint(region) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        request.send().await.map_err(|e| {
            let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
            tracing::warn!(
                bucket = bucket,
                region = region,
                s3_error_code = s3_error_code,
                s3_error_message = s3_error_message,
                "S3 CreateBucket API call failed for bucket '{}': {} ({}).",
                bucket,
                s3_error_code,
                s3_error_message,
            );
            into_classified_error(bucket, "aws_sdk_s3::client::create_bucket() failed.", e)
        })?;

        Ok(())
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> Result<VersioningStatus> {
        let response = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 GetBucketVersioning API call failed for bucket '{}': {} ({}).",
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                into_classified_error(
                    bucket,
                    "aws_sdk_s3::client::get_bucket_versioning() failed.",
                    e,
                )
            })?;

        Ok(versioning_status_from(response.status()))
    }

    async fn put_bucket_versioning(&self, bucket: &str, status: VersioningStatus) -> Result<()> {
        let status = match status {
            VersioningStatus::Enabled => BucketVersioningStatus::Enabled,
            VersioningStatus::Suspended => BucketVersioningStatus::Suspended,
            VersioningStatus::Unversioned => {
                return Err(anyhow!(ReconcileError::InvalidConfig(
                    "versioning cannot be turned off once enabled; suspend it instead.".to_string()
                )));
            }
        };

        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 PutBucketVersioning API call failed for bucket '{}': {} ({}).",
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                into_classified_error(
                    bucket,
                    "aws_sdk_s3::client::put_bucket_versioning() failed.",
                    e,
                )
            })?;

        Ok(())
    }
}
