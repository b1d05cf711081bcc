use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use dyn_clone::DynClone;
use leaky_bucket::RateLimiter;
use std::sync::Arc;

use crate::config::Config;
use crate::types::token::ReconcileCancellationToken;
use crate::types::{
    ContinuationToken, DeletionBatch, ListVersionsPage, VersionDeletion, VersioningStatus,
};

pub mod retry;
pub mod s3;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// The minimal set of bucket operations a reconciliation needs.
///
/// Every method takes the bucket name so one storage value can serve any
/// bucket. Failures are `anyhow::Error` values carrying a
/// [`crate::types::error::ReconcileError`]; use
/// [`crate::types::error::classify_error`] to inspect them.
#[async_trait]
pub trait StorageTrait: DynClone {
    /// Returns false only when the provider says the bucket does not exist.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Fetch one page of object versions and delete markers.
    ///
    /// `next_token` of the returned page is `None` on the last page.
    async fn list_object_versions_page(
        &self,
        bucket: &str,
        token: Option<ContinuationToken>,
        max_keys: i32,
    ) -> Result<ListVersionsPage>;

    /// Delete every version in `batch` with a single request.
    ///
    /// Returns one [`VersionDeletion`] per ref of the batch. An `Err` means
    /// the request as a whole failed and nothing is known about the items.
    async fn delete_versions(
        &self,
        bucket: &str,
        batch: &DeletionBatch,
    ) -> Result<Vec<VersionDeletion>>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Create the bucket.
    ///
    /// With no `region` the bucket goes to the region the client resolved.
    /// `us-east-1` is created without a location constraint.
    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()>;

    async fn get_bucket_versioning(&self, bucket: &str) -> Result<VersioningStatus>;

    async fn put_bucket_versioning(&self, bucket: &str, status: VersioningStatus) -> Result<()>;
}

dyn_clone::clone_trait_object!(StorageTrait);

// Default refill interval 100ms
const REFILL_PER_INTERVAL_DIVIDER: usize = 10;

fn build_rate_limiter(rate_limit_value: u32) -> Arc<RateLimiter> {
    let refill = if (rate_limit_value as usize) <= REFILL_PER_INTERVAL_DIVIDER {
        1
    } else {
        rate_limit_value as usize / REFILL_PER_INTERVAL_DIVIDER
    };

    Arc::new(
        RateLimiter::builder()
            .max(rate_limit_value as usize)
            .initial(rate_limit_value as usize)
            .refill(refill)
            .fair(true)
            .build(),
    )
}

/// Create the S3 storage used by a reconciliation run.
///
/// The S3 adapter is wrapped in [`retry::RetryingStorage`] so throttled and
/// unavailable calls are retried with backoff before reaching the caller.
pub async fn create_storage(
    config: &Config,
    cancellation_token: ReconcileCancellationToken,
) -> Storage {
    let client = match &config.target_client_config {
        Some(client_config) => client_config.create_client().await,
        None => aws_sdk_s3::Client::new(&aws_config::load_defaults(BehaviorVersion::latest()).await),
    };

    let rate_limit_objects_per_sec = config.rate_limit_objects.map(build_rate_limiter);

    let s3_storage: Storage = Box::new(s3::S3Storage::new(
        Arc::new(client),
        rate_limit_objects_per_sec,
    ));

    Box::new(retry::RetryingStorage::new(
        s3_storage,
        config.backoff_config,
        cancellation_token,
    ))
}
