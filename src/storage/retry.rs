//! Retry of transient storage failures.
//!
//! [`RetryingStorage`] wraps any [`StorageTrait`] and retries calls that fail
//! with `Throttled` or `Unavailable`, sleeping with capped exponential
//! backoff plus jitter between attempts. Batch deletes additionally
//! re-submit the items S3 rejected with a transient per-item error code.

use std::future::Future;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::BackoffConfig;
use crate::storage::{Storage, StorageTrait};
use crate::types::error::{ReconcileError, is_transient_error};
use crate::types::token::{ReconcileCancellationToken, sleep_unless_cancelled};
use crate::types::{
    ContinuationToken, DeletionBatch, ListVersionsPage, VersionDeletion, VersioningStatus,
};

/// Per-item DeleteObjects error codes worth another attempt.
///
/// A missing code is reported as `unknown` and retried too.
pub(crate) fn is_retryable_error_code(code: &str) -> bool {
    matches!(
        code,
        "InternalError" | "SlowDown" | "ServiceUnavailable" | "RequestTimeout" | "unknown"
    )
}

/// Backoff before the attempt following `attempt` (1-based).
///
/// `initial * 2^(attempt-1)`, capped at the maximum, plus up to half of that
/// again as jitter.
pub(crate) fn calculate_backoff(config: &BackoffConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base_ms = config
        .initial_backoff_milliseconds
        .saturating_mul(1u64 << exponent);
    let capped_ms = base_ms.min(config.max_backoff_milliseconds);

    let jitter_ms = rand::rng().random_range(0..=capped_ms / 2);
    Duration::from_millis(capped_ms + jitter_ms)
}

#[derive(Clone)]
pub struct RetryingStorage {
    inner: Storage,
    config: BackoffConfig,
    cancellation_token: ReconcileCancellationToken,
}

impl RetryingStorage {
    pub fn new(
        inner: Storage,
        config: BackoffConfig,
        cancellation_token: ReconcileCancellationToken,
    ) -> Self {
        Self {
            inner,
            config,
            cancellation_token,
        }
    }

    async fn retry<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.config.max_attempts || !is_transient_error(&e) {
                        return Err(e);
                    }

                    let backoff = calculate_backoff(&self.config, attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error."
                    );

                    if !sleep_unless_cancelled(backoff, &self.cancellation_token).await {
                        return Err(anyhow!(ReconcileError::Cancelled));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StorageTrait for RetryingStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.retry("bucket_exists", || self.inner.bucket_exists(bucket))
            .await
    }

    async fn list_object_versions_page(
        &self,
        bucket: &str,
        token: Option<ContinuationToken>,
        max_keys: i32,
    ) -> Result<ListVersionsPage> {
        self.retry("list_object_versions_page", || {
            self.inner
                .list_object_versions_page(bucket, token.clone(), max_keys)
        })
        .await
    }

    async fn delete_versions(
        &self,
        bucket: &str,
        batch: &DeletionBatch,
    ) -> Result<Vec<VersionDeletion>> {
        let mut results = self
            .retry("delete_versions", || self.inner.delete_versions(bucket, batch))
            .await?;

        let mut attempt = 1;
        loop {
            let pending: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| {
                    r.error
                        .as_ref()
                        .is_some_and(|e| is_retryable_error_code(&e.code))
                })
                .map(|(index, _)| index)
                .collect();

            if pending.is_empty() || attempt >= self.config.max_attempts {
                break;
            }

            let backoff = calculate_backoff(&self.config, attempt);
            debug!(
                bucket = bucket,
                pending = pending.len(),
                attempt = attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Re-submitting versions rejected with a transient error."
            );
            if !sleep_unless_cancelled(backoff, &self.cancellation_token).await {
                break;
            }
            attempt += 1;

            let retry_batch = DeletionBatch::new(
                pending
                    .iter()
                    .map(|&index| results[index].version.clone())
                    .collect(),
            );
            let retried = match self
                .retry("delete_versions", || {
                    self.inner.delete_versions(bucket, &retry_batch)
                })
                .await
            {
                Ok(retried) => retried,
                Err(e) => {
                    warn!(
                        bucket = bucket,
                        pending = pending.len(),
                        error = %e,
                        "Re-submitting rejected versions failed."
                    );
                    break;
                }
            };

            for (index, deletion) in pending.into_iter().zip(retried) {
                results[index] = deletion;
            }
        }

        Ok(results)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.retry("delete_bucket", || self.inner.delete_bucket(bucket))
            .await
    }

    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        self.retry("create_bucket", || self.inner.create_bucket(bucket, region))
            .await
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> Result<VersioningStatus> {
        self.retry("get_bucket_versioning", || {
            self.inner.get_bucket_versioning(bucket)
        })
        .await
    }

    async fn put_bucket_versioning(&self, bucket: &str, status: VersioningStatus) -> Result<()> {
        self.retry("put_bucket_versioning", || {
            self.inner.put_bucket_versioning(bucket, status)
        })
        .await
    }
}
