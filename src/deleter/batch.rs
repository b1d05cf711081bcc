//! Batch deletion using the S3 DeleteObjects API.
//!
//! One [`BatchDeleter`] call issues exactly one DeleteObjects request and
//! merges its per-item results into the shared [`PurgeOutcome`].

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::storage::Storage;
use crate::types::error::into_reconcile_error;
use crate::types::{DeletionBatch, PurgeOutcome, VersionDeletion};

use super::lock_outcome;

/// Maximum refs per DeleteObjects request (S3 limit).
pub const MAX_BATCH_SIZE: usize = 1000;

pub struct BatchDeleter {
    worker_index: u16,
    storage: Storage,
    outcome: Arc<Mutex<PurgeOutcome>>,
}

impl BatchDeleter {
    pub fn new(worker_index: u16, storage: Storage, outcome: Arc<Mutex<PurgeOutcome>>) -> Self {
        Self {
            worker_index,
            storage,
            outcome,
        }
    }

    /// Delete one batch and record the result of every ref in it.
    ///
    /// A request that fails as a whole marks every ref of the batch as failed
    /// with the error kind as code. Nothing is returned; failures only show
    /// up in the outcome.
    pub async fn delete_batch(&self, bucket: &str, batch: DeletionBatch) {
        if batch.is_empty() {
            return;
        }

        debug!(
            worker_index = self.worker_index,
            bucket = bucket,
            batch_size = batch.len(),
            "sending DeleteObjects batch request."
        );

        let results = match self.storage.delete_versions(bucket, &batch).await {
            Ok(results) => results,
            Err(e) => {
                let error = into_reconcile_error(e);
                warn!(
                    worker_index = self.worker_index,
                    bucket = bucket,
                    batch_size = batch.len(),
                    error = %error,
                    "DeleteObjects request failed, every version of the batch is kept."
                );

                let message = error.to_string();
                batch
                    .into_items()
                    .into_iter()
                    .map(|version| VersionDeletion::failed(version, error.kind(), &message))
                    .collect()
            }
        };

        for (result, error) in results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| (r, e)))
        {
            warn!(
                worker_index = self.worker_index,
                key = result.version.key.as_str(),
                version_id = result.version.version_id.as_str(),
                error_code = error.code.as_str(),
                error_message = error.message.as_str(),
                "failed to delete object version."
            );
        }

        lock_outcome(&self.outcome).merge_batch(results);
    }
}
