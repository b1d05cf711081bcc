use anyhow::{Result, anyhow};
use async_channel::Sender;
use tracing::{debug, trace};

use crate::storage::Storage;
use crate::types::error::ReconcileError;
use crate::types::token::ReconcileCancellationToken;
use crate::types::{ContinuationToken, ObjectVersionRef};

/// Pages walked and versions yielded by one enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingSummary {
    pub pages: u64,
    pub versions: u64,
}

/// Enumerates every object version and delete marker of a bucket.
///
/// Pages are requested strictly one after another, each carrying the
/// continuation token returned by the previous one. Items are sent to the
/// channel in the order the provider returned them.
///
/// Enumeration restarts from the beginning on every call; it is not resumable
/// mid-stream. Transient failures are retried by the storage layer, so any
/// error seen here is final. `NotFound` means the bucket disappeared.
pub struct VersionLister {
    storage: Storage,
    max_keys: i32,
    cancellation_token: ReconcileCancellationToken,
}

impl VersionLister {
    pub fn new(
        storage: Storage,
        max_keys: i32,
        cancellation_token: ReconcileCancellationToken,
    ) -> Self {
        Self {
            storage,
            max_keys,
            cancellation_token,
        }
    }

    /// List `bucket` into `sender` until the last page.
    ///
    /// Returns early without error when cancelled or when the receiving side
    /// has been closed.
    pub async fn list(
        &self,
        bucket: &str,
        sender: &Sender<ObjectVersionRef>,
    ) -> Result<ListingSummary> {
        debug!(bucket = bucket, max_keys = self.max_keys, "version listing has started.");

        let mut summary = ListingSummary::default();
        let mut token: Option<ContinuationToken> = None;

        loop {
            if self.cancellation_token.is_cancelled() {
                debug!(bucket = bucket, "version listing has been cancelled.");
                return Ok(summary);
            }

            let page = self
                .storage
                .list_object_versions_page(bucket, token.clone(), self.max_keys)
                .await?;
            summary.pages += 1;

            trace!(
                bucket = bucket,
                page = summary.pages,
                items = page.items.len(),
                "received version page."
            );

            for version in page.items {
                if sender.send(version).await.is_err() {
                    debug!(bucket = bucket, "version receiver closed, listing stopped.");
                    return Ok(summary);
                }
                summary.versions += 1;
            }

            match page.next_token {
                None => break,
                Some(next) if token.as_ref() == Some(&next) => {
                    return Err(anyhow!(ReconcileError::Storage(format!(
                        "{bucket}: ListObjectVersions returned the same continuation token twice \
                         (key marker {:?}, version id marker {:?})",
                        next.key_marker(),
                        next.version_id_marker()
                    ))));
                }
                Some(next) => token = Some(next),
            }
        }

        debug!(
            bucket = bucket,
            pages = summary.pages,
            versions = summary.versions,
            "version listing has been completed."
        );
        Ok(summary)
    }
}
