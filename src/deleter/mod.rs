//! Bulk purge of every object version in a bucket.
//!
//! The [`PurgeEngine`] wires three stages together over bounded
//! `async_channel`s:
//!
//! ```text
//! VersionLister → batcher → BatchDeleter workers (worker_size)
//! ```
//!
//! Listing is sequential on its own task. The batcher groups versions into
//! [`DeletionBatch`] values of at most `batch_size` refs, and the workers
//! issue one DeleteObjects request per batch. Every batch result is merged
//! into a single [`PurgeOutcome`] behind a mutex.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::lister::{ListingSummary, VersionLister};
use crate::storage::Storage;
use crate::types::error::{ReconcileError, is_not_found_error};
use crate::types::token::ReconcileCancellationToken;
use crate::types::{DeletionBatch, ObjectVersionRef, PurgeOutcome};

pub mod batch;

pub use batch::{BatchDeleter, MAX_BATCH_SIZE};


pub(crate) fn lock_outcome(outcome: &Mutex<PurgeOutcome>) -> MutexGuard<'_, PurgeOutcome> {
    outcome.lock().unwrap_or_else(PoisonError::into_inner)
}

enum BatcherExit {
    Drained,
    Cancelled,
}

pub struct PurgeEngine {
    storage: Storage,
    worker_size: u16,
    batch_size: usize,
    max_keys: i32,
    object_listing_queue_size: usize,
    cancellation_token: ReconcileCancellationToken,
    outcome: Arc<Mutex<PurgeOutcome>>,
}

impl PurgeEngine {
    pub fn new(
        config: &Config,
        storage: Storage,
        cancellation_token: ReconcileCancellationToken,
    ) -> Self {
        Self {
            storage,
            worker_size: config.worker_size.max(1),
            batch_size: (config.batch_size as usize).clamp(1, MAX_BATCH_SIZE),
            max_keys: config.max_keys,
            object_listing_queue_size: (config.object_listing_queue_size as usize).max(1),
            cancellation_token,
            outcome: Arc::new(Mutex::new(PurgeOutcome::default())),
        }
    }

    /// Shared handle to the outcome accumulated so far.
    ///
    /// Lets a caller report partial progress when the purge is abandoned.
    pub fn outcome(&self) -> Arc<Mutex<PurgeOutcome>> {
        self.outcome.clone()
    }

    /// Delete every object version and delete marker of `bucket`.
    ///
    /// Per-item failures do not stop the purge; they are returned in
    /// [`PurgeOutcome::failed`]. A bucket that disappears while listing ends
    /// the purge successfully. Any other listing failure aborts it.
    pub async fn purge(&self, bucket: &str) -> Result<PurgeOutcome> {
        info!(
            bucket = bucket,
            worker_size = self.worker_size,
            batch_size = self.batch_size,
            "purge has started."
        );

        let (version_sender, version_receiver) =
            async_channel::bounded(self.object_listing_queue_size);
        let (batch_sender, batch_receiver) =
            async_channel::bounded::<DeletionBatch>(self.worker_size as usize * 2);

        let lister_handle = self.spawn_lister(bucket, version_sender);
        let workers: Vec<JoinHandle<()>> = (0..self.worker_size)
            .map(|worker_index| self.spawn_worker(worker_index, bucket, batch_receiver.clone()))
            .collect();
        drop(batch_receiver);

        let mut buffer = Vec::with_capacity(self.batch_size);
        let exit = self
            .batch_versions(&version_receiver, &batch_sender, &mut buffer)
            .await;

        // Unblocks the lister if it is waiting on a full queue.
        version_receiver.close();
        let listing = join_lister(lister_handle).await;

        let flush_result = match (&exit, &listing) {
            (BatcherExit::Drained, Ok(summary)) if !self.cancellation_token.is_cancelled() => {
                debug!(
                    bucket = bucket,
                    pages = summary.pages,
                    versions = summary.versions,
                    "version listing finished."
                );
                self.send_batch(&batch_sender, &mut buffer).await
            }
            _ => Ok(()),
        };

        drop(batch_sender);
        for (worker_index, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!(worker_index = worker_index, "delete worker panicked: {}", e);
                self.cancellation_token.cancel();
                return Err(anyhow!("delete worker panicked: {}", e));
            }
        }

        match listing {
            Ok(_) => {}
            Err(e) if is_not_found_error(&e) => {
                info!(
                    bucket = bucket,
                    "bucket disappeared while listing, nothing left to purge."
                );
            }
            Err(e) => {
                error!(bucket = bucket, error = %e, "version listing failed, purge aborted.");
                return Err(e);
            }
        }

        if self.cancellation_token.is_cancelled()
            || matches!(exit, BatcherExit::Cancelled)
            || flush_result.is_err()
        {
            info!(bucket = bucket, "purge has been cancelled.");
            return Err(anyhow!(ReconcileError::Cancelled));
        }

        let outcome = lock_outcome(&self.outcome).clone();
        info!(
            bucket = bucket,
            attempted = outcome.attempted,
            deleted = outcome.deleted,
            failed = outcome.failed.len(),
            batches = outcome.batches,
            "purge has been completed."
        );
        Ok(outcome)
    }

    fn spawn_lister(
        &self,
        bucket: &str,
        sender: Sender<ObjectVersionRef>,
    ) -> JoinHandle<Result<ListingSummary>> {
        let lister = VersionLister::new(
            dyn_clone::clone_box(&*self.storage),
            self.max_keys,
            self.cancellation_token.clone(),
        );
        let bucket = bucket.to_string();

        tokio::spawn(async move { lister.list(&bucket, &sender).await })
    }

    fn spawn_worker(
        &self,
        worker_index: u16,
        bucket: &str,
        receiver: Receiver<DeletionBatch>,
    ) -> JoinHandle<()> {
        let deleter = BatchDeleter::new(
            worker_index,
            dyn_clone::clone_box(&*self.storage),
            self.outcome.clone(),
        );
        let bucket = bucket.to_string();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            debug!(worker_index = worker_index, "delete worker started.");
            loop {
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => {
                        info!(worker_index = worker_index, "delete worker has been cancelled.");
                        return;
                    }
                    recv_result = receiver.recv() => {
                        match recv_result {
                            Ok(batch) => deleter.delete_batch(&bucket, batch).await,
                            Err(_) => {
                                debug!(worker_index = worker_index, "delete worker has been completed.");
                                return;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Group listed versions into full batches until the listing channel closes.
    ///
    /// A trailing partial batch is left in `buffer`.
    async fn batch_versions(
        &self,
        receiver: &Receiver<ObjectVersionRef>,
        sender: &Sender<DeletionBatch>,
        buffer: &mut Vec<ObjectVersionRef>,
    ) -> BatcherExit {
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return BatcherExit::Cancelled,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(version) => {
                            buffer.push(version);
                            if buffer.len() >= self.batch_size
                                && self.send_batch(sender, buffer).await.is_err()
                            {
                                return BatcherExit::Cancelled;
                            }
                        }
                        Err(_) => return BatcherExit::Drained,
                    }
                }
            }
        }
    }

    async fn send_batch(
        &self,
        sender: &Sender<DeletionBatch>,
        buffer: &mut Vec<ObjectVersionRef>,
    ) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let batch = DeletionBatch::new(std::mem::replace(
            buffer,
            Vec::with_capacity(self.batch_size),
        ));

        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => Err(anyhow!(ReconcileError::Cancelled)),
            send_result = sender.send(batch) => {
                send_result.map_err(|_| anyhow!(ReconcileError::Cancelled))
            }
        }
    }
}

async fn join_lister(handle: JoinHandle<Result<ListingSummary>>) -> Result<ListingSummary> {
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!("version lister task panicked: {}", e);
            Err(anyhow!("version lister task panicked: {}", e))
        }
    }
}
