//! Bucket reconciliation state machine.
//!
//! A run walks these states and never revisits one:
//!
//! ```text
//! Unknown → Checked(exists) → [Purging → Purged | PurgeFailed]
//!         → Deleted | Created | NoopPresent | NoopAbsent → Done(result)
//! ```
//!
//! The bucket is only deleted after a purge that left no failed version.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::deleter::{PurgeEngine, lock_outcome};
use crate::storage::Storage;
use crate::types::error::{ReconcileError, into_reconcile_error, is_not_found_error};
use crate::types::token::{ReconcileCancellationToken, sleep_unless_cancelled};
use crate::types::{
    BucketState, BucketTarget, PurgeOutcome, ReconcileAction, ReconcileResult, VersioningStatus,
};

#[derive(Debug)]
enum ReconcileState {
    Unknown,
    Checked { exists: bool },
    Purging,
    Purged(PurgeOutcome),
    PurgeFailed(PurgeOutcome),
    Deleted { purge: Option<PurgeOutcome> },
    Created,
    NoopPresent,
    NoopAbsent,
    Done(ReconcileResult),
}

/// What a run has learned so far, kept outside the run future so that a
/// deadline can still report it.
#[derive(Default)]
struct RunProgress {
    exists: Option<bool>,
    purge: Option<Arc<Mutex<PurgeOutcome>>>,
}

impl RunProgress {
    fn purge_snapshot(&self) -> Option<PurgeOutcome> {
        self.purge
            .as_ref()
            .map(|outcome| lock_outcome(outcome).clone())
    }
}

fn lock_progress(progress: &Mutex<RunProgress>) -> MutexGuard<'_, RunProgress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Brings one bucket to its desired state.
///
/// # Example
///
/// ```no_run
/// use s3vb_rs::{BucketState, BucketTarget, Config, Reconciler};
/// use s3vb_rs::{create_reconcile_cancellation_token, create_storage};
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = Config::for_target("my-bucket", BucketState::Absent, true);
/// let token = create_reconcile_cancellation_token();
/// let storage = create_storage(&config, token.clone()).await;
///
/// let target = BucketTarget::new("my-bucket", BucketState::Absent, true)?;
/// let result = Reconciler::new(config, storage, token).reconcile(&target).await;
/// println!("changed: {}", result.changed);
/// # Ok(())
/// # }
/// ```
pub struct Reconciler {
    config: Config,
    storage: Storage,
    cancellation_token: ReconcileCancellationToken,
}

impl Reconciler {
    pub fn new(
        config: Config,
        storage: Storage,
        cancellation_token: ReconcileCancellationToken,
    ) -> Self {
        Self {
            config,
            storage,
            cancellation_token,
        }
    }

    /// Run one reconciliation of `target`.
    ///
    /// Never returns an `Err`; failures are reported in
    /// [`ReconcileResult::error`] together with the state that was observed.
    pub async fn reconcile(&self, target: &BucketTarget) -> ReconcileResult {
        info!(
            bucket = target.name(),
            desired_state = %target.desired_state(),
            force = target.force(),
            "reconciliation has started."
        );

        let run_token = self.cancellation_token.child_token();
        let progress = Mutex::new(RunProgress::default());

        let run = self.run(target, &run_token, &progress);
        let result = match self.config.timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, run).await {
                Ok(result) => result,
                Err(_) => self.deadline_exceeded(target, timeout, &progress),
            },
            None => run.await,
        };

        // Stops any purge task still running after a deadline.
        run_token.cancel();

        match &result.error {
            None => info!(
                bucket = target.name(),
                action = ?result.action,
                changed = result.changed,
                "reconciliation has been completed."
            ),
            Some(e) => error!(
                bucket = target.name(),
                action = ?result.action,
                changed = result.changed,
                error = %e,
                "reconciliation has failed."
            ),
        }

        result
    }

    async fn run(
        &self,
        target: &BucketTarget,
        run_token: &ReconcileCancellationToken,
        progress: &Mutex<RunProgress>,
    ) -> ReconcileResult {
        let bucket = target.name();
        let mut state = ReconcileState::Unknown;

        loop {
            if run_token.is_cancelled() && !matches!(state, ReconcileState::Done(_)) {
                return self.failure(target, progress, ReconcileError::Cancelled);
            }

            debug!(bucket = bucket, state = ?state, "reconcile state.");

            state = match state {
                ReconcileState::Unknown => match self.storage.bucket_exists(bucket).await {
                    Ok(exists) => {
                        lock_progress(progress).exists = Some(exists);
                        ReconcileState::Checked { exists }
                    }
                    Err(e) => self.fail(target, progress, e),
                },
                ReconcileState::Checked { exists } => {
                    match (target.desired_state(), exists, target.force()) {
                        (BucketState::Absent, false, _) => ReconcileState::NoopAbsent,
                        (BucketState::Absent, true, false) => {
                            self.delete_bucket(target, progress, None).await
                        }
                        (BucketState::Absent, true, true) => ReconcileState::Purging,
                        (BucketState::Present, true, _) => ReconcileState::NoopPresent,
                        (BucketState::Present, false, _) => {
                            self.create_bucket(target, progress).await
                        }
                    }
                }
                ReconcileState::Purging => self.purge(target, run_token, progress).await,
                ReconcileState::Purged(outcome) => {
                    self.delete_bucket(target, progress, Some(outcome)).await
                }
                ReconcileState::PurgeFailed(outcome) => {
                    ReconcileState::Done(self.purge_failed(target, outcome))
                }
                ReconcileState::Deleted { purge } => ReconcileState::Done(
                    self.settle(target, run_token, ReconcileAction::Deleted, purge)
                        .await,
                ),
                ReconcileState::Created => ReconcileState::Done(
                    self.settle(target, run_token, ReconcileAction::Created, None)
                        .await,
                ),
                ReconcileState::NoopPresent => ReconcileState::Done(ReconcileResult {
                    final_state: BucketState::Present,
                    changed: false,
                    action: ReconcileAction::NoopPresent,
                    error: None,
                    purge: None,
                }),
                ReconcileState::NoopAbsent => ReconcileState::Done(ReconcileResult {
                    final_state: BucketState::Absent,
                    changed: false,
                    action: ReconcileAction::NoopAbsent,
                    error: None,
                    purge: None,
                }),
                ReconcileState::Done(result) => return result,
            };
        }
    }

    async fn purge(
        &self,
        target: &BucketTarget,
        run_token: &ReconcileCancellationToken,
        progress: &Mutex<RunProgress>,
    ) -> ReconcileState {
        let bucket = target.name();

        if self.config.suspend_versioning {
            if let Err(e) = self.suspend_versioning(bucket, run_token).await {
                return self.fail(target, progress, e);
            }
        }

        let engine = PurgeEngine::new(
            &self.config,
            dyn_clone::clone_box(&*self.storage),
            run_token.clone(),
        );
        lock_progress(progress).purge = Some(engine.outcome());

        match engine.purge(bucket).await {
            Ok(outcome) if outcome.is_complete() => ReconcileState::Purged(outcome),
            Ok(outcome) => ReconcileState::PurgeFailed(outcome),
            Err(e) => self.fail(target, progress, e),
        }
    }

    fn purge_failed(&self, target: &BucketTarget, outcome: PurgeOutcome) -> ReconcileResult {
        warn!(
            bucket = target.name(),
            failed = outcome.failed.len(),
            "versions remain after purge, bucket is not deleted."
        );

        ReconcileResult {
            final_state: BucketState::Present,
            changed: false,
            action: ReconcileAction::PurgeFailed,
            error: Some(ReconcileError::PartialPurgeFailure {
                failed: outcome.failed.len() as u64,
                sample: outcome.failed_key_sample(self.config.failure_sample_size),
            }),
            purge: Some(outcome),
        }
    }

    /// Suspend versioning so that no new versions appear while purging.
    async fn suspend_versioning(
        &self,
        bucket: &str,
        run_token: &ReconcileCancellationToken,
    ) -> Result<()> {
        let status = self.storage.get_bucket_versioning(bucket).await?;
        if status != VersioningStatus::Enabled {
            debug!(bucket = bucket, status = ?status, "versioning is not enabled.");
            return Ok(());
        }

        info!(bucket = bucket, "suspending versioning before purge.");
        self.storage
            .put_bucket_versioning(bucket, VersioningStatus::Suspended)
            .await?;

        let attempts = self.config.wait_config.versioning_wait_attempts;
        if attempts == 0 {
            return Ok(());
        }
        let interval = Duration::from_millis(
            self.config
                .wait_config
                .versioning_wait_interval_milliseconds,
        );

        for attempt in 1..=attempts {
            if self.storage.get_bucket_versioning(bucket).await? == VersioningStatus::Suspended {
                return Ok(());
            }
            if attempt < attempts && !sleep_unless_cancelled(interval, run_token).await {
                return Err(anyhow!(ReconcileError::Cancelled));
            }
        }

        Err(anyhow!(ReconcileError::DeadlineExceeded(format!(
            "{bucket}: versioning was not suspended after {attempts} checks"
        ))))
    }

    async fn delete_bucket(
        &self,
        target: &BucketTarget,
        progress: &Mutex<RunProgress>,
        purge: Option<PurgeOutcome>,
    ) -> ReconcileState {
        match self.storage.delete_bucket(target.name()).await {
            Ok(()) => ReconcileState::Deleted { purge },
            Err(e) if is_not_found_error(&e) => {
                info!(
                    bucket = target.name(),
                    "bucket disappeared before it was deleted."
                );
                ReconcileState::Deleted { purge }
            }
            Err(e) => self.fail(target, progress, e),
        }
    }

    async fn create_bucket(
        &self,
        target: &BucketTarget,
        progress: &Mutex<RunProgress>,
    ) -> ReconcileState {
        let region = self.config.region();
        info!(
            bucket = target.name(),
            region = region.unwrap_or("(client default)"),
            "creating bucket."
        );

        match self.storage.create_bucket(target.name(), region).await {
            Ok(()) => ReconcileState::Created,
            Err(e) => match into_reconcile_error(e) {
                ReconcileError::AlreadyOwnedByYou(_) => {
                    info!(
                        bucket = target.name(),
                        "bucket was created concurrently by this account."
                    );
                    ReconcileState::NoopPresent
                }
                e => ReconcileState::Done(self.failure(target, progress, e)),
            },
        }
    }

    /// Wait until the existence check agrees with a change just made.
    async fn settle(
        &self,
        target: &BucketTarget,
        run_token: &ReconcileCancellationToken,
        action: ReconcileAction,
        purge: Option<PurgeOutcome>,
    ) -> ReconcileResult {
        let final_state = target.desired_state();
        let error = self
            .wait_for_bucket_state(target.name(), final_state, run_token)
            .await
            .err()
            .map(into_reconcile_error);

        ReconcileResult {
            final_state,
            changed: true,
            action: if error.is_some() {
                ReconcileAction::Failed
            } else {
                action
            },
            error,
            purge,
        }
    }

    async fn wait_for_bucket_state(
        &self,
        bucket: &str,
        state: BucketState,
        run_token: &ReconcileCancellationToken,
    ) -> Result<()> {
        let attempts = self.config.wait_config.bucket_state_wait_attempts;
        if attempts == 0 {
            return Ok(());
        }
        let interval = Duration::from_millis(
            self.config
                .wait_config
                .bucket_state_wait_interval_milliseconds,
        );
        let expected_exists = state == BucketState::Present;

        for attempt in 1..=attempts {
            if self.storage.bucket_exists(bucket).await? == expected_exists {
                return Ok(());
            }
            debug!(bucket = bucket, attempt = attempt, "waiting for bucket to become {}.", state);
            if attempt < attempts && !sleep_unless_cancelled(interval, run_token).await {
                return Err(anyhow!(ReconcileError::Cancelled));
            }
        }

        Err(anyhow!(ReconcileError::Unavailable(format!(
            "{bucket}: bucket did not become {state} after {attempts} checks"
        ))))
    }

    fn deadline_exceeded(
        &self,
        target: &BucketTarget,
        timeout: Duration,
        progress: &Mutex<RunProgress>,
    ) -> ReconcileResult {
        self.failure(
            target,
            progress,
            ReconcileError::DeadlineExceeded(format!(
                "{}: reconciliation did not finish within {} ms",
                target.name(),
                timeout.as_millis()
            )),
        )
    }

    fn fail(
        &self,
        target: &BucketTarget,
        progress: &Mutex<RunProgress>,
        e: anyhow::Error,
    ) -> ReconcileState {
        ReconcileState::Done(self.failure(target, progress, into_reconcile_error(e)))
    }

    fn failure(
        &self,
        target: &BucketTarget,
        progress: &Mutex<RunProgress>,
        error: ReconcileError,
    ) -> ReconcileResult {
        let progress = lock_progress(progress);
        let final_state = match progress.exists {
            Some(true) => BucketState::Present,
            Some(false) => BucketState::Absent,
            None => match target.desired_state() {
                BucketState::Present => BucketState::Absent,
                BucketState::Absent => BucketState::Present,
            },
        };

        ReconcileResult {
            final_state,
            changed: false,
            action: ReconcileAction::Failed,
            error: Some(error),
            purge: progress.purge_snapshot(),
        }
    }
}
