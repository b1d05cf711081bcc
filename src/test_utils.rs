//! Shared test utilities for the s3vb library crate.
//!
//! Provides an in-memory [`FakeStorage`] that behaves like a small S3 with
//! versioned buckets, plus helpers used by most unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::config::{BackoffConfig, Config, WaitConfig};
use crate::storage::{Storage, StorageTrait};
use crate::types::error::ReconcileError;
use crate::types::{
    BucketState, ContinuationToken, DeletionBatch, ListVersionsPage, ObjectVersionRef,
    VersionDeletion, VersioningStatus,
};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a [`Config`] with zero-latency waits and retries.
pub(crate) fn make_test_config(bucket: &str, desired_state: BucketState, force: bool) -> Config {
    let mut config = Config::for_target(bucket, desired_state, force);
    config.backoff_config = BackoffConfig {
        max_attempts: 3,
        initial_backoff_milliseconds: 0,
        max_backoff_milliseconds: 0,
    };
    config.wait_config = WaitConfig {
        versioning_wait_attempts: 3,
        versioning_wait_interval_milliseconds: 0,
        bucket_state_wait_attempts: 3,
        bucket_state_wait_interval_milliseconds: 0,
    };
    config
}

/// `n` distinct object versions: `key{i}` / `v{i}`.
pub(crate) fn make_versions(n: usize) -> Vec<ObjectVersionRef> {
    (0..n)
        .map(|i| ObjectVersionRef::version(format!("key{i}"), format!("v{i}")))
        .collect()
}

/// Operations of [`FakeStorage`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FakeOp {
    BucketExists,
    ListPage,
    DeleteVersions,
    DeleteBucket,
    CreateBucket,
    GetVersioning,
    PutVersioning,
}

#[derive(Debug, Default)]
struct FakeBucket {
    // Keyed by insertion sequence so pagination is stable while deleting.
    versions: BTreeMap<u64, ObjectVersionRef>,
    versioning: Option<VersioningStatus>,
}

#[derive(Debug, Default)]
struct FakeState {
    buckets: HashMap<String, FakeBucket>,
    next_seq: u64,
    page_size: Option<usize>,
    stuck_token: bool,
    ignore_versioning_changes: bool,
    stale_bucket_state: bool,
    // key -> (error code, remaining failures; None = forever)
    failing_keys: HashMap<String, (String, Option<u32>)>,
    injected_errors: HashMap<FakeOp, VecDeque<ReconcileError>>,
    delete_delay: Option<Duration>,
    // Every bucket removed on delete is reported here as still existing.
    ghost_buckets: Vec<String>,

    bucket_exists_calls: u64,
    list_calls: u64,
    delete_batch_sizes: Vec<usize>,
    delete_bucket_calls: u64,
    create_bucket_calls: Vec<(String, Option<String>)>,
    put_versioning_calls: Vec<VersioningStatus>,
}

/// In-memory storage with versioned buckets, call recording and error injection.
#[derive(Clone, Default)]
pub(crate) struct FakeStorage {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn boxed(&self) -> Storage {
        Box::new(self.clone())
    }

    pub(crate) fn with_bucket(self, name: &str, versions: Vec<ObjectVersionRef>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let mut bucket = FakeBucket::default();
            for version in versions {
                let seq = state.next_seq;
                state.next_seq += 1;
                bucket.versions.insert(seq, version);
            }
            state.buckets.insert(name.to_string(), bucket);
        }
        self
    }

    pub(crate) fn with_versioning(self, name: &str, status: VersioningStatus) -> Self {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get_mut(name)
            .expect("bucket must be added first")
            .versioning = Some(status);
        self
    }

    /// At most `k` items per ListObjectVersions page.
    pub(crate) fn with_page_size(self, k: usize) -> Self {
        self.state.lock().unwrap().page_size = Some(k);
        self
    }

    /// Every page returns the token it was requested with.
    pub(crate) fn with_stuck_token(self) -> Self {
        self.state.lock().unwrap().stuck_token = true;
        self
    }

    /// PutBucketVersioning succeeds but never takes effect.
    pub(crate) fn ignoring_versioning_changes(self) -> Self {
        self.state.lock().unwrap().ignore_versioning_changes = true;
        self
    }

    /// HeadBucket keeps reporting the state from before a create or delete.
    pub(crate) fn with_stale_bucket_state(self) -> Self {
        self.state.lock().unwrap().stale_bucket_state = true;
        self
    }

    /// Deleting any version of `key` fails with `code`.
    pub(crate) fn fail_key(self, key: &str, code: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_keys
            .insert(key.to_string(), (code.to_string(), None));
        self
    }

    /// Deleting `key` fails with `code` for the next `times` attempts.
    pub(crate) fn fail_key_times(self, key: &str, code: &str, times: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_keys
            .insert(key.to_string(), (code.to_string(), Some(times)));
        self
    }

    /// The next call of `op` fails with `error`. Queued errors are used in order.
    pub(crate) fn inject_error(self, op: FakeOp, error: ReconcileError) -> Self {
        self.state
            .lock()
            .unwrap()
            .injected_errors
            .entry(op)
            .or_default()
            .push_back(error);
        self
    }

    pub(crate) fn with_delete_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().delete_delay = Some(delay);
        self
    }

    pub(crate) fn bucket_present(&self, name: &str) -> bool {
        self.state.lock().unwrap().buckets.contains_key(name)
    }

    pub(crate) fn remaining_versions(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(name)
            .map_or(0, |b| b.versions.len())
    }

    pub(crate) fn versioning(&self, name: &str) -> Option<VersioningStatus> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(name)
            .and_then(|b| b.versioning)
    }

    pub(crate) fn bucket_exists_calls(&self) -> u64 {
        self.state.lock().unwrap().bucket_exists_calls
    }

    pub(crate) fn list_calls(&self) -> u64 {
        self.state.lock().unwrap().list_calls
    }

    pub(crate) fn delete_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().delete_batch_sizes.clone()
    }

    pub(crate) fn delete_bucket_calls(&self) -> u64 {
        self.state.lock().unwrap().delete_bucket_calls
    }

    pub(crate) fn create_bucket_calls(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().create_bucket_calls.clone()
    }

    pub(crate) fn put_versioning_calls(&self) -> Vec<VersioningStatus> {
        self.state.lock().unwrap().put_versioning_calls.clone()
    }
}

impl FakeState {
    fn take_injected(&mut self, op: FakeOp) -> Option<ReconcileError> {
        self.injected_errors.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn no_such_bucket(bucket: &str) -> anyhow::Error {
        anyhow!(ReconcileError::NotFound(format!(
            "{bucket}: NoSuchBucket (The specified bucket does not exist)"
        )))
    }
}

#[async_trait]
impl StorageTrait for FakeStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.bucket_exists_calls += 1;
        if let Some(error) = state.take_injected(FakeOp::BucketExists) {
            return Err(anyhow!(error));
        }

        let exists = state.buckets.contains_key(bucket);
        if state.stale_bucket_state && state.ghost_buckets.iter().any(|b| b == bucket) {
            return Ok(!exists);
        }
        Ok(exists)
    }

    async fn list_object_versions_page(
        &self,
        bucket: &str,
        token: Option<ContinuationToken>,
        max_keys: i32,
    ) -> Result<ListVersionsPage> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if let Some(error) = state.take_injected(FakeOp::ListPage) {
            return Err(anyhow!(error));
        }

        let page_size = state.page_size.unwrap_or(max_keys as usize).max(1);
        let stuck_token = state.stuck_token;
        let Some(fake_bucket) = state.buckets.get(bucket) else {
            return Err(FakeState::no_such_bucket(bucket));
        };

        let start = token
            .as_ref()
            .and_then(|t| t.key_marker())
            .map_or(0, |marker| marker.parse::<u64>().unwrap() + 1);

        let entries: Vec<(u64, ObjectVersionRef)> = fake_bucket
            .versions
            .range(start..)
            .take(page_size + 1)
            .map(|(seq, v)| (*seq, v.clone()))
            .collect();

        let has_more = entries.len() > page_size;
        let items: Vec<(u64, ObjectVersionRef)> = entries.into_iter().take(page_size).collect();

        let next_token = if stuck_token {
            Some(token.unwrap_or_else(|| ContinuationToken::new(Some("0".to_string()), None)))
        } else if has_more {
            let last_seq = items.last().map(|(seq, _)| *seq).unwrap();
            Some(ContinuationToken::new(Some(last_seq.to_string()), None))
        } else {
            None
        };

        Ok(ListVersionsPage {
            items: items.into_iter().map(|(_, v)| v).collect(),
            next_token,
        })
    }

    async fn delete_versions(
        &self,
        bucket: &str,
        batch: &DeletionBatch,
    ) -> Result<Vec<VersionDeletion>> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.delete_batch_sizes.push(batch.len());
            state.delete_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.take_injected(FakeOp::DeleteVersions) {
            return Err(anyhow!(error));
        }
        if !state.buckets.contains_key(bucket) {
            return Err(FakeState::no_such_bucket(bucket));
        }

        let mut results = Vec::with_capacity(batch.len());
        for version in batch.items() {
            let failure = match state.failing_keys.get_mut(&version.key) {
                Some((code, None)) => Some(code.clone()),
                Some((code, Some(remaining))) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(code.clone())
                }
                _ => None,
            };

            match failure {
                Some(code) => {
                    results.push(VersionDeletion::failed(version.clone(), &code, "injected failure"))
                }
                None => {
                    let fake_bucket = state.buckets.get_mut(bucket).unwrap();
                    fake_bucket.versions.retain(|_, v| v != version);
                    results.push(VersionDeletion::deleted(version.clone()));
                }
            }
        }
        Ok(results)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.delete_bucket_calls += 1;
        if let Some(error) = state.take_injected(FakeOp::DeleteBucket) {
            return Err(anyhow!(error));
        }

        match state.buckets.get(bucket) {
            None => Err(FakeState::no_such_bucket(bucket)),
            Some(fake_bucket) if !fake_bucket.versions.is_empty() => {
                Err(anyhow!(ReconcileError::BucketNotEmpty(format!(
                    "{bucket}: BucketNotEmpty (The bucket you tried to delete is not empty)"
                ))))
            }
            Some(_) => {
                state.buckets.remove(bucket);
                state.ghost_buckets.push(bucket.to_string());
                Ok(())
            }
        }
    }

    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .create_bucket_calls
            .push((bucket.to_string(), region.map(str::to_string)));
        if let Some(error) = state.take_injected(FakeOp::CreateBucket) {
            return Err(anyhow!(error));
        }

        if state.buckets.contains_key(bucket) {
            return Err(anyhow!(ReconcileError::AlreadyOwnedByYou(format!(
                "{bucket}: BucketAlreadyOwnedByYou"
            ))));
        }
        state.buckets.insert(bucket.to_string(), FakeBucket::default());
        state.ghost_buckets.push(bucket.to_string());
        Ok(())
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> Result<VersioningStatus> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.take_injected(FakeOp::GetVersioning) {
            return Err(anyhow!(error));
        }

        state
            .buckets
            .get(bucket)
            .map(|b| b.versioning.unwrap_or(VersioningStatus::Unversioned))
            .ok_or_else(|| FakeState::no_such_bucket(bucket))
    }

    async fn put_bucket_versioning(&self, bucket: &str, status: VersioningStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.put_versioning_calls.push(status);
        if let Some(error) = state.take_injected(FakeOp::PutVersioning) {
            return Err(anyhow!(error));
        }

        let ignore = state.ignore_versioning_changes;
        let Some(fake_bucket) = state.buckets.get_mut(bucket) else {
            return Err(FakeState::no_such_bucket(bucket));
        };
        if !ignore {
            fake_bucket.versioning = Some(status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_pages_are_stable_while_deleting() {
        let storage = FakeStorage::new()
            .with_bucket("b", make_versions(5))
            .with_page_size(2);

        let first = storage
            .list_object_versions_page("b", None, 1000)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);

        storage
            .delete_versions("b", &DeletionBatch::new(first.items.clone()))
            .await
            .unwrap();

        let second = storage
            .list_object_versions_page("b", first.next_token, 1000)
            .await
            .unwrap();
        assert_eq!(second.items, make_versions(5)[2..4].to_vec());
        assert_eq!(storage.remaining_versions("b"), 3);
    }

    #[tokio::test]
    async fn fake_reports_missing_bucket() {
        let storage = FakeStorage::new();
        assert!(!storage.bucket_exists("b").await.unwrap());
        assert!(crate::types::error::is_not_found_error(
            &storage.delete_bucket("b").await.unwrap_err()
        ));
    }
}
