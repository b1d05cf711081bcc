use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

use serde::Serialize;
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

use crate::types::error::ReconcileError;

pub mod error;
pub mod token;

/// Version id S3 reports for objects written while versioning was never enabled.
pub const NULL_VERSION_ID: &str = "null";

/// Declared target state of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BucketState {
    Present,
    Absent,
}

impl fmt::Display for BucketState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BucketState::Present => write!(f, "present"),
            BucketState::Absent => write!(f, "absent"),
        }
    }
}

/// The bucket a reconciliation run operates on and the state it should end in.
///
/// `force` is the explicit opt-in for purging every object version of a
/// non-empty bucket before deleting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketTarget {
    name: String,
    desired_state: BucketState,
    force: bool,
}

impl BucketTarget {
    pub fn new(
        name: impl Into<String>,
        desired_state: BucketState,
        force: bool,
    ) -> Result<Self, ReconcileError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ReconcileError::InvalidConfig(
                "bucket name must not be empty.".to_string(),
            ));
        }

        Ok(Self {
            name,
            desired_state,
            force,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desired_state(&self) -> BucketState {
        self.desired_state
    }

    pub fn force(&self) -> bool {
        self.force
    }
}

/// One deletable unit in a versioned bucket: an object version or a delete marker.
///
/// Uniqueness within a bucket is `(key, version_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectVersionRef {
    pub key: String,
    pub version_id: String,
    pub is_delete_marker: bool,
}

impl ObjectVersionRef {
    pub fn version(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: version_id.into(),
            is_delete_marker: false,
        }
    }

    pub fn delete_marker(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: version_id.into(),
            is_delete_marker: true,
        }
    }
}

/// Opaque cursor for ListObjectVersions pagination.
///
/// Carried explicitly from one page request to the next; never shared between
/// concurrent listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuationToken {
    pub(crate) key_marker: Option<String>,
    pub(crate) version_id_marker: Option<String>,
}

impl ContinuationToken {
    pub fn new(key_marker: Option<String>, version_id_marker: Option<String>) -> Self {
        Self {
            key_marker,
            version_id_marker,
        }
    }

    pub fn key_marker(&self) -> Option<&str> {
        self.key_marker.as_deref()
    }

    pub fn version_id_marker(&self) -> Option<&str> {
        self.version_id_marker.as_deref()
    }
}

/// One page of a version listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListVersionsPage {
    pub items: Vec<ObjectVersionRef>,
    pub next_token: Option<ContinuationToken>,
}

/// Refs submitted in one DeleteObjects request. Consumed exactly once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionBatch {
    items: Vec<ObjectVersionRef>,
}

impl DeletionBatch {
    pub fn new(items: Vec<ObjectVersionRef>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[ObjectVersionRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<ObjectVersionRef> {
        self.items
    }
}

/// Provider-reported reason a single version could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub code: String,
    pub message: String,
}

/// Per-item result of a batch delete.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionDeletion {
    pub version: ObjectVersionRef,
    pub error: Option<DeleteFailure>,
}

impl VersionDeletion {
    pub fn deleted(version: ObjectVersionRef) -> Self {
        Self {
            version,
            error: None,
        }
    }

    pub fn failed(version: ObjectVersionRef, code: &str, message: &str) -> Self {
        Self {
            version,
            error: Some(DeleteFailure {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.error.is_none()
    }
}

/// A version that is still in the bucket after purging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedVersion {
    pub version: ObjectVersionRef,
    pub error: DeleteFailure,
}

/// Accumulated result of purging one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeOutcome {
    pub attempted: u64,
    pub deleted: u64,
    pub failed: Vec<FailedVersion>,
    pub batches: u64,
}

impl PurgeOutcome {
    /// Fold the per-item results of one batch into the outcome.
    pub fn merge_batch(&mut self, results: Vec<VersionDeletion>) {
        self.batches += 1;
        for result in results {
            self.attempted += 1;
            match result.error {
                None => self.deleted += 1,
                Some(error) => self.failed.push(FailedVersion {
                    version: result.version,
                    error,
                }),
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Keys of at most `limit` failed versions, in failure order.
    pub fn failed_key_sample(&self, limit: usize) -> Vec<String> {
        self.failed
            .iter()
            .take(limit)
            .map(|f| format!("{}?versionId={}", f.version.key, f.version.version_id))
            .collect()
    }
}

/// Versioning configuration of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VersioningStatus {
    Unversioned,
    Enabled,
    Suspended,
}

/// Terminal state the reconciler reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    NoopPresent,
    NoopAbsent,
    Created,
    Deleted,
    PurgeFailed,
    Failed,
}

/// Terminal output of one reconciliation.
#[derive(Debug)]
pub struct ReconcileResult {
    pub final_state: BucketState,
    pub changed: bool,
    pub action: ReconcileAction,
    pub error: Option<ReconcileError>,
    pub purge: Option<PurgeOutcome>,
}

impl ReconcileResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// AWS configuration file locations.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// AWS credential sources.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair, cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
