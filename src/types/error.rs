use anyhow::Error;
use thiserror::Error;

/// Failure taxonomy of a reconciliation run.
///
/// Storage adapters wrap these values in `anyhow::Error` so that callers can
/// classify a failure with [`classify_error`] after any `.context(...)` has
/// been attached.
///
/// ## Exit Codes
///
/// - 1: General errors
/// - 2: Configuration errors (InvalidConfig)
/// - 3: Partial purge failure (some versions could not be deleted)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// Bucket (or an object within it) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transient provider or network failure.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Provider rate limiting.
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Bucket still holds objects; deleting it requires `force`.
    #[error("Bucket is not empty: {0}")]
    BucketNotEmpty(String),

    /// Bucket name is globally claimed by another account.
    #[error("Bucket name is owned by another account: {0}")]
    AlreadyOwnedElsewhere(String),

    /// Bucket was created by this account concurrently with the run.
    #[error("Bucket is already owned by you: {0}")]
    AlreadyOwnedByYou(String),

    #[error("Partial purge failure: {failed} version(s) could not be deleted (sample: {})", .sample.join(", "))]
    PartialPurgeFailure { failed: u64, sample: Vec<String> },

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Provider failure that fits no other class.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ReconcileError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReconcileError::InvalidConfig(_) => 2,
            ReconcileError::PartialPurgeFailure { .. } => 3,
            _ => 1,
        }
    }

    /// Transient errors are retried by the storage retry layer and nowhere else.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::Throttled(_) | ReconcileError::Unavailable(_)
        )
    }

    /// Stable machine-readable name, used in the JSON result.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::NotFound(_) => "NotFound",
            ReconcileError::PermissionDenied(_) => "PermissionDenied",
            ReconcileError::Unavailable(_) => "Unavailable",
            ReconcileError::Throttled(_) => "Throttled",
            ReconcileError::BucketNotEmpty(_) => "BucketNotEmpty",
            ReconcileError::AlreadyOwnedElsewhere(_) => "AlreadyOwnedElsewhere",
            ReconcileError::AlreadyOwnedByYou(_) => "AlreadyOwnedByYou",
            ReconcileError::PartialPurgeFailure { .. } => "PartialPurgeFailure",
            ReconcileError::DeadlineExceeded(_) => "DeadlineExceeded",
            ReconcileError::Cancelled => "Cancelled",
            ReconcileError::InvalidConfig(_) => "InvalidConfig",
            ReconcileError::Storage(_) => "Storage",
        }
    }
}

/// Find the [`ReconcileError`] carried by an `anyhow::Error`, if any.
pub fn classify_error(e: &Error) -> Option<&ReconcileError> {
    e.downcast_ref::<ReconcileError>()
}

/// Convert an `anyhow::Error` into a [`ReconcileError`], wrapping anything
/// unclassified as `Storage` with the full context chain.
pub fn into_reconcile_error(e: Error) -> ReconcileError {
    match classify_error(&e) {
        Some(err) => err.clone(),
        None => ReconcileError::Storage(format!("{e:#}")),
    }
}

pub fn is_cancelled_error(e: &Error) -> bool {
    matches!(classify_error(e), Some(ReconcileError::Cancelled))
}

pub fn is_not_found_error(e: &Error) -> bool {
    matches!(classify_error(e), Some(ReconcileError::NotFound(_)))
}

pub fn is_transient_error(e: &Error) -> bool {
    classify_error(e).is_some_and(ReconcileError::is_transient)
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    classify_error(e).map_or(1, ReconcileError::exit_code)
}
