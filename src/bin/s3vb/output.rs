// The JSON document printed to stdout after a run.

use serde::Serialize;

use s3vb_rs::{BucketState, PurgeOutcome, ReconcileAction, ReconcileResult};

#[derive(Debug, Serialize)]
pub struct ResultDocument<'a> {
    name: &'a str,
    state: BucketState,
    changed: bool,
    action: ReconcileAction,
    error: Option<ErrorDocument>,
    purge: Option<PurgeDocument>,
}

#[derive(Debug, Serialize)]
struct ErrorDocument {
    kind: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct PurgeDocument {
    attempted: u64,
    deleted: u64,
    failed: u64,
    batches: u64,
    failed_keys: Vec<String>,
}

impl PurgeDocument {
    fn new(outcome: &PurgeOutcome, failure_sample_size: usize) -> Self {
        Self {
            attempted: outcome.attempted,
            deleted: outcome.deleted,
            failed: outcome.failed.len() as u64,
            batches: outcome.batches,
            failed_keys: outcome.failed_key_sample(failure_sample_size),
        }
    }
}

impl<'a> ResultDocument<'a> {
    pub fn new(name: &'a str, result: &ReconcileResult, failure_sample_size: usize) -> Self {
        Self {
            name,
            state: result.final_state,
            changed: result.changed,
            action: result.action,
            error: result.error.as_ref().map(|e| ErrorDocument {
                kind: e.kind(),
                message: e.to_string(),
            }),
            purge: result
                .purge
                .as_ref()
                .map(|outcome| PurgeDocument::new(outcome, failure_sample_size)),
        }
    }
}

/// 0 on success, otherwise the exit code of the error.
pub fn exit_code(result: &ReconcileResult) -> i32 {
    result.error.as_ref().map_or(0, |e| e.exit_code())
}
