/*!
# Overview
s3vb-rs brings a versioned Amazon S3 bucket to a declared state: `present`
or `absent`.

Deleting a bucket that still holds object versions is the hard part. With
`force` set, every object version and delete marker is listed page by page
and removed with batched DeleteObjects requests on a small worker pool, and
the bucket is deleted only when nothing failed.

## Features
- **Idempotent**: a bucket already in the desired state is left untouched
  (`changed = false`)
- **Forced purge**: versions and delete markers removed up to 1000 per request
- **Transient failures retried**: throttling and service errors are retried
  with capped exponential backoff and jitter
- **Bounded**: optional deadline and Ctrl+C cancellation for the whole run
- **Library-First**: the s3vb CLI is a thin wrapper over this crate

## As a Library

```toml
[dependencies]
s3vb-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3vb_rs::config::args::parse_from_args;
use s3vb_rs::{BucketTarget, Config, Reconciler};
use s3vb_rs::{create_reconcile_cancellation_token, create_storage};

#[tokio::main]
async fn main() {
    let args = vec!["s3vb", "my-bucket", "--state", "absent", "--force"];

    let config = Config::try_from(parse_from_args(args).unwrap()).unwrap();
    let target =
        BucketTarget::new(config.bucket.clone(), config.desired_state, config.force).unwrap();

    let cancellation_token = create_reconcile_cancellation_token();
    let storage = create_storage(&config, cancellation_token.clone()).await;
    let result = Reconciler::new(config, storage, cancellation_token)
        .reconcile(&target)
        .await;

    if let Some(e) = &result.error {
        eprintln!("{e}");
    }
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod config;
pub mod deleter;
pub mod lister;
pub mod reconciler;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::{CLIArgs, build_config_from_args, parse_from_args};
pub use reconciler::Reconciler;
pub use storage::{Storage, StorageTrait, create_storage};
pub use types::error::{
    ReconcileError, classify_error, exit_code_from_error, into_reconcile_error,
    is_cancelled_error,
};
pub use types::token::{ReconcileCancellationToken, create_reconcile_cancellation_token};
pub use types::{BucketState, BucketTarget, PurgeOutcome, ReconcileAction, ReconcileResult};
