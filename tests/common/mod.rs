//! Shared E2E test infrastructure for s3vb-rs.
//!
//! `TestHelper` prepares buckets and objects against real AWS S3 and runs
//! reconciliations. All helpers use the `s3vb-e2e-test` AWS profile.

#![allow(dead_code)]

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration, Delete,
    ObjectIdentifier, VersioningConfiguration,
};
use s3vb_rs::config::args::build_config_from_args;
use s3vb_rs::{
    BucketTarget, Config, ReconcileResult, Reconciler, create_reconcile_cancellation_token,
    create_storage,
};
use uuid::Uuid;

/// AWS profile used for all E2E tests.
const AWS_PROFILE: &str = "s3vb-e2e-test";

const DEFAULT_REGION: &str = "us-east-1";

/// Deletes every version and the bucket when dropped, even if the test panics.
pub struct BucketGuard {
    helper: Arc<TestHelper>,
    bucket: String,
}

impl Drop for BucketGuard {
    fn drop(&mut self) {
        let helper = self.helper.clone();
        let bucket = self.bucket.clone();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async move {
                    helper.delete_bucket_cascade(&bucket).await;
                });
            });
        }));
    }
}

pub struct TestHelper {
    client: Client,
    region: String,
}

impl TestHelper {
    pub async fn new() -> Arc<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(AWS_PROFILE)
            .load()
            .await;

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let client = Client::new(&sdk_config);

        Arc::new(Self { client, region })
    }

    pub fn bucket_guard(self: &Arc<Self>, bucket: &str) -> BucketGuard {
        BucketGuard {
            helper: Arc::clone(self),
            bucket: bucket.to_string(),
        }
    }

    /// A bucket name like `s3vb-e2e-<uuid>`, unique across parallel runs.
    pub fn generate_bucket_name(&self) -> String {
        format!("s3vb-e2e-{}", Uuid::new_v4())
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn create_bucket(&self, bucket: &str) {
        let mut builder = self.client.create_bucket().bucket(bucket);

        if self.region != DEFAULT_REGION {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            builder = builder.create_bucket_configuration(config);
        }

        builder
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to create bucket {bucket}: {e}"));
    }

    pub async fn create_versioned_bucket(&self, bucket: &str) {
        self.create_bucket(bucket).await;

        let versioning_config = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::Enabled)
            .build();

        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(versioning_config)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to enable versioning on {bucket}: {e}"));
    }

    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        self.client.head_bucket().bucket(bucket).send().await.is_ok()
    }

    /// Region the bucket lives in; an empty location constraint is `us-east-1`.
    pub async fn bucket_region(&self, bucket: &str) -> String {
        self.client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to get location of {bucket}: {e}"))
            .location_constraint()
            .map(|constraint| constraint.as_str().to_string())
            .filter(|region| !region.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    pub async fn versioning_status(&self, bucket: &str) -> Option<BucketVersioningStatus> {
        self.client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to get versioning of {bucket}: {e}"))
            .status()
            .cloned()
    }

    pub async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to put {key} into {bucket}: {e}"));
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to delete {key} from {bucket}: {e}"));
    }

    /// Every version and delete marker as `(key, version_id)`.
    pub async fn list_object_versions(&self, bucket: &str) -> Vec<(String, String)> {
        let mut result = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_key_marker(key_marker.clone())
                .set_version_id_marker(version_id_marker.clone())
                .send()
                .await
                .unwrap_or_else(|e| panic!("Failed to list object versions in {bucket}: {e}"));

            for v in resp.versions() {
                if let (Some(key), Some(vid)) = (v.key(), v.version_id()) {
                    result.push((key.to_string(), vid.to_string()));
                }
            }
            for m in resp.delete_markers() {
                if let (Some(key), Some(vid)) = (m.key(), m.version_id()) {
                    result.push((key.to_string(), vid.to_string()));
                }
            }

            if resp.is_truncated() == Some(true) {
                key_marker = resp.next_key_marker().map(|s| s.to_string());
                version_id_marker = resp.next_version_id_marker().map(|s| s.to_string());
            } else {
                break;
            }
        }

        result
    }

    /// Remove every version and the bucket itself, ignoring errors.
    pub async fn delete_bucket_cascade(&self, bucket: &str) {
        if !self.bucket_exists(bucket).await {
            return;
        }

        loop {
            let Ok(resp) = self.client.list_object_versions().bucket(bucket).send().await else {
                break;
            };

            let identifiers: Vec<ObjectIdentifier> = resp
                .versions()
                .iter()
                .filter_map(|v| v.key().zip(v.version_id()))
                .chain(
                    resp.delete_markers()
                        .iter()
                        .filter_map(|m| m.key().zip(m.version_id())),
                )
                .map(|(key, vid)| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .version_id(vid)
                        .build()
                        .unwrap()
                })
                .collect();
            if identifiers.is_empty() {
                break;
            }

            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .unwrap();
            let _ = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await;
        }

        let _ = self.client.delete_bucket().bucket(bucket).send().await;
    }

    /// Build a `Config` from CLI-style arguments.
    ///
    /// Prepends the binary name and appends `--target-profile s3vb-e2e-test`
    /// unless credentials are already given.
    pub fn build_config(args: Vec<&str>) -> Config {
        let mut full_args: Vec<String> = vec!["s3vb".to_string()];
        full_args.extend(args.iter().map(|s| s.to_string()));

        let has_profile = full_args.iter().any(|a| a.starts_with("--target-profile"));
        let has_access_key = full_args
            .iter()
            .any(|a| a.starts_with("--target-access-key"));
        if !has_profile && !has_access_key {
            full_args.push("--target-profile".to_string());
            full_args.push(AWS_PROFILE.to_string());
        }

        build_config_from_args(full_args)
            .unwrap_or_else(|e| panic!("Failed to build config from args: {e}"))
    }

    /// Run one reconciliation for the bucket named in `config`.
    pub async fn reconcile(config: Config) -> ReconcileResult {
        let target =
            BucketTarget::new(config.bucket.clone(), config.desired_state, config.force).unwrap();
        let token = create_reconcile_cancellation_token();
        let storage = create_storage(&config, token.clone()).await;

        Reconciler::new(config, storage, token)
            .reconcile(&target)
            .await
    }
}

/// Default timeout for E2E tests (5 minutes).
pub const E2E_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Wraps an async E2E test body with a timeout.
#[macro_export]
macro_rules! e2e_timeout {
    ($body:expr) => {
        tokio::time::timeout(common::E2E_TIMEOUT, $body)
            .await
            .expect("E2E test timed out")
    };
}
