pub mod args;

use std::time::Duration;

use aws_smithy_types::checksum_config::RequestChecksumCalculation;

use crate::types::{BucketState, ClientConfigLocation, S3Credentials};

/// Region assumed when neither the configuration nor the SDK resolves one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Main configuration for a reconciliation run.
///
/// Holds the bucket target, AWS client settings, purge parallelism and the
/// waits and retries that surround the S3 calls.
///
/// # Quick Start
///
/// ```
/// use s3vb_rs::Config;
/// use s3vb_rs::types::BucketState;
///
/// let config = Config::for_target("my-bucket", BucketState::Absent, true);
/// assert_eq!(config.batch_size, 1000);
/// assert_eq!(config.worker_size, 4);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub bucket: String,
    pub desired_state: BucketState,
    pub force: bool,
    pub target_client_config: Option<ClientConfig>,
    pub backoff_config: BackoffConfig,
    pub tracing_config: Option<TracingConfig>,
    pub wait_config: WaitConfig,
    /// Number of concurrent batch delete workers.
    pub worker_size: u16,
    /// Refs per DeleteObjects request (1..=1000).
    pub batch_size: u16,
    /// Page size for ListObjectVersions.
    pub max_keys: i32,
    pub object_listing_queue_size: u32,
    pub rate_limit_objects: Option<u32>,
    /// Upper bound on the whole run; `None` means unbounded.
    pub timeout_milliseconds: Option<u64>,
    /// Number of failing keys reported with a partial purge failure.
    pub failure_sample_size: usize,
    /// Suspend versioning before purging a versioning-enabled bucket.
    pub suspend_versioning: bool,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` with defaults for the given bucket target.
    pub fn for_target(bucket: &str, desired_state: BucketState, force: bool) -> Self {
        Config {
            bucket: bucket.to_string(),
            desired_state,
            force,
            ..Config::default()
        }
    }

    /// Region given explicitly for the client.
    ///
    /// `None` leaves the choice to the SDK (`AWS_REGION`, the profile, ...).
    pub fn region(&self) -> Option<&str> {
        self.target_client_config
            .as_ref()
            .and_then(|c| c.region.as_deref())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_milliseconds.map(Duration::from_millis)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bucket: String::new(),
            desired_state: BucketState::Present,
            force: false,
            target_client_config: None,
            backoff_config: BackoffConfig::default(),
            tracing_config: None,
            wait_config: WaitConfig::default(),
            worker_size: 4,
            batch_size: 1000,
            max_keys: 1000,
            object_listing_queue_size: 10_000,
            rate_limit_objects: None,
            timeout_milliseconds: None,
            failure_sample_size: 10,
            suspend_versioning: true,
            auto_complete_shell: None,
        }
    }
}

/// AWS S3 client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub accelerate: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
    pub request_checksum_calculation: RequestChecksumCalculation,
}

/// Retry configuration handed to the AWS SDK.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

/// Timeout configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

/// Application-level retry of transient storage failures, applied on top of
/// the SDK's own retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
    pub max_backoff_milliseconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            max_attempts: 5,
            initial_backoff_milliseconds: 500,
            max_backoff_milliseconds: 120_000,
        }
    }
}

/// Polling used while waiting for the provider to reflect a change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitConfig {
    pub versioning_wait_attempts: u32,
    pub versioning_wait_interval_milliseconds: u64,
    /// 0 disables waiting for the bucket to appear or disappear.
    pub bucket_state_wait_attempts: u32,
    pub bucket_state_wait_interval_milliseconds: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        WaitConfig {
            versioning_wait_attempts: 12,
            versioning_wait_interval_milliseconds: 5000,
            bucket_state_wait_attempts: 20,
            bucket_state_wait_interval_milliseconds: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_dummy_tracing_subscriber;

    #[test]
    fn config_for_target_sets_bucket_state_and_force() {
        init_dummy_tracing_subscriber();

        let config = Config::for_target("my-bucket", BucketState::Absent, true);
        assert_eq!(config.bucket, "my-bucket");
        assert_eq!(config.desired_state, BucketState::Absent);
        assert!(config.force);
    }

    #[test]
    fn config_default_field_values() {
        let config = Config::default();
        assert!(config.bucket.is_empty());
        assert_eq!(config.desired_state, BucketState::Present);
        assert!(!config.force);
        assert_eq!(config.worker_size, 4);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.max_keys, 1000);
        assert_eq!(config.failure_sample_size, 10);
        assert!(config.suspend_versioning);
        assert!(config.timeout().is_none());
        assert!(config.target_client_config.is_none());
        assert!(config.tracing_config.is_none());
    }

    #[test]
    fn region_is_left_to_the_sdk_by_default() {
        let config = Config::default();
        assert_eq!(config.region(), None);
    }

    #[test]
    fn region_comes_from_client_config() {
        let mut config = Config::default();
        config.target_client_config = Some(ClientConfig {
            client_config_location: ClientConfigLocation::default(),
            credential: S3Credentials::FromEnvironment,
            region: Some("eu-west-1".to_string()),
            endpoint_url: None,
            force_path_style: false,
            accelerate: false,
            retry_config: RetryConfig {
                aws_max_attempts: 3,
                initial_backoff_milliseconds: 100,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: None,
                operation_attempt_timeout_milliseconds: None,
                connect_timeout_milliseconds: None,
                read_timeout_milliseconds: None,
            },
            disable_stalled_stream_protection: false,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        });
        assert_eq!(config.region(), Some("eu-west-1"));
    }

    #[test]
    fn timeout_converts_milliseconds() {
        let mut config = Config::default();
        config.timeout_milliseconds = Some(1500);
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn wait_config_defaults_follow_sdk_waiters() {
        let wait = WaitConfig::default();
        assert_eq!(wait.versioning_wait_attempts, 12);
        assert_eq!(wait.versioning_wait_interval_milliseconds, 5000);
        assert_eq!(wait.bucket_state_wait_attempts, 20);
        assert_eq!(wait.bucket_state_wait_interval_milliseconds, 5000);
    }

    #[test]
    fn backoff_config_default_values() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.max_attempts, 5);
        assert_eq!(backoff.initial_backoff_milliseconds, 500);
        assert_eq!(backoff.max_backoff_milliseconds, 120_000);
    }
}
