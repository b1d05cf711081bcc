use crate::config::{
    BackoffConfig, CLITimeoutConfig, ClientConfig, Config, RetryConfig, TracingConfig, WaitConfig,
};
use crate::types::{AccessKeys, BucketState, ClientConfigLocation, S3Credentials};
use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::ffi::OsString;
use std::path::PathBuf;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_WORKER_SIZE: u16 = 4;
const DEFAULT_BATCH_SIZE: u16 = 1000;
const DEFAULT_MAX_KEYS: i32 = 1000;
const DEFAULT_OBJECT_LISTING_QUEUE_SIZE: u32 = 10_000;
const DEFAULT_FAILURE_SAMPLE_SIZE: usize = 10;
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_INITIAL_BACKOFF_MILLISECONDS: u64 = 500;
const DEFAULT_RETRY_MAX_BACKOFF_MILLISECONDS: u64 = 120_000;
const DEFAULT_VERSIONING_WAIT_ATTEMPTS: u32 = 12;
const DEFAULT_VERSIONING_WAIT_INTERVAL_MILLISECONDS: u64 = 5000;
const DEFAULT_BUCKET_STATE_WAIT_ATTEMPTS: u32 = 20;
const DEFAULT_BUCKET_STATE_WAIT_INTERVAL_MILLISECONDS: u64 = 5000;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_ACCELERATE: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;
const DEFAULT_NO_SUSPEND_VERSIONING: bool = false;
const DEFAULT_FORCE: bool = false;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_EMPTY_BUCKET_NAME: &str = "Bucket name must not be empty.";
const ERROR_MESSAGE_WORKER_SIZE_ZERO: &str = "Worker size must be at least 1.";
const ERROR_MESSAGE_BATCH_SIZE_ZERO: &str = "Batch size must be at least 1.";
const ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE: &str = "Batch size must be at most 1000 (S3 API limit).";
const ERROR_MESSAGE_MAX_KEYS_OUT_OF_RANGE: &str = "Max keys must be between 1 and 1000.";
const ERROR_MESSAGE_OBJECT_LISTING_QUEUE_SIZE_ZERO: &str =
    "Object listing queue size must be at least 1.";
const ERROR_MESSAGE_RETRY_MAX_ATTEMPTS_ZERO: &str = "Retry max attempts must be at least 1.";
const ERROR_MESSAGE_TIMEOUT_ZERO: &str = "Timeout must be at least 1 millisecond.";
const ERROR_MESSAGE_SECRET_KEY_REQUIRED: &str =
    "--target-secret-key is required when --target-access-key is given.";

fn check_bucket_name(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err(ERROR_MESSAGE_EMPTY_BUCKET_NAME.to_string())
    } else {
        Ok(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// s3vb - Reconcile a versioned Amazon S3 bucket to a declared state.
///
/// Creates the bucket when it should be present, and deletes it when it
/// should be absent. With --force, every object version and delete marker is
/// purged before the bucket is deleted.
///
/// Example:
///   s3vb my-bucket --state present --target-region eu-west-1
///   s3vb my-bucket --state absent
///   s3vb my-bucket --state absent --force -v
#[derive(Parser, Clone, Debug)]
#[command(name = "s3vb", version, about, long_about = None)]
pub struct CLIArgs {
    /// Name of the bucket to reconcile.
    #[arg(
        env = "S3VB_BUCKET",
        value_parser = check_bucket_name,
        default_value_if("auto_complete_shell", clap::builder::ArgPredicate::IsPresent, "ignored"),
        required = false,
    )]
    pub name: String,

    // -----------------------------------------------------------------------
    // General options
    // -----------------------------------------------------------------------
    /// Desired state of the bucket.
    #[arg(
        short = 's',
        long,
        env,
        value_enum,
        default_value_if("auto_complete_shell", clap::builder::ArgPredicate::IsPresent, "present"),
        required = false,
        help_heading = "General"
    )]
    pub state: Option<BucketState>,

    /// Purge every object version and delete marker before deleting the bucket.
    #[arg(short = 'f', long, env, default_value_t = DEFAULT_FORCE, help_heading = "General")]
    pub force: bool,

    /// Abort the whole run after this many milliseconds.
    #[arg(long, env, help_heading = "General")]
    pub timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // Purge options
    // -----------------------------------------------------------------------
    /// Number of versions per DeleteObjects request (1-1000).
    #[arg(long, env, default_value_t = DEFAULT_BATCH_SIZE, help_heading = "Purge")]
    pub batch_size: u16,

    /// Number of failing keys reported when a purge is incomplete.
    #[arg(long, env, default_value_t = DEFAULT_FAILURE_SAMPLE_SIZE, help_heading = "Purge")]
    pub failure_sample_size: usize,

    /// Leave versioning enabled while purging.
    #[arg(long, env, default_value_t = DEFAULT_NO_SUSPEND_VERSIONING, help_heading = "Purge")]
    pub no_suspend_versioning: bool,

    /// Poll attempts while waiting for versioning to become suspended.
    #[arg(long, env, default_value_t = DEFAULT_VERSIONING_WAIT_ATTEMPTS, help_heading = "Purge")]
    pub versioning_wait_attempts: u32,

    /// Interval in ms between versioning polls.
    #[arg(long, env, default_value_t = DEFAULT_VERSIONING_WAIT_INTERVAL_MILLISECONDS, help_heading = "Purge")]
    pub versioning_wait_interval_milliseconds: u64,

    /// Poll attempts while waiting for a created or deleted bucket to be visible. 0 disables.
    #[arg(long, env, default_value_t = DEFAULT_BUCKET_STATE_WAIT_ATTEMPTS, help_heading = "Purge")]
    pub bucket_state_wait_attempts: u32,

    /// Interval in ms between bucket existence polls.
    #[arg(long, env, default_value_t = DEFAULT_BUCKET_STATE_WAIT_INTERVAL_MILLISECONDS, help_heading = "Purge")]
    pub bucket_state_wait_interval_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Number of concurrent batch delete workers.
    #[arg(long, env, default_value_t = DEFAULT_WORKER_SIZE, help_heading = "Performance")]
    pub worker_size: u16,

    /// Maximum objects per second for rate limiting.
    #[arg(long, env, help_heading = "Performance")]
    pub rate_limit_objects: Option<u32>,

    /// Version listing channel queue size.
    #[arg(long, env, default_value_t = DEFAULT_OBJECT_LISTING_QUEUE_SIZE, help_heading = "Performance")]
    pub object_listing_queue_size: u32,

    /// Max keys per ListObjectVersions request.
    #[arg(long, env, default_value_t = DEFAULT_MAX_KEYS, help_heading = "Performance")]
    pub max_keys: i32,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (normal), -v, -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable AWS SDK tracing.
    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Maximum retry attempts for AWS SDK operations.
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    /// Initial backoff in milliseconds for AWS SDK retries.
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    /// Attempts for throttled or unavailable calls, on top of SDK retries.
    #[arg(long, env, default_value_t = DEFAULT_RETRY_MAX_ATTEMPTS, help_heading = "Retry")]
    pub retry_max_attempts: u32,

    /// First backoff in ms for throttled or unavailable calls.
    #[arg(long, env, default_value_t = DEFAULT_RETRY_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub retry_initial_backoff_milliseconds: u64,

    /// Backoff cap in ms for throttled or unavailable calls.
    #[arg(long, env, default_value_t = DEFAULT_RETRY_MAX_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub retry_max_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    /// Overall operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Read timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    /// AWS config file path.
    #[arg(long, env, help_heading = "AWS")]
    pub aws_config_file: Option<PathBuf>,

    /// AWS shared credentials file path.
    #[arg(long, env, help_heading = "AWS")]
    pub aws_shared_credentials_file: Option<PathBuf>,

    /// AWS profile. If not set, uses the default credential chain.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), conflicts_with = "target_access_key", help_heading = "AWS")]
    pub target_profile: Option<String>,

    /// AWS access key ID.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_access_key: Option<String>,

    /// AWS secret access key.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_secret_key: Option<String>,

    /// AWS session token.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_session_token: Option<String>,

    /// AWS region. Also the location constraint for created buckets.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_region: Option<String>,

    /// Custom S3-compatible endpoint URL (e.g. MinIO, Ceph).
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_endpoint_url: Option<String>,

    /// Force path-style access (required for some S3-compatible services).
    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub target_force_path_style: bool,

    /// Enable S3 Transfer Acceleration.
    #[arg(long, env, default_value_t = DEFAULT_ACCELERATE, help_heading = "AWS")]
    pub target_accelerate: bool,

    /// Disable stalled stream protection.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "AWS")]
    pub disable_stalled_stream_protection: bool,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use s3vb_rs::config::args::parse_from_args;
///
/// let args = vec!["s3vb", "my-bucket", "--state", "absent", "--force"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(cli_args.force);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.worker_size == 0 {
            return Err(ERROR_MESSAGE_WORKER_SIZE_ZERO.to_string());
        }
        if self.batch_size == 0 {
            return Err(ERROR_MESSAGE_BATCH_SIZE_ZERO.to_string());
        }
        if self.batch_size > 1000 {
            return Err(ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE.to_string());
        }
        if !(1..=1000).contains(&self.max_keys) {
            return Err(ERROR_MESSAGE_MAX_KEYS_OUT_OF_RANGE.to_string());
        }
        if self.object_listing_queue_size == 0 {
            return Err(ERROR_MESSAGE_OBJECT_LISTING_QUEUE_SIZE_ZERO.to_string());
        }
        if self.retry_max_attempts == 0 {
            return Err(ERROR_MESSAGE_RETRY_MAX_ATTEMPTS_ZERO.to_string());
        }
        if self.timeout_milliseconds == Some(0) {
            return Err(ERROR_MESSAGE_TIMEOUT_ZERO.to_string());
        }
        if self.target_access_key.is_some() && self.target_secret_key.is_none() {
            return Err(ERROR_MESSAGE_SECRET_KEY_REQUIRED.to_string());
        }
        Ok(())
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.target_profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.target_access_key {
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: self.target_secret_key.clone().unwrap_or_default(),
                    session_token: self.target_session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.target_region.clone(),
            endpoint_url: self.target_endpoint_url.clone(),
            force_path_style: self.target_force_path_style,
            accelerate: self.target_accelerate,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        // Completion generation needs no target.
        let desired_state = match (args.state, &args.auto_complete_shell) {
            (Some(state), _) => state,
            (None, Some(_)) => BucketState::Present,
            (None, None) => {
                return Err("--state <present|absent> is required.".to_string());
            }
        };

        Ok(Config {
            bucket: args.name.clone(),
            desired_state,
            force: args.force,
            target_client_config: Some(args.build_client_config()),
            backoff_config: BackoffConfig {
                max_attempts: args.retry_max_attempts,
                initial_backoff_milliseconds: args.retry_initial_backoff_milliseconds,
                max_backoff_milliseconds: args.retry_max_backoff_milliseconds,
            },
            tracing_config: args.build_tracing_config(),
            wait_config: WaitConfig {
                versioning_wait_attempts: args.versioning_wait_attempts,
                versioning_wait_interval_milliseconds: args.versioning_wait_interval_milliseconds,
                bucket_state_wait_attempts: args.bucket_state_wait_attempts,
                bucket_state_wait_interval_milliseconds: args
                    .bucket_state_wait_interval_milliseconds,
            },
            worker_size: args.worker_size,
            batch_size: args.batch_size,
            max_keys: args.max_keys,
            object_listing_queue_size: args.object_listing_queue_size,
            rate_limit_objects: args.rate_limit_objects,
            timeout_milliseconds: args.timeout_milliseconds,
            failure_sample_size: args.failure_sample_size,
            suspend_versioning: !args.no_suspend_versioning,
            auto_complete_shell: args.auto_complete_shell,
        })
    }
}
