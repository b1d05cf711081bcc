use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, trace};

use s3vb_rs::config::Config;
use s3vb_rs::{BucketTarget, CLIArgs, Reconciler, create_reconcile_cancellation_token, create_storage};

mod ctrl_c_handler;
mod output;
mod tracing_init;

/// s3vb - Reconcile a versioned Amazon S3 bucket to present or absent.
///
/// This binary is a thin wrapper over the s3vb-rs library.
#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "s3vb",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    let exit_code = run(config).await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = &config.tracing_config else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

/// Reconcile the configured bucket, print the result and return the exit code.
async fn run(config: Config) -> Result<i32> {
    let target =
        match BucketTarget::new(config.bucket.clone(), config.desired_state, config.force) {
            Ok(target) => target,
            Err(e) => {
                error!("{}", e);
                return Ok(e.exit_code());
            }
        };

    let cancellation_token = create_reconcile_cancellation_token();
    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = tokio::time::Instant::now();
    debug!("reconciliation start.");

    let failure_sample_size = config.failure_sample_size;
    let storage = create_storage(&config, cancellation_token.clone()).await;
    let result = Reconciler::new(config, storage, cancellation_token)
        .reconcile(&target)
        .await;

    let document = output::ResultDocument::new(target.name(), &result, failure_sample_size);
    println!("{}", serde_json::to_string(&document)?);

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
    debug!(duration_sec = duration_sec, "s3vb has been completed.");

    Ok(output::exit_code(&result))
}
