mod allocator;
mod config;
mod pipeline;
mod runner;
mod storage;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use clap::{ArgGroup, Parser};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::allocator::{Allocator, Strategy};
use crate::config::Config;
use crate::pipeline::codepipeline::CodePipelineNotifier;
use crate::pipeline::JobId;
use crate::runner::JobOutcome;
use crate::storage::s3::S3CounterStore;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "build-number-provider",
    about = "Issue the next build number to a CodePipeline job"
)]
#[command(group(
    ArgGroup::new("job")
        .required(true)
        .multiple(true)
        .args(["job_id", "event"])
))]
struct Cli {
    /// Path to a YAML configuration file.  Settings are read from the
    /// environment when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CodePipeline job id to report against.  Takes precedence over
    /// `--event` when both are present.
    #[arg(long, env = "CODEPIPELINE_JOB_ID")]
    job_id: Option<String>,

    /// CodePipeline job event JSON file (`-` for stdin).
    #[arg(long)]
    event: Option<String>,

    /// Execution id attached to failure reports.
    #[arg(long, env = "EXECUTION_ID")]
    execution_id: Option<String>,
}

impl Cli {
    fn job_id(&self) -> Result<JobId> {
        if let Some(id) = &self.job_id {
            return Ok(JobId::new(id.clone()));
        }
        let source = self
            .event
            .as_deref()
            .context("either --job-id or --event is required")?;
        let event = pipeline::event::read_event(source)?;
        tracing::debug!(account_id = ?event.job.account_id, "job event read");
        Ok(event.job.id)
    }

    fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => config::load_config(path),
            None => config::load_from_env(),
        }
    }
}

// ---------------------------------------------------------------------------
// AWS client setup
// ---------------------------------------------------------------------------

async fn load_aws_config(config: Option<&Config>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = config.and_then(|c| c.region.clone()) {
        loader = loader.region(Region::new(region));
    }
    if config.is_some_and(|c| c.use_fips) {
        loader = loader.use_fips(true);
    }

    loader.load().await
}

fn build_s3_client(aws_config: &SdkConfig, config: &Config) -> aws_sdk_s3::Client {
    let s3_config = aws_sdk_s3::config::Builder::from(aws_config)
        .force_path_style(config.force_path_style)
        .build();

    let client = aws_sdk_s3::Client::from_conf(s3_config);
    tracing::info!(
        bucket = %config.bucket,
        region = ?aws_config.region(),
        fips = config.use_fips,
        "S3 client initialised"
    );
    client
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // ---- CLI ----
    let cli = Cli::parse();
    let job_id = cli.job_id()?;
    let execution_id = cli.execution_id.as_deref();

    tracing::info!(%job_id, "starting build-number-provider");

    // ---- Config ----
    // Loaded before the clients but only checked after, so that a bad
    // configuration is still reported against the job.
    let config = cli.load_config();

    let aws_config = load_aws_config(config.as_ref().ok()).await;
    let notifier = CodePipelineNotifier::new(aws_sdk_codepipeline::Client::new(&aws_config));

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            runner::report_failure(&notifier, &job_id, &err, execution_id).await;
            return Ok(ExitCode::FAILURE);
        }
    };

    // ---- Allocate and report ----
    let store = S3CounterStore::new(build_s3_client(&aws_config, &config));
    let allocator = Allocator::new(Arc::new(store), Strategy::from_config(&config));

    let outcome = runner::run_job(
        &allocator,
        &config.counter(),
        &notifier,
        &job_id,
        execution_id,
    )
    .await;

    match outcome {
        JobOutcome::Succeeded { build_number } => {
            tracing::info!(%build_number, "build-number-provider finished");
            Ok(ExitCode::SUCCESS)
        }
        JobOutcome::Failed { message, reported } => {
            tracing::error!(%message, reported, "build-number-provider failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
