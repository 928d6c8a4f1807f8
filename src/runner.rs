//! One pipeline job, start to finish.
//!
//! Allocates a build number and reports the outcome exactly once: a success
//! report with the output variables, or a failure report carrying the error
//! chain.  A failing success report is itself turned into a failure report.
//! A failing failure report is logged and dropped.

use anyhow::Result;
use tracing::{error, info};

use crate::allocator::{AllocationResult, Allocator, BuildNumber, CounterConfig};
use crate::pipeline::{FailureDetails, JobId, PipelineNotifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { build_number: BuildNumber },
    Failed { message: String, reported: bool },
}

/// Run the allocation for `job_id` and report the result to the pipeline.
pub async fn run_job(
    allocator: &Allocator,
    counter: &CounterConfig,
    notifier: &dyn PipelineNotifier,
    job_id: &JobId,
    execution_id: Option<&str>,
) -> JobOutcome {
    match allocate_and_report(allocator, counter, notifier, job_id).await {
        Ok(result) => JobOutcome::Succeeded {
            build_number: result.build_number,
        },
        Err(err) => report_failure(notifier, job_id, &err, execution_id).await,
    }
}

async fn allocate_and_report(
    allocator: &Allocator,
    counter: &CounterConfig,
    notifier: &dyn PipelineNotifier,
    job_id: &JobId,
) -> Result<AllocationResult> {
    let result = allocator.allocate(counter, job_id).await?;

    info!(
        payload = %serde_json::to_string(&result)?,
        "CodePipeline action successful, posting result"
    );
    notifier
        .report_success(&result.job_id, &result.output_variables)
        .await?;

    Ok(result)
}

/// Post `err` as the job's failure.  Best effort: a failure to report is
/// logged, not escalated.
pub async fn report_failure(
    notifier: &dyn PipelineNotifier,
    job_id: &JobId,
    err: &anyhow::Error,
    execution_id: Option<&str>,
) -> JobOutcome {
    let failure = FailureDetails::job_failed(err, execution_id);
    error!(%job_id, error = %failure.message, "CodePipeline action failed");

    let reported = match notifier.report_failure(job_id, &failure).await {
        Ok(()) => true,
        Err(report_err) => {
            error!(
                %job_id,
                error = %format!("{:#}", anyhow::Error::new(report_err)),
                "failed to report job failure to CodePipeline"
            );
            false
        }
    };

    JobOutcome::Failed {
        message: failure.message,
        reported,
    }
}
