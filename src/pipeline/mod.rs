//! Pipeline orchestration seam.
//!
//! Provides the [`PipelineNotifier`] trait through which a job's outcome is
//! reported back to the orchestrator, plus the job-side types that travel
//! with it.  [`codepipeline`] is the AWS implementation.

pub mod codepipeline;
pub mod event;
#[cfg(test)]
pub mod recording;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::BoxError;

/// Output variable holding the decimal build number.
pub const BUILD_NUMBER_VARIABLE: &str = "buildNumber";
/// Output variable holding the prefixed version string.
pub const VERSION_VARIABLE: &str = "version";

/// CodePipeline rejects failure messages longer than this many characters.
pub const MAX_FAILURE_MESSAGE_CHARS: usize = 5000;

pub type OutputVariables = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Job identity
// ---------------------------------------------------------------------------

/// Opaque identifier of the pipeline job being served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Failure details
// ---------------------------------------------------------------------------

/// Details attached to a failed job.  The failure type is always `JobFailed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetails {
    pub message: String,
    pub execution_id: Option<String>,
}

impl FailureDetails {
    /// Build the report for `error`, rendering its whole source chain.
    pub fn job_failed(error: &anyhow::Error, execution_id: Option<&str>) -> Self {
        Self {
            message: truncate_chars(
                &format!("CodePipeline action failed: {error:#}"),
                MAX_FAILURE_MESSAGE_CHARS,
            ),
            execution_id: execution_id.map(str::to_owned),
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{operation} for job {job_id} failed")]
    Request {
        operation: &'static str,
        job_id: JobId,
        #[source]
        source: BoxError,
    },

    #[error("invalid {operation} request for job {job_id}")]
    InvalidRequest {
        operation: &'static str,
        job_id: JobId,
        #[source]
        source: BoxError,
    },
}

/// Reports a job's outcome to the orchestrating pipeline.
#[async_trait::async_trait]
pub trait PipelineNotifier: Send + Sync {
    async fn report_success(
        &self,
        job_id: &JobId,
        outputs: &OutputVariables,
    ) -> Result<(), NotifyError>;

    async fn report_failure(
        &self,
        job_id: &JobId,
        failure: &FailureDetails,
    ) -> Result<(), NotifyError>;
}
