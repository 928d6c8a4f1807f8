//! [`PipelineNotifier`] that records reports instead of sending them.

use std::sync::Mutex;

use super::{FailureDetails, JobId, NotifyError, OutputVariables, PipelineNotifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Success {
        job_id: JobId,
        outputs: OutputVariables,
    },
    Failure {
        job_id: JobId,
        failure: FailureDetails,
    },
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    reports: Mutex<Vec<Report>>,
    reject_success: bool,
    reject_failure: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record success reports, then fail them.
    pub fn rejecting_success(mut self) -> Self {
        self.reject_success = true;
        self
    }

    /// Record failure reports, then fail them.
    pub fn rejecting_failure(mut self) -> Self {
        self.reject_failure = true;
        self
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PipelineNotifier for RecordingNotifier {
    async fn report_success(
        &self,
        job_id: &JobId,
        outputs: &OutputVariables,
    ) -> Result<(), NotifyError> {
        self.reports.lock().unwrap().push(Report::Success {
            job_id: job_id.clone(),
            outputs: outputs.clone(),
        });
        if self.reject_success {
            return Err(NotifyError::Request {
                operation: "PutJobSuccessResult",
                job_id: job_id.clone(),
                source: "throttled".into(),
            });
        }
        Ok(())
    }

    async fn report_failure(
        &self,
        job_id: &JobId,
        failure: &FailureDetails,
    ) -> Result<(), NotifyError> {
        self.reports.lock().unwrap().push(Report::Failure {
            job_id: job_id.clone(),
            failure: failure.clone(),
        });
        if self.reject_failure {
            return Err(NotifyError::Request {
                operation: "PutJobFailureResult",
                job_id: job_id.clone(),
                source: "throttled".into(),
            });
        }
        Ok(())
    }
}
