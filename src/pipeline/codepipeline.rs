use aws_sdk_codepipeline::types::{FailureDetails as AwsFailureDetails, FailureType};
use aws_sdk_codepipeline::Client;
use tracing::{debug, instrument};

use super::{FailureDetails, JobId, NotifyError, OutputVariables, PipelineNotifier};

/// [`PipelineNotifier`] that posts job results to AWS CodePipeline.
#[derive(Clone)]
pub struct CodePipelineNotifier {
    client: Client,
}

impl CodePipelineNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl PipelineNotifier for CodePipelineNotifier {
    #[instrument(skip(self, outputs), fields(%job_id))]
    async fn report_success(
        &self,
        job_id: &JobId,
        outputs: &OutputVariables,
    ) -> Result<(), NotifyError> {
        let variables = outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        self.client
            .put_job_success_result()
            .job_id(job_id.as_str())
            .set_output_variables(Some(variables))
            .send()
            .await
            .map_err(|err| NotifyError::Request {
                operation: "PutJobSuccessResult",
                job_id: job_id.clone(),
                source: err.into(),
            })?;

        debug!("job success posted");
        Ok(())
    }

    #[instrument(skip(self, failure), fields(%job_id))]
    async fn report_failure(
        &self,
        job_id: &JobId,
        failure: &FailureDetails,
    ) -> Result<(), NotifyError> {
        let details = AwsFailureDetails::builder()
            .r#type(FailureType::JobFailed)
            .message(&failure.message)
            .set_external_execution_id(failure.execution_id.clone())
            .build()
            .map_err(|err| NotifyError::InvalidRequest {
                operation: "PutJobFailureResult",
                job_id: job_id.clone(),
                source: err.into(),
            })?;

        self.client
            .put_job_failure_result()
            .job_id(job_id.as_str())
            .failure_details(details)
            .send()
            .await
            .map_err(|err| NotifyError::Request {
                operation: "PutJobFailureResult",
                job_id: job_id.clone(),
                source: err.into(),
            })?;

        debug!("job failure posted");
        Ok(())
    }
}
