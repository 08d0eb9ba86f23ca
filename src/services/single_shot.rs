use std::sync::Arc;

use crate::core::config::Settings;
use crate::schemas::grading::{GradedQuestion, Submission};
use crate::services::marking::MarkingScheme;
use crate::services::model_client::{InvocationError, ModelClient, ModelRequest, ModelTask};
use crate::services::prompts;
use crate::services::result_validator::SingleShotContract;
use crate::services::retry::Attempted;

/// Segmentation, denoising and grading in one call. The rubric and key live in the system prompt.
#[derive(Clone)]
pub(crate) struct SingleShotStage {
    client: ModelClient,
    contract: SingleShotContract,
    system_prompt: Arc<str>,
    max_output_tokens: u32,
    validation_retries: u32,
}

impl SingleShotStage {
    pub(crate) fn new(
        client: ModelClient,
        marking: MarkingScheme,
        rubric: &str,
        settings: &Settings,
    ) -> Self {
        Self {
            client,
            system_prompt: Arc::from(prompts::single_shot_system_prompt(rubric, &marking)),
            contract: SingleShotContract::new(marking),
            max_output_tokens: settings.ai().single_shot_max_tokens,
            validation_retries: settings.retry().validation_max_retries,
        }
    }

    pub(crate) async fn process(
        &self,
        submission: &Submission,
    ) -> Result<Attempted<Vec<GradedQuestion>>, InvocationError> {
        let request = ModelRequest::for_contract(
            ModelTask::SingleShot,
            &submission.id,
            self.system_prompt.to_string(),
            prompts::single_shot_user_prompt(&submission.id, &submission.raw_text),
            &self.contract,
            self.max_output_tokens,
        );

        let graded =
            self.client.invoke_validated(request, &self.contract, self.validation_retries).await?;

        tracing::info!(
            submission_id = %submission.id,
            questions = graded.value.len(),
            model_attempts = graded.attempts,
            "Single-shot grading complete"
        );
        Ok(graded)
    }
}
