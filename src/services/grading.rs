use std::sync::Arc;

use crate::core::config::Settings;
use crate::schemas::grading::{ExtractedItem, GradedQuestion};
use crate::services::marking::MarkingScheme;
use crate::services::model_client::{InvocationError, ModelClient, ModelRequest, ModelTask};
use crate::services::prompts;
use crate::services::result_validator::{ExpectedQuestion, GradingContract};
use crate::services::retry::Attempted;

/// Grades extracted answers against the rubric and, per question, the answer key.
#[derive(Clone)]
pub(crate) struct GradingStage {
    client: ModelClient,
    marking: MarkingScheme,
    rubric: Arc<str>,
    max_output_tokens: u32,
    validation_retries: u32,
}

impl GradingStage {
    pub(crate) fn new(
        client: ModelClient,
        marking: MarkingScheme,
        rubric: Arc<str>,
        settings: &Settings,
    ) -> Self {
        Self {
            client,
            marking,
            rubric,
            max_output_tokens: settings.ai().grading_max_tokens,
            validation_retries: settings.retry().validation_max_retries,
        }
    }

    pub(crate) async fn grade(
        &self,
        submission_id: &str,
        extracted: &[ExtractedItem],
    ) -> Result<Attempted<Vec<GradedQuestion>>, InvocationError> {
        let expected: Vec<ExpectedQuestion> = extracted
            .iter()
            .map(|item| ExpectedQuestion {
                question_id: item.question_id.clone(),
                answer_text: item.student_answer.clone(),
                guidance: self.marking.guidance(&item.question_id, &item.student_answer),
            })
            .collect();

        let user_prompt = prompts::grading_user_prompt(
            submission_id,
            &self.rubric,
            extracted,
            &expected,
            &self.marking,
        );
        let contract = GradingContract::new(expected);
        let request = ModelRequest::for_contract(
            ModelTask::Grading,
            submission_id,
            prompts::GRADING_SYSTEM_PROMPT.to_string(),
            user_prompt,
            &contract,
            self.max_output_tokens,
        );

        let graded =
            self.client.invoke_validated(request, &contract, self.validation_retries).await?;

        tracing::info!(
            submission_id,
            questions = contract.expected().len(),
            model_attempts = graded.attempts,
            "Grading complete"
        );
        Ok(graded)
    }
}
