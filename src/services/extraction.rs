use crate::core::config::Settings;
use crate::schemas::grading::{ExtractedItem, Submission};
use crate::services::marking::MarkingScheme;
use crate::services::model_client::{InvocationError, ModelClient, ModelRequest, ModelTask};
use crate::services::prompts;
use crate::services::result_validator::ExtractionContract;
use crate::services::retry::Attempted;

/// Segments and denoises a whole answer sheet in one atomic call.
#[derive(Clone)]
pub(crate) struct ExtractionStage {
    client: ModelClient,
    key_question_ids: Vec<String>,
    max_output_tokens: u32,
    validation_retries: u32,
}

impl ExtractionStage {
    pub(crate) fn new(client: ModelClient, marking: &MarkingScheme, settings: &Settings) -> Self {
        Self {
            client,
            key_question_ids: marking.question_ids(),
            max_output_tokens: settings.ai().extraction_max_tokens,
            validation_retries: settings.retry().validation_max_retries,
        }
    }

    pub(crate) async fn extract(
        &self,
        submission: &Submission,
    ) -> Result<Attempted<Vec<ExtractedItem>>, InvocationError> {
        let request = ModelRequest::for_contract(
            ModelTask::Extraction,
            &submission.id,
            prompts::EXTRACTION_SYSTEM_PROMPT.to_string(),
            prompts::extraction_user_prompt(
                &submission.id,
                &submission.raw_text,
                &self.key_question_ids,
            ),
            &ExtractionContract,
            self.max_output_tokens,
        );

        let extracted =
            self.client.invoke_validated(request, &ExtractionContract, self.validation_retries).await?;

        tracing::info!(
            submission_id = %submission.id,
            questions = extracted.value.len(),
            model_attempts = extracted.attempts,
            "Extraction complete"
        );
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::schemas::grading::ProcessingMode;
    use crate::services::marking::MarkingScheme;
use crate::services::model_client::ModelError;
    use crate::schemas::answer_key::AnswerKey;
    use crate::test_support::{
        extraction_reply, fake_client, force_answer_key, submission, FakeTransport,
    };

    const SHEET: &str = "Name: Jane Doe   Date: 03/04\n1) Waht is force?\nforce is a pu5h\n2. define work\nW = F d";

    #[tokio::test]
    async fn sends_raw_text_and_returns_items() {
        let transport = Arc::new(FakeTransport::new().script(
            "exam-1",
            ModelTask::Extraction,
            vec![Ok(extraction_reply(&[("1", "Force is a push"), ("2", "W = F d")]))],
        ));
        let stage = ExtractionStage::new(
            fake_client(transport.clone(), 3),
            &MarkingScheme::new(Arc::new(force_answer_key()), 10.0),
            &Settings::for_tests(),
        );

        let extracted = stage
            .extract(&submission("exam-1", SHEET, ProcessingMode::Pipeline))
            .await
            .expect("extraction");
        assert_eq!(extracted.value.len(), 2);
        assert_eq!(extracted.attempts, 1);

        let requests = transport.requests();
        assert_eq!(requests[0].task, ModelTask::Extraction);
        assert_eq!(requests[0].max_output_tokens, 1800);
        assert!(requests[0].user_prompt.contains("force is a pu5h"));
        assert!(requests[0]
            .user_prompt
            .contains("Answer key question ids (use these ids when they match): Q1\n"));
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_model_error() {
        let transport = Arc::new(FakeTransport::new().script(
            "exam-2",
            ModelTask::Extraction,
            vec![Err(crate::services::model_client::TransportError::Fatal(String::from("400")))],
        ));
        let stage = ExtractionStage::new(
            fake_client(transport, 3),
            &MarkingScheme::new(Arc::new(AnswerKey::empty()), 10.0),
            &Settings::for_tests(),
        );

        let err = stage
            .extract(&submission("exam-2", SHEET, ProcessingMode::Pipeline))
            .await
            .expect_err("fatal");
        assert!(matches!(err, InvocationError::Model(ModelError::Fatal { .. })));
    }
}
