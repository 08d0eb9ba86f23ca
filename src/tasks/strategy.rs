use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config::Settings;
use crate::schemas::grading::{ExtractedItem, GradedQuestion, ProcessingMode, Submission};
use crate::services::extraction::ExtractionStage;
use crate::services::grading::GradingStage;
use crate::services::marking::MarkingScheme;
use crate::services::model_client::ModelClient;
use crate::services::single_shot::SingleShotStage;
use crate::tasks::pipeline::{SubmissionFailure, SubmissionState, SubmissionTracker};

const SINGLE_SHOT_NOTE: &str = "Extracted via single-shot mode";

/// Validated grades for one submission, before review routing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StrategyOutput {
    pub(crate) questions: Vec<GradedQuestion>,
    pub(crate) extracted: Vec<ExtractedItem>,
    pub(crate) model_attempts: u32,
}

/// Turns raw answer-sheet text into ordered, validated grades. Chosen once per batch.
#[async_trait]
pub(crate) trait GradingStrategy: Send + Sync {
    fn mode(&self) -> ProcessingMode;

    async fn run(
        &self,
        submission: &Submission,
        tracker: &mut SubmissionTracker,
    ) -> Result<StrategyOutput, SubmissionFailure>;
}

/// Extraction call followed by a grading call.
pub(crate) struct PipelineStrategy {
    extraction: ExtractionStage,
    grading: GradingStage,
}

impl PipelineStrategy {
    pub(crate) fn new(extraction: ExtractionStage, grading: GradingStage) -> Self {
        Self { extraction, grading }
    }
}

#[async_trait]
impl GradingStrategy for PipelineStrategy {
    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Pipeline
    }

    async fn run(
        &self,
        submission: &Submission,
        tracker: &mut SubmissionTracker,
    ) -> Result<StrategyOutput, SubmissionFailure> {
        tracker.advance(SubmissionState::Extracting);
        let extracted = self
            .extraction
            .extract(submission)
            .await
            .map_err(|cause| SubmissionFailure::new(SubmissionState::Extracting, cause, 0))?;

        tracker.advance(SubmissionState::Grading);
        let graded = self.grading.grade(&submission.id, &extracted.value).await.map_err(|cause| {
            SubmissionFailure::new(SubmissionState::Grading, cause, extracted.attempts)
        })?;

        Ok(StrategyOutput {
            questions: graded.value,
            extracted: extracted.value,
            model_attempts: extracted.attempts + graded.attempts,
        })
    }
}

/// One combined call; extraction records are derived from the graded answers.
pub(crate) struct SingleShotStrategy {
    stage: SingleShotStage,
}

impl SingleShotStrategy {
    pub(crate) fn new(stage: SingleShotStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl GradingStrategy for SingleShotStrategy {
    fn mode(&self) -> ProcessingMode {
        ProcessingMode::SingleShot
    }

    async fn run(
        &self,
        submission: &Submission,
        tracker: &mut SubmissionTracker,
    ) -> Result<StrategyOutput, SubmissionFailure> {
        tracker.advance(SubmissionState::Processing);
        let graded = self
            .stage
            .process(submission)
            .await
            .map_err(|cause| SubmissionFailure::new(SubmissionState::Processing, cause, 0))?;

        let extracted = graded
            .value
            .iter()
            .map(|question| ExtractedItem {
                question_id: question.question_id.clone(),
                question_text: String::new(),
                student_answer: question.answer_text.clone(),
                transcription_notes: vec![String::from(SINGLE_SHOT_NOTE)],
            })
            .collect();

        Ok(StrategyOutput {
            questions: graded.value,
            extracted,
            model_attempts: graded.attempts,
        })
    }
}

pub(crate) fn build_strategy(
    mode: ProcessingMode,
    client: ModelClient,
    marking: MarkingScheme,
    rubric: Arc<str>,
    settings: &Settings,
) -> Arc<dyn GradingStrategy> {
    match mode {
        ProcessingMode::Pipeline => Arc::new(PipelineStrategy::new(
            ExtractionStage::new(client.clone(), &marking, settings),
            GradingStage::new(client, marking, rubric, settings),
        )),
        ProcessingMode::SingleShot => Arc::new(SingleShotStrategy::new(SingleShotStage::new(
            client, marking, &rubric, settings,
        ))),
    }
}
