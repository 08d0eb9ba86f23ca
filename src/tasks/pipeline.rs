use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::schemas::grading::{QuestionResult, Submission, SubmissionResult};
use crate::services::model_client::InvocationError;
use crate::services::review_router::{ReviewQueue, ReviewRouter};
use crate::tasks::strategy::GradingStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmissionState {
    Pending,
    Extracting,
    Grading,
    Processing,
    Validated,
    Succeeded,
    Failed,
}

impl SubmissionState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Grading => "grading",
            Self::Processing => "processing",
            Self::Validated => "validated",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Extracting | Self::Processing) => true,
            (Self::Extracting, Self::Grading) => true,
            (Self::Grading | Self::Processing, Self::Validated) => true,
            (Self::Validated, Self::Succeeded) => true,
            (current, Self::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// The only error that leaves a grading strategy. Carries the stage it happened in and the
/// model calls spent so far.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} stage failed: {cause}", .stage.as_str())]
pub(crate) struct SubmissionFailure {
    pub(crate) stage: SubmissionState,
    pub(crate) cause: InvocationError,
    pub(crate) model_attempts: u32,
}

impl SubmissionFailure {
    pub(crate) fn new(stage: SubmissionState, cause: InvocationError, prior_attempts: u32) -> Self {
        let model_attempts = prior_attempts + cause.model_attempts();
        Self { stage, cause, model_attempts }
    }
}

/// Walks one submission through its lifecycle and keeps the path it took.
#[derive(Debug, Clone)]
pub(crate) struct SubmissionTracker {
    submission_id: String,
    history: Vec<SubmissionState>,
}

impl SubmissionTracker {
    pub(crate) fn new(submission_id: &str) -> Self {
        Self { submission_id: submission_id.to_string(), history: vec![SubmissionState::Pending] }
    }

    pub(crate) fn state(&self) -> SubmissionState {
        self.history.last().copied().unwrap_or(SubmissionState::Pending)
    }

    pub(crate) fn history(&self) -> &[SubmissionState] {
        &self.history
    }

    pub(crate) fn advance(&mut self, next: SubmissionState) {
        let current = self.state();
        if !current.can_advance_to(next) {
            tracing::error!(
                submission_id = %self.submission_id,
                from = current.as_str(),
                to = next.as_str(),
                "Ignoring invalid submission state transition"
            );
            return;
        }

        tracing::debug!(
            submission_id = %self.submission_id,
            from = current.as_str(),
            to = next.as_str(),
            "Submission state changed"
        );
        self.history.push(next);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ProcessedSubmission {
    pub(crate) result: SubmissionResult,
    pub(crate) history: Vec<SubmissionState>,
}

/// Drives single submissions through the batch's strategy, routes the grades and records
/// flagged questions. Never lets a submission's failure escape.
pub(crate) struct Orchestrator {
    strategy: Arc<dyn GradingStrategy>,
    router: ReviewRouter,
    review_queue: ReviewQueue,
}

impl Orchestrator {
    pub(crate) fn new(strategy: Arc<dyn GradingStrategy>, router: ReviewRouter) -> Self {
        Self { strategy, router, review_queue: ReviewQueue::new() }
    }

    pub(crate) fn review_queue(&self) -> &ReviewQueue {
        &self.review_queue
    }

    pub(crate) async fn process(
        &self,
        index: usize,
        submission: &Submission,
    ) -> ProcessedSubmission {
        let started = Instant::now();
        let mut tracker = SubmissionTracker::new(&submission.id);

        tracing::info!(
            submission_id = %submission.id,
            mode = self.strategy.mode().as_str(),
            "Processing submission"
        );

        let result = if submission.mode != self.strategy.mode() {
            tracker.advance(SubmissionState::Failed);
            let reason = format!(
                "submission was queued for {} mode but the batch runs {} mode",
                submission.mode.as_str(),
                self.strategy.mode().as_str()
            );
            tracing::error!(submission_id = %submission.id, error = %reason, "Submission rejected");
            SubmissionResult::failed(submission, reason, 0)
        } else {
            self.grade(index, submission, &mut tracker).await
        };

        metrics::counter!("submissions_total", "status" => result.status.as_str())
            .increment(1);
        metrics::histogram!("submission_duration_seconds", "mode" => self.strategy.mode().as_str())
            .record(started.elapsed().as_secs_f64());

        ProcessedSubmission { result, history: tracker.history().to_vec() }
    }

    async fn grade(
        &self,
        index: usize,
        submission: &Submission,
        tracker: &mut SubmissionTracker,
    ) -> SubmissionResult {
        match self.strategy.run(submission, tracker).await {
            Ok(output) => {
                tracker.advance(SubmissionState::Validated);
                let questions: Vec<QuestionResult> =
                    output.questions.into_iter().map(|graded| self.router.route(graded)).collect();
                self.review_queue.record(index, &submission.id, &questions);
                tracker.advance(SubmissionState::Succeeded);

                let result = SubmissionResult::succeeded(
                    submission,
                    questions,
                    output.extracted,
                    output.model_attempts,
                );
                tracing::info!(
                    submission_id = %submission.id,
                    total_score = result.total_score,
                    total_possible = result.total_possible,
                    flagged = result.flagged_count(),
                    threshold = self.router.threshold(),
                    model_attempts = result.model_attempts,
                    "Submission graded"
                );
                result
            }
            Err(failure) => {
                tracker.advance(SubmissionState::Failed);
                tracing::error!(
                    submission_id = %submission.id,
                    stage = failure.stage.as_str(),
                    model_attempts = failure.model_attempts,
                    error = %failure,
                    "Submission failed"
                );
                SubmissionResult::failed(submission, failure.to_string(), failure.model_attempts)
            }
        }
    }
}
