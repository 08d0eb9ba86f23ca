use std::sync::Mutex;

use crate::schemas::grading::{GradedQuestion, QuestionResult, Verdict};
use crate::schemas::report::ReviewQueueEntry;

/// Human review is required below the threshold or for any partial credit.
/// A confidence equal to the threshold is not flagged.
pub(crate) fn needs_review(confidence: f64, verdict: Verdict, threshold: f64) -> bool {
    confidence < threshold || verdict == Verdict::PartiallyCorrect
}

/// Applies one run-wide threshold to every graded question.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReviewRouter {
    threshold: f64,
}

impl ReviewRouter {
    pub(crate) fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub(crate) fn threshold(&self) -> f64 {
        self.threshold
    }

    pub(crate) fn route(&self, graded: GradedQuestion) -> QuestionResult {
        let flagged = needs_review(graded.confidence, graded.verdict, self.threshold);
        QuestionResult::routed(graded, flagged)
    }
}

/// Flagged questions from every submission. Appends arrive in completion order and are sorted
/// back into input order on drain.
#[derive(Debug, Default)]
pub(crate) struct ReviewQueue {
    entries: Mutex<Vec<(usize, usize, ReviewQueueEntry)>>,
}

impl ReviewQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(
        &self,
        submission_index: usize,
        submission_id: &str,
        questions: &[QuestionResult],
    ) {
        let flagged: Vec<_> = questions
            .iter()
            .enumerate()
            .filter(|(_, question)| question.flagged)
            .map(|(position, question)| {
                (
                    submission_index,
                    position,
                    ReviewQueueEntry {
                        submission_id: submission_id.to_string(),
                        question_id: question.question_id.clone(),
                        verdict: question.verdict,
                        confidence: question.confidence,
                        feedback: question.feedback.clone(),
                        score: question.score,
                        max_points: question.max_points,
                    },
                )
            })
            .collect();

        if flagged.is_empty() {
            return;
        }
        metrics::counter!("flagged_questions_total").increment(flagged.len() as u64);

        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.extend(flagged);
    }

    /// Submission input order, then question order within each submission.
    pub(crate) fn drain_ordered(&self) -> Vec<ReviewQueueEntry> {
        let mut entries = match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        entries.sort_by_key(|(submission, position, _)| (*submission, *position));
        entries.into_iter().map(|(_, _, entry)| entry).collect()
    }
}
