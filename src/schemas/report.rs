use serde::Serialize;

use super::grading::{ExtractedItem, ProcessingMode, QuestionResult, SubmissionStatus, Verdict};

/// Metadata stamped on every artifact of one batch run.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RunMetadata {
    pub(crate) run_id: String,
    pub(crate) generated_at: String,
    pub(crate) model: String,
    pub(crate) mode: ProcessingMode,
    pub(crate) confidence_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SubmissionReport {
    pub(crate) submission_id: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) failure_reason: Option<String>,
    pub(crate) total_score: f64,
    pub(crate) total_possible: f64,
    pub(crate) percentage: f64,
    pub(crate) flagged_count: usize,
    pub(crate) questions: Vec<QuestionResult>,
    pub(crate) extracted_items: Vec<ExtractedItem>,
    pub(crate) model_attempts: u32,
    pub(crate) source_sha256: String,
    pub(crate) run: RunMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SummaryRow {
    pub(crate) submission_id: String,
    pub(crate) total_score: f64,
    pub(crate) total_possible: f64,
    pub(crate) percentage: f64,
    pub(crate) flagged_count: usize,
    pub(crate) status: SubmissionStatus,
    pub(crate) item_breakdown: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ReviewQueueEntry {
    pub(crate) submission_id: String,
    pub(crate) question_id: String,
    pub(crate) verdict: Verdict,
    pub(crate) confidence: f64,
    pub(crate) feedback: String,
    pub(crate) score: f64,
    pub(crate) max_points: f64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReviewQueueDocument {
    pub(crate) total_flagged: usize,
    pub(crate) items: Vec<ReviewQueueEntry>,
    pub(crate) run: RunMetadata,
}

/// Everything a sink needs to persist for one batch, already in input order.
#[derive(Debug, Clone)]
pub(crate) struct BatchReport {
    pub(crate) run: RunMetadata,
    pub(crate) submissions: Vec<SubmissionReport>,
    pub(crate) summary: Vec<SummaryRow>,
    pub(crate) review_queue: Vec<ReviewQueueEntry>,
}

impl BatchReport {
    pub(crate) fn failed_count(&self) -> usize {
        self.summary.iter().filter(|row| row.status == SubmissionStatus::Failed).count()
    }

    pub(crate) fn review_document(&self) -> ReviewQueueDocument {
        ReviewQueueDocument {
            total_flagged: self.review_queue.len(),
            items: self.review_queue.clone(),
            run: self.run.clone(),
        }
    }
}
