use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Verdict {
    Correct,
    PartiallyCorrect,
    Incorrect,
}

impl Verdict {
    pub(crate) const ALL: [Verdict; 3] =
        [Verdict::Correct, Verdict::PartiallyCorrect, Verdict::Incorrect];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::PartiallyCorrect => "partially_correct",
            Self::Incorrect => "incorrect",
        }
    }

    /// Exact match on the wire value. Anything else is not a verdict.
    pub(crate) fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|verdict| verdict.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ProcessingMode {
    Pipeline,
    SingleShot,
}

impl ProcessingMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::SingleShot => "single_shot",
        }
    }
}

/// One exam instance as discovered on disk.
#[derive(Debug, Clone)]
pub(crate) struct Submission {
    pub(crate) id: String,
    pub(crate) raw_text: String,
    pub(crate) mode: ProcessingMode,
    pub(crate) source_sha256: String,
}

/// A validated grade as produced by a grading strategy, before review routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradedQuestion {
    pub(crate) question_id: String,
    pub(crate) answer_text: String,
    pub(crate) score: f64,
    pub(crate) max_points: f64,
    pub(crate) verdict: Verdict,
    pub(crate) confidence: f64,
    pub(crate) feedback: String,
}

/// A graded question after routing. Built by the review router, so `flagged` always follows
/// from confidence and verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct QuestionResult {
    pub(crate) question_id: String,
    pub(crate) answer_text: String,
    pub(crate) score: f64,
    pub(crate) max_points: f64,
    pub(crate) verdict: Verdict,
    pub(crate) confidence: f64,
    pub(crate) feedback: String,
    pub(crate) flagged: bool,
}

impl QuestionResult {
    pub(crate) fn routed(graded: GradedQuestion, flagged: bool) -> Self {
        Self {
            question_id: graded.question_id,
            answer_text: graded.answer_text,
            score: graded.score,
            max_points: graded.max_points,
            verdict: graded.verdict,
            confidence: graded.confidence,
            feedback: graded.feedback,
            flagged,
        }
    }
}

/// Cleaned answer record from the extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ExtractedItem {
    pub(crate) question_id: String,
    #[serde(default)]
    pub(crate) question_text: String,
    pub(crate) student_answer: String,
    #[serde(default)]
    pub(crate) transcription_notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SubmissionStatus {
    Succeeded,
    Failed,
}

impl SubmissionStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of one submission. Failed submissions keep no question results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SubmissionResult {
    pub(crate) submission_id: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) failure_reason: Option<String>,
    pub(crate) questions: Vec<QuestionResult>,
    pub(crate) extracted_items: Vec<ExtractedItem>,
    pub(crate) total_score: f64,
    pub(crate) total_possible: f64,
    pub(crate) percentage: f64,
    pub(crate) model_attempts: u32,
    pub(crate) source_sha256: String,
}

impl SubmissionResult {
    pub(crate) fn succeeded(
        submission: &Submission,
        questions: Vec<QuestionResult>,
        extracted_items: Vec<ExtractedItem>,
        model_attempts: u32,
    ) -> Self {
        let total_score: f64 = questions.iter().map(|question| question.score).sum();
        let total_possible: f64 = questions.iter().map(|question| question.max_points).sum();

        Self {
            submission_id: submission.id.clone(),
            status: SubmissionStatus::Succeeded,
            failure_reason: None,
            questions,
            extracted_items,
            total_score,
            total_possible,
            percentage: percentage(total_score, total_possible),
            model_attempts,
            source_sha256: submission.source_sha256.clone(),
        }
    }

    pub(crate) fn failed(submission: &Submission, reason: String, model_attempts: u32) -> Self {
        Self {
            submission_id: submission.id.clone(),
            status: SubmissionStatus::Failed,
            failure_reason: Some(reason),
            questions: Vec::new(),
            extracted_items: Vec::new(),
            total_score: 0.0,
            total_possible: 0.0,
            percentage: 0.0,
            model_attempts,
            source_sha256: submission.source_sha256.clone(),
        }
    }

    pub(crate) fn flagged_count(&self) -> usize {
        self.questions.iter().filter(|question| question.flagged).count()
    }
}

pub(crate) fn percentage(total: f64, possible: f64) -> f64 {
    if possible <= 0.0 {
        return 0.0;
    }
    total / possible * 100.0
}
