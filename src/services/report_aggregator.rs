use crate::schemas::grading::{QuestionResult, SubmissionResult};
use crate::schemas::report::{
    BatchReport, ReviewQueueEntry, RunMetadata, SubmissionReport, SummaryRow,
};

/// Assembles the artifact shapes. `results` and `review_queue` must already be in input order.
pub(crate) fn aggregate(
    run: RunMetadata,
    results: Vec<SubmissionResult>,
    review_queue: Vec<ReviewQueueEntry>,
) -> BatchReport {
    let summary = results.iter().map(summary_row).collect();
    let submissions =
        results.into_iter().map(|result| submission_report(result, run.clone())).collect();

    BatchReport { run, submissions, summary, review_queue }
}

pub(crate) fn summary_row(result: &SubmissionResult) -> SummaryRow {
    SummaryRow {
        submission_id: result.submission_id.clone(),
        total_score: result.total_score,
        total_possible: result.total_possible,
        percentage: result.percentage,
        flagged_count: result.flagged_count(),
        status: result.status,
        item_breakdown: item_breakdown(&result.questions),
    }
}

/// `Q1:3/5; Q2:5/5`
pub(crate) fn item_breakdown(questions: &[QuestionResult]) -> String {
    questions
        .iter()
        .map(|question| format!("{}:{}/{}", question.question_id, question.score, question.max_points))
        .collect::<Vec<_>>()
        .join("; ")
}

fn submission_report(result: SubmissionResult, run: RunMetadata) -> SubmissionReport {
    let flagged_count = result.flagged_count();
    SubmissionReport {
        submission_id: result.submission_id,
        status: result.status,
        failure_reason: result.failure_reason,
        total_score: result.total_score,
        total_possible: result.total_possible,
        percentage: result.percentage,
        flagged_count,
        questions: result.questions,
        extracted_items: result.extracted_items,
        model_attempts: result.model_attempts,
        source_sha256: result.source_sha256,
        run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::grading::{ProcessingMode, SubmissionStatus, Verdict};
    use crate::test_support::submission;

    fn question(question_id: &str, score: f64, max_points: f64, flagged: bool) -> QuestionResult {
        QuestionResult {
            question_id: question_id.to_string(),
            answer_text: String::from("answer"),
            score,
            max_points,
            verdict: if score == max_points { Verdict::Correct } else { Verdict::PartiallyCorrect },
            confidence: 90.0,
            feedback: String::new(),
            flagged,
        }
    }

    fn run() -> RunMetadata {
        RunMetadata {
            run_id: String::from("run-1"),
            generated_at: String::from("2026-01-01T00:00:00Z"),
            model: String::from("test-model"),
            mode: ProcessingMode::Pipeline,
            confidence_threshold: 80.0,
        }
    }

    #[test]
    fn breakdown_lists_each_question() {
        let questions = vec![question("Q1", 3.0, 5.0, true), question("Q2", 2.5, 2.5, false)];
        assert_eq!(item_breakdown(&questions), "Q1:3/5; Q2:2.5/2.5");
        assert_eq!(item_breakdown(&[]), "");
    }

    #[test]
    fn failed_submission_contributes_nothing() {
        let ok = SubmissionResult::succeeded(
            &submission("a", "text", ProcessingMode::Pipeline),
            vec![question("Q1", 3.0, 5.0, true), question("Q2", 5.0, 5.0, false)],
            Vec::new(),
            2,
        );
        let failed = SubmissionResult::failed(
            &submission("b", "text", ProcessingMode::Pipeline),
            String::from("extraction failed"),
            4,
        );

        let report = aggregate(run(), vec![ok, failed], Vec::new());

        assert_eq!(report.summary.len(), 2);
        assert_eq!(report.summary[0].total_score, 8.0);
        assert_eq!(report.summary[0].total_possible, 10.0);
        assert_eq!(report.summary[0].percentage, 80.0);
        assert_eq!(report.summary[0].flagged_count, 1);
        assert_eq!(report.summary[1].status, SubmissionStatus::Failed);
        assert_eq!(report.summary[1].total_score, 0.0);
        assert_eq!(report.summary[1].flagged_count, 0);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.submissions[1].failure_reason.as_deref(), Some("extraction failed"));
        assert_eq!(report.submissions[1].model_attempts, 4);
    }
}
