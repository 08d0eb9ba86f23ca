use serde_json::{json, Value};

use crate::schemas::grading::ExtractedItem;
use crate::services::marking::MarkingScheme;
use crate::services::result_validator::ExpectedQuestion;

pub(crate) const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are the extraction step of an exam-grading pipeline.
Your only job is to turn noisy OCR text from one answer sheet into question/answer records.

Rules:
1) Never grade or judge the answers.
2) Keep the student's wording. Fix only obvious OCR artifacts (broken words, swapped characters, stray symbols).
3) Find question boundaries whether they are numbered (1., Q1), lettered (a), (b)), dashed, or unlabeled.
   When there are no reliable markers, treat each prompt-like sentence as the start of a new question.
4) Leave out sheet metadata such as student name, date, class or section identifiers.
5) If part of the text is unreadable, keep your best reading and say so in transcription_notes.
6) When answer key question ids are listed, use those ids for the questions they match.
7) Reply with one JSON object only, no Markdown.

Reply shape:
{"items": [{"question_id": "string", "question_text": "string", "student_answer": "string", "transcription_notes": ["string"]}]}
"#;

pub(crate) const GRADING_SYSTEM_PROMPT: &str = r#"You are the grading step of a two-stage exam pipeline.
The answers were already extracted from the answer sheet.

Rules:
1) Grade only against the rubric and, where present, the answer key entry of each item.
2) Do not improve, reinterpret or fill in missing student content. Reward only what is written.
3) awarded_points must be between 0 and max_points. A correct answer earns exactly max_points,
   an incorrect one earns 0, a partially correct one earns strictly between.
4) When every must_include term is present the verdict cannot be "incorrect". Partial credit is
   still possible. suggested_partial_points is the recommended score for a partially correct answer.
5) verdict is one of "correct", "partially_correct", "incorrect".
6) confidence (0-100) is how certain you are of your verdict and score.
7) Keep feedback specific and short.
8) Grade every item exactly once. Reply with one JSON object only, no Markdown.

Reply shape:
{"items": [{"question_id": "string", "awarded_points": 0, "max_points": 0, "verdict": "string", "confidence": 0, "feedback": "string"}]}
"#;

const SINGLE_SHOT_SYSTEM_PROMPT: &str = r#"You are an exam grader working directly from the raw OCR text of one answer sheet.
In one pass, split the sheet into questions, clean the OCR noise from each answer, and grade it.

Rubric:
{rubric}

Answer key (may be empty; questions missing from it are graded on the rubric alone and are worth {rubric_only_max_points} points):
{answer_key}

Rules:
1) Fix only obvious OCR artifacts in student_answer; keep the student's wording.
2) Find question boundaries whether numbered, lettered, dashed or unlabeled. Use the answer key ids when they match.
3) Leave out sheet metadata such as student name, date or class identifiers.
4) Grade strictly with the rubric and the answer key. A correct answer earns exactly max_points, an
   incorrect one earns 0, a partially correct one earns strictly between. When every must_include
   term is present the verdict cannot be "incorrect".
5) verdict is one of "correct", "partially_correct", "incorrect"; confidence (0-100) is your certainty.
6) Reply with one JSON object only, no Markdown.

Reply shape:
{"questions": [{"question_id": "string", "student_answer": "string", "awarded_points": 0, "max_points": 0, "verdict": "string", "confidence": 0, "feedback": "string"}]}
"#;

pub(crate) fn extraction_user_prompt(
    submission_id: &str,
    raw_text: &str,
    key_question_ids: &[String],
) -> String {
    let key_ids = if key_question_ids.is_empty() {
        String::new()
    } else {
        format!(
            "Answer key question ids (use these ids when they match): {}\n",
            key_question_ids.join(", ")
        )
    };
    format!(
        "Clean and structure the OCR text below.\nexam_id: {submission_id}\n{key_ids}\n\
         Raw OCR text:\n{}\n",
        raw_text.trim()
    )
}

pub(crate) fn grading_user_prompt(
    submission_id: &str,
    rubric: &str,
    extracted: &[ExtractedItem],
    expected: &[ExpectedQuestion],
    marking: &MarkingScheme,
) -> String {
    let items: Vec<Value> = extracted
        .iter()
        .zip(expected)
        .map(|(item, expected)| {
            let guidance = &expected.guidance;
            json!({
                "question_id": item.question_id,
                "question_text": item.question_text,
                "student_answer": item.student_answer,
                "transcription_notes": item.transcription_notes,
                "max_points": guidance.max_points,
                "answer_key": marking.entry(&item.question_id),
                "required_terms_coverage": guidance.coverage,
                "suggested_partial_points": guidance.suggested_partial,
            })
        })
        .collect();

    format!(
        "exam_id: {submission_id}\n\nRubric:\n{}\n\nItems to grade (JSON):\n{}\n",
        rubric.trim(),
        serde_json::to_string_pretty(&items).unwrap_or_default()
    )
}

pub(crate) fn single_shot_system_prompt(rubric: &str, marking: &MarkingScheme) -> String {
    SINGLE_SHOT_SYSTEM_PROMPT
        .replace("{rubric}", rubric.trim())
        .replace("{rubric_only_max_points}", &marking.rubric_only_max_points().to_string())
        .replace(
            "{answer_key}",
            &serde_json::to_string_pretty(&marking.answer_key_json()).unwrap_or_default(),
        )
}

pub(crate) fn single_shot_user_prompt(submission_id: &str, raw_text: &str) -> String {
    format!("Exam ID: {submission_id}\n\nRaw OCR text:\n{raw_text}\n")
}
