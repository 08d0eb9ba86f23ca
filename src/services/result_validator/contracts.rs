use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};

use super::{
    field_path, non_empty_string_field, number_field, object_items, optional_string_field,
    require, string_field, OutputContract, ValidationError, ViolationKind,
};
use crate::schemas::grading::{ExtractedItem, GradedQuestion, Verdict};
use crate::services::marking::{MarkingScheme, QuestionGuidance, SCORE_EPSILON};

/// Segmented, denoised answers for a whole submission.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ExtractionContract;

impl OutputContract for ExtractionContract {
    type Parsed = Vec<ExtractedItem>;

    fn name(&self) -> &'static str {
        "exam_extraction"
    }

    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "question_id": {"type": "string"},
                            "question_text": {"type": "string"},
                            "student_answer": {"type": "string"},
                            "transcription_notes": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["question_id", "question_text", "student_answer", "transcription_notes"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["items"],
            "additionalProperties": false
        })
    }

    fn check(&self, payload: &Map<String, Value>) -> Result<Self::Parsed, ValidationError> {
        let mut seen = HashSet::new();
        let mut extracted = Vec::new();

        for (path, item) in object_items(payload, "items")? {
            let question_id = non_empty_string_field(item, &path, "question_id")?;
            if !seen.insert(question_id.clone()) {
                return Err(ValidationError::new(
                    ViolationKind::DuplicateQuestion,
                    field_path(&path, "question_id"),
                    format!("question '{question_id}' appears more than once"),
                ));
            }

            extracted.push(ExtractedItem {
                question_id,
                question_text: optional_string_field(item, &path, "question_text")?,
                student_answer: string_field(item, &path, "student_answer")?,
                transcription_notes: string_list(item, &path, "transcription_notes")?,
            });
        }

        Ok(extracted)
    }

    #[cfg(test)]
    fn render(&self, parsed: &Self::Parsed) -> Value {
        json!({ "items": parsed })
    }
}

/// A question the grading call must answer for, in extraction order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExpectedQuestion {
    pub(crate) question_id: String,
    pub(crate) answer_text: String,
    pub(crate) guidance: QuestionGuidance,
}

/// Grades for exactly the extracted questions, no more and no fewer.
#[derive(Debug, Clone)]
pub(crate) struct GradingContract {
    expected: Vec<ExpectedQuestion>,
}

impl GradingContract {
    pub(crate) fn new(expected: Vec<ExpectedQuestion>) -> Self {
        Self { expected }
    }

    pub(crate) fn expected(&self) -> &[ExpectedQuestion] {
        &self.expected
    }
}

impl OutputContract for GradingContract {
    type Parsed = Vec<GradedQuestion>;

    fn name(&self) -> &'static str {
        "exam_grading"
    }

    fn json_schema(&self) -> Value {
        grade_list_schema("items", &[])
    }

    fn check(&self, payload: &Map<String, Value>) -> Result<Self::Parsed, ValidationError> {
        let mut graded: HashMap<String, GradedQuestion> = HashMap::new();

        for (path, item) in object_items(payload, "items")? {
            let question_id = non_empty_string_field(item, &path, "question_id")?;
            let Some(expected) =
                self.expected.iter().find(|expected| expected.question_id == question_id)
            else {
                return Err(ValidationError::new(
                    ViolationKind::UnexpectedQuestion,
                    field_path(&path, "question_id"),
                    format!("question '{question_id}' was not submitted for grading"),
                ));
            };
            if graded.contains_key(&question_id) {
                return Err(ValidationError::new(
                    ViolationKind::DuplicateQuestion,
                    field_path(&path, "question_id"),
                    format!("question '{question_id}' appears more than once"),
                ));
            }

            let question =
                check_grade(item, &path, question_id, expected.answer_text.clone(), &expected.guidance)?;
            graded.insert(question.question_id.clone(), question);
        }

        self.expected
            .iter()
            .map(|expected| {
                graded.remove(&expected.question_id).ok_or_else(|| {
                    ValidationError::new(
                        ViolationKind::MissingQuestion,
                        "$.items",
                        format!("no grade for question '{}'", expected.question_id),
                    )
                })
            })
            .collect()
    }

    #[cfg(test)]
    fn render(&self, parsed: &Self::Parsed) -> Value {
        let items: Vec<Value> = parsed.iter().map(|question| render_grade(question, None)).collect();
        json!({ "items": items })
    }
}

/// Segmentation and grading in one reply. Points and floors come from the marking scheme.
#[derive(Debug, Clone)]
pub(crate) struct SingleShotContract {
    marking: MarkingScheme,
}

impl SingleShotContract {
    pub(crate) fn new(marking: MarkingScheme) -> Self {
        Self { marking }
    }
}

impl OutputContract for SingleShotContract {
    type Parsed = Vec<GradedQuestion>;

    fn name(&self) -> &'static str {
        "exam_single_shot"
    }

    fn json_schema(&self) -> Value {
        grade_list_schema("questions", &["student_answer"])
    }

    fn check(&self, payload: &Map<String, Value>) -> Result<Self::Parsed, ValidationError> {
        let mut seen = HashSet::new();
        let mut graded = Vec::new();

        for (path, item) in object_items(payload, "questions")? {
            let question_id = non_empty_string_field(item, &path, "question_id")?;
            if !seen.insert(question_id.clone()) {
                return Err(ValidationError::new(
                    ViolationKind::DuplicateQuestion,
                    field_path(&path, "question_id"),
                    format!("question '{question_id}' appears more than once"),
                ));
            }

            let answer_text = string_field(item, &path, "student_answer")?;
            let guidance = self.marking.guidance(&question_id, &answer_text);
            graded.push(check_grade(item, &path, question_id, answer_text, &guidance)?);
        }

        Ok(graded)
    }

    #[cfg(test)]
    fn render(&self, parsed: &Self::Parsed) -> Value {
        let questions: Vec<Value> = parsed
            .iter()
            .map(|question| render_grade(question, Some(&question.answer_text)))
            .collect();
        json!({ "questions": questions })
    }
}

fn check_grade(
    item: &Map<String, Value>,
    path: &str,
    question_id: String,
    answer_text: String,
    guidance: &QuestionGuidance,
) -> Result<GradedQuestion, ValidationError> {
    let max_points = guidance.max_points;

    let score = number_field(item, path, "awarded_points")?;
    if score < -SCORE_EPSILON || score > max_points + SCORE_EPSILON {
        return Err(ValidationError::new(
            ViolationKind::OutOfRange,
            field_path(path, "awarded_points"),
            format!("must be between 0 and {max_points}, got {score}"),
        ));
    }

    let verdict_field = field_path(path, "verdict");
    let verdict = match require(item, path, "verdict")? {
        Value::String(raw) => Verdict::parse(raw).ok_or_else(|| {
            ValidationError::new(
                ViolationKind::UnknownVerdict,
                &verdict_field,
                format!("'{raw}' is not one of correct, partially_correct, incorrect"),
            )
        })?,
        _ => {
            return Err(ValidationError::new(
                ViolationKind::WrongType,
                verdict_field,
                "must be a string",
            ))
        }
    };

    let confidence = number_field(item, path, "confidence")?;
    if !(0.0..=100.0).contains(&confidence) {
        return Err(ValidationError::new(
            ViolationKind::OutOfRange,
            field_path(path, "confidence"),
            format!("must be between 0 and 100, got {confidence}"),
        ));
    }

    let feedback = string_field(item, path, "feedback")?;

    let score = match verdict {
        Verdict::Correct if (score - max_points).abs() <= SCORE_EPSILON => max_points,
        Verdict::Incorrect if score.abs() <= SCORE_EPSILON => 0.0,
        Verdict::PartiallyCorrect
            if score > SCORE_EPSILON && score < max_points - SCORE_EPSILON =>
        {
            score
        }
        _ => {
            return Err(ValidationError::new(
                ViolationKind::Inconsistent,
                field_path(path, "awarded_points"),
                format!(
                    "score {score} does not match verdict {} (correct awards {max_points}, \
                     incorrect awards 0, partially_correct awards strictly between)",
                    verdict.as_str()
                ),
            ))
        }
    };

    if guidance.required_present && verdict == Verdict::Incorrect {
        return Err(ValidationError::new(
            ViolationKind::Inconsistent,
            verdict_field,
            "every required term is present, so the verdict cannot be incorrect",
        ));
    }

    Ok(GradedQuestion { question_id, answer_text, score, max_points, verdict, confidence, feedback })
}

#[cfg(test)]
fn render_grade(question: &GradedQuestion, student_answer: Option<&str>) -> Value {
    let mut item = json!({
        "question_id": question.question_id,
        "awarded_points": question.score,
        "max_points": question.max_points,
        "verdict": question.verdict,
        "confidence": question.confidence,
        "feedback": question.feedback,
    });
    if let (Some(answer), Value::Object(object)) = (student_answer, &mut item) {
        object.insert(String::from("student_answer"), Value::String(answer.to_string()));
    }
    item
}

fn grade_list_schema(list_key: &str, extra_fields: &[&str]) -> Value {
    let mut properties = json!({
        "question_id": {"type": "string"},
        "awarded_points": {"type": "number"},
        "max_points": {"type": "number"},
        "verdict": {"type": "string", "enum": Verdict::ALL.map(Verdict::as_str)},
        "confidence": {"type": "number", "minimum": 0, "maximum": 100},
        "feedback": {"type": "string"}
    });
    let mut required: Vec<&str> =
        vec!["question_id", "awarded_points", "max_points", "verdict", "confidence", "feedback"];

    if let Value::Object(properties) = &mut properties {
        for field in extra_fields {
            properties.insert((*field).to_string(), json!({"type": "string"}));
            required.push(*field);
        }
    }

    json!({
        "type": "object",
        "properties": {
            list_key: {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false
                }
            }
        },
        "required": [list_key],
        "additionalProperties": false
    })
}

fn string_list(
    object: &Map<String, Value>,
    parent: &str,
    key: &str,
) -> Result<Vec<String>, ValidationError> {
    let wrong_type = || {
        ValidationError::new(
            ViolationKind::WrongType,
            field_path(parent, key),
            "must be an array of strings",
        )
    };

    match object.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| value.as_str().map(|note| note.trim().to_string()).ok_or_else(wrong_type))
            .collect(),
        Some(_) => Err(wrong_type()),
    }
}
