use std::sync::Arc;

use serde_json::{Map, Value};

use crate::schemas::answer_key::{AnswerKey, AnswerKeyEntry};

/// Granularity of suggested partial scores.
pub(crate) const SCORE_STEP: f64 = 0.25;

/// Tolerance for comparing model-reported scores against exact bounds.
pub(crate) const SCORE_EPSILON: f64 = 1e-6;

/// Fraction of required substrings present in `answer`, case-insensitively.
/// `None` when nothing is required.
pub(crate) fn coverage(answer: &str, must_include: &[String]) -> Option<f64> {
    if must_include.is_empty() {
        return None;
    }

    let haystack = answer.to_lowercase();
    let matched = must_include
        .iter()
        .filter(|needle| haystack.contains(&needle.trim().to_lowercase()))
        .count();

    Some(matched as f64 / must_include.len() as f64)
}

/// `max * coverage` rounded down to the score step, kept strictly inside `(0, max)`.
pub(crate) fn suggested_partial_score(max_points: f64, coverage: f64) -> f64 {
    let coverage = coverage.clamp(0.0, 1.0);
    let stepped = (max_points * coverage / SCORE_STEP).floor() * SCORE_STEP;

    if max_points <= 2.0 * SCORE_STEP {
        return max_points / 2.0;
    }

    stepped.clamp(SCORE_STEP, max_points - SCORE_STEP)
}

/// What the engine knows about one question before the model sees it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QuestionGuidance {
    pub(crate) max_points: f64,
    pub(crate) coverage: Option<f64>,
    /// Every required substring is present, so the verdict may not be `incorrect`.
    pub(crate) required_present: bool,
    pub(crate) suggested_partial: f64,
}

/// Answer key plus the rubric-only fallback. Decides max points and partial-credit hints.
#[derive(Debug, Clone)]
pub(crate) struct MarkingScheme {
    answer_key: Arc<AnswerKey>,
    rubric_only_max_points: f64,
}

impl MarkingScheme {
    pub(crate) fn new(answer_key: Arc<AnswerKey>, rubric_only_max_points: f64) -> Self {
        Self { answer_key, rubric_only_max_points }
    }

    pub(crate) fn entry(&self, question_id: &str) -> Option<&AnswerKeyEntry> {
        self.answer_key.get(question_id)
    }

    /// Key question ids, sorted.
    pub(crate) fn question_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.answer_key.iter().map(|(id, _)| id.clone()).collect();
        ids.sort();
        ids
    }

    pub(crate) fn rubric_only_max_points(&self) -> f64 {
        self.rubric_only_max_points
    }

    /// The whole key as a JSON object, ordered by question id.
    pub(crate) fn answer_key_json(&self) -> Value {
        let entries: Map<String, Value> = self
            .answer_key
            .iter()
            .map(|(question_id, entry)| {
                (question_id.clone(), serde_json::to_value(entry).unwrap_or(Value::Null))
            })
            .collect();
        Value::Object(entries)
    }

    pub(crate) fn max_points_for(&self, question_id: &str) -> f64 {
        self.entry(question_id).map_or(self.rubric_only_max_points, |entry| entry.max_points)
    }

    pub(crate) fn guidance(&self, question_id: &str, answer: &str) -> QuestionGuidance {
        let max_points = self.max_points_for(question_id);
        let coverage =
            self.entry(question_id).and_then(|entry| coverage(answer, &entry.must_include));

        QuestionGuidance {
            max_points,
            coverage,
            required_present: coverage.is_some_and(|value| value >= 1.0),
            suggested_partial: suggested_partial_score(max_points, coverage.unwrap_or(0.5)),
        }
    }
}
