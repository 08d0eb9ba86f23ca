use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::core::config::ConfigError;

/// Reference data for one question. Unknown fields ride along in `extra` and are forwarded to
/// the grading request untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub(crate) struct AnswerKeyEntry {
    #[serde(alias = "referenceAnswer")]
    pub(crate) reference_answer: String,
    #[serde(alias = "maxPoints")]
    #[validate(range(exclusive_min = 0.0, message = "max_points must be positive"))]
    pub(crate) max_points: f64,
    #[serde(default)]
    #[serde(alias = "mustInclude")]
    pub(crate) must_include: Vec<String>,
    #[serde(flatten)]
    pub(crate) extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AnswerKey {
    entries: HashMap<String, AnswerKeyEntry>,
}

impl AnswerKey {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// Accepts `{"questions": {...}}` or a bare `{id: entry}` object.
    pub(crate) fn from_json_str(raw: &str, source: &str) -> Result<Self, ConfigError> {
        let malformed =
            |reason: String| ConfigError::MalformedAnswerKey { path: source.to_string(), reason };

        let root: Value = serde_json::from_str(raw).map_err(|err| malformed(err.to_string()))?;
        let Value::Object(mut root) = root else {
            return Err(malformed(String::from("top-level value must be an object")));
        };

        let questions = match root.remove("questions") {
            Some(Value::Object(questions)) => questions,
            Some(_) => return Err(malformed(String::from("'questions' must be an object"))),
            None => root,
        };

        let mut entries = HashMap::with_capacity(questions.len());
        for (question_id, value) in questions {
            let question_id = question_id.trim().to_string();
            if question_id.is_empty() {
                return Err(malformed(String::from("question id must not be empty")));
            }

            let entry: AnswerKeyEntry = serde_json::from_value(value)
                .map_err(|err| malformed(format!("{question_id}: {err}")))?;
            entry.validate().map_err(|err| malformed(format!("{question_id}: {err}")))?;
            if !entry.max_points.is_finite() {
                return Err(malformed(format!("{question_id}: max_points must be finite")));
            }
            if entry.must_include.iter().any(|item| item.trim().is_empty()) {
                return Err(malformed(format!(
                    "{question_id}: must_include entries must not be blank"
                )));
            }

            entries.insert(question_id, entry);
        }

        Ok(Self { entries })
    }

    pub(crate) fn get(&self, question_id: &str) -> Option<&AnswerKeyEntry> {
        self.entries.get(question_id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &AnswerKeyEntry)> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, question_id: &str, entry: AnswerKeyEntry) {
        self.entries.insert(question_id.to_string(), entry);
    }
}
