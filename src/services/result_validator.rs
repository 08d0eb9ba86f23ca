mod contracts;

use serde_json::{Map, Value};
use thiserror::Error;

pub(crate) use contracts::{ExpectedQuestion, ExtractionContract, GradingContract, SingleShotContract};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ViolationKind {
    Unparseable,
    MissingField,
    WrongType,
    OutOfRange,
    UnknownVerdict,
    Inconsistent,
    UnexpectedQuestion,
    DuplicateQuestion,
    MissingQuestion,
}

impl ViolationKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Unparseable => "unparseable",
            Self::MissingField => "missing_field",
            Self::WrongType => "wrong_type",
            Self::OutOfRange => "out_of_range",
            Self::UnknownVerdict => "unknown_verdict",
            Self::Inconsistent => "inconsistent",
            Self::UnexpectedQuestion => "unexpected_question",
            Self::DuplicateQuestion => "duplicate_question",
            Self::MissingQuestion => "missing_question",
        }
    }
}

/// Which field broke which constraint. Sent back to the model verbatim on re-invocation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {constraint}")]
pub(crate) struct ValidationError {
    pub(crate) kind: ViolationKind,
    pub(crate) field: String,
    pub(crate) constraint: String,
}

impl ValidationError {
    pub(crate) fn new(
        kind: ViolationKind,
        field: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self { kind, field: field.into(), constraint: constraint.into() }
    }
}

/// The shape a model response must take for one kind of request.
pub(crate) trait OutputContract: Send + Sync {
    type Parsed: Send;

    fn name(&self) -> &'static str;

    /// JSON schema offered to the upstream service as a response constraint.
    fn json_schema(&self) -> Value;

    fn check(&self, payload: &Map<String, Value>) -> Result<Self::Parsed, ValidationError>;

    /// Wire form of an accepted result. Checking it again yields the same value.
    #[cfg(test)]
    fn render(&self, parsed: &Self::Parsed) -> Value;
}

/// The only place raw model text becomes typed data.
pub(crate) fn validate<C>(raw: &str, contract: &C) -> Result<C::Parsed, ValidationError>
where
    C: OutputContract + ?Sized,
{
    let payload = parse_json_payload(raw)?;
    contract.check(&payload)
}

/// Extracts the JSON object from a model reply, tolerating Markdown fences and surrounding prose.
pub(crate) fn parse_json_payload(text: &str) -> Result<Map<String, Value>, ValidationError> {
    let not_object = || {
        ValidationError::new(ViolationKind::WrongType, "$", "top-level value must be an object")
    };

    match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(_) => return Err(not_object()),
        Err(_) => {}
    }

    let span = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(ValidationError::new(
                ViolationKind::Unparseable,
                "$",
                "response contains no JSON object",
            ))
        }
    };

    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(not_object()),
        Err(err) => Err(ValidationError::new(
            ViolationKind::Unparseable,
            "$",
            format!("invalid JSON: {err}"),
        )),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub(super) fn field_path(parent: &str, key: &str) -> String {
    format!("{parent}.{key}")
}

pub(super) fn require<'a>(
    object: &'a Map<String, Value>,
    parent: &str,
    key: &str,
) -> Result<&'a Value, ValidationError> {
    object.get(key).filter(|value| !value.is_null()).ok_or_else(|| {
        ValidationError::new(ViolationKind::MissingField, field_path(parent, key), "is required")
    })
}

pub(super) fn string_field(
    object: &Map<String, Value>,
    parent: &str,
    key: &str,
) -> Result<String, ValidationError> {
    match require(object, parent, key)? {
        Value::String(value) => Ok(value.trim().to_string()),
        _ => Err(ValidationError::new(
            ViolationKind::WrongType,
            field_path(parent, key),
            "must be a string",
        )),
    }
}

pub(super) fn non_empty_string_field(
    object: &Map<String, Value>,
    parent: &str,
    key: &str,
) -> Result<String, ValidationError> {
    let value = string_field(object, parent, key)?;
    if value.is_empty() {
        return Err(ValidationError::new(
            ViolationKind::OutOfRange,
            field_path(parent, key),
            "must not be empty",
        ));
    }
    Ok(value)
}

pub(super) fn optional_string_field(
    object: &Map<String, Value>,
    parent: &str,
    key: &str,
) -> Result<String, ValidationError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(value)) => Ok(value.trim().to_string()),
        Some(_) => Err(ValidationError::new(
            ViolationKind::WrongType,
            field_path(parent, key),
            "must be a string",
        )),
    }
}

pub(super) fn number_field(
    object: &Map<String, Value>,
    parent: &str,
    key: &str,
) -> Result<f64, ValidationError> {
    require(object, parent, key)?
        .as_f64()
        .filter(|value| value.is_finite())
        .ok_or_else(|| {
            ValidationError::new(
                ViolationKind::WrongType,
                field_path(parent, key),
                "must be a finite number",
            )
        })
}

pub(super) fn object_items<'a>(
    payload: &'a Map<String, Value>,
    key: &str,
) -> Result<Vec<(String, &'a Map<String, Value>)>, ValidationError> {
    let Value::Array(items) = require(payload, "$", key)? else {
        return Err(ValidationError::new(
            ViolationKind::WrongType,
            field_path("$", key),
            "must be an array",
        ));
    };
    if items.is_empty() {
        return Err(ValidationError::new(
            ViolationKind::OutOfRange,
            field_path("$", key),
            "must contain at least one question",
        ));
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let path = format!("{key}[{index}]");
            match item {
                Value::Object(object) => Ok((path, object)),
                _ => Err(ValidationError::new(ViolationKind::WrongType, path, "must be an object")),
            }
        })
        .collect()
}
