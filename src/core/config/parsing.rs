use std::env;

use super::types::{ConfigError, Environment};
use crate::schemas::grading::ProcessingMode;

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_usize(field: &'static str, value: String) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_f64(field: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

pub(crate) fn parse_mode(field: &'static str, value: String) -> Result<ProcessingMode, ConfigError> {
    match value.to_ascii_lowercase().replace('_', "-").as_str() {
        "pipeline" | "two-stage" => Ok(ProcessingMode::Pipeline),
        "single-shot" | "singleshot" => Ok(ProcessingMode::SingleShot),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

pub(super) fn normalize_extension(value: &str) -> String {
    value.trim().trim_start_matches("*.").trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn parse_environment_variants() {
        assert_eq!(parse_environment(Some("prod".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("production".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("testing".to_string())), Environment::Test);
        assert_eq!(parse_environment(None), Environment::Development);
    }

    #[test]
    fn parse_mode_accepts_aliases() {
        assert_eq!(parse_mode("GRADING_MODE", "pipeline".into()).unwrap(), ProcessingMode::Pipeline);
        assert_eq!(
            parse_mode("GRADING_MODE", "single_shot".into()).unwrap(),
            ProcessingMode::SingleShot
        );
        assert_eq!(
            parse_mode("GRADING_MODE", "Single-Shot".into()).unwrap(),
            ProcessingMode::SingleShot
        );
        assert!(parse_mode("GRADING_MODE", "batch".into()).is_err());
    }

    #[test]
    fn parse_f64_rejects_non_finite() {
        assert!(parse_f64("CONFIDENCE_THRESHOLD", "NaN".into()).is_err());
        assert!(parse_f64("CONFIDENCE_THRESHOLD", "inf".into()).is_err());
        assert_eq!(parse_f64("CONFIDENCE_THRESHOLD", "79.5".into()).unwrap(), 79.5);
    }

    #[test]
    fn normalize_extension_strips_glob_prefix() {
        assert_eq!(normalize_extension("*.TXT"), "txt");
        assert_eq!(normalize_extension(".md"), "md");
        assert_eq!(normalize_extension("txt"), "txt");
    }
}
