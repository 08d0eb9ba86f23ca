use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::schemas::grading::ProcessingMode;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) ai: AiSettings,
    pub(super) retry: RetrySettings,
    pub(super) grading: GradingSettings,
    pub(super) io: IoSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct AiSettings {
    pub(crate) openai_api_key: String,
    pub(crate) openai_base_url: String,
    pub(crate) ai_model: String,
    pub(crate) ai_temperature: f64,
    pub(crate) ai_request_timeout: u64,
    pub(crate) extraction_max_tokens: u32,
    pub(crate) grading_max_tokens: u32,
    pub(crate) single_shot_max_tokens: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct RetrySettings {
    pub(crate) max_attempts: u32,
    pub(crate) backoff_base_ms: u64,
    pub(crate) backoff_max_ms: u64,
    /// Randomize half of every backoff wait. Off gives fixed, reproducible waits.
    pub(crate) backoff_jitter: bool,
    pub(crate) validation_max_retries: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct GradingSettings {
    pub(crate) mode: ProcessingMode,
    pub(crate) confidence_threshold: f64,
    pub(crate) rubric_only_max_points: f64,
    pub(crate) concurrency: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct IoSettings {
    pub(crate) input_dir: PathBuf,
    pub(crate) input_extension: String,
    pub(crate) answer_key_path: Option<PathBuf>,
    pub(crate) rubric_path: PathBuf,
    pub(crate) output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Configuration failures. Any of these aborts the batch before a submission is touched.
#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
    #[error("rubric is missing or empty: {0}")]
    MissingRubric(String),
    #[error("malformed answer key {path}: {reason}")]
    MalformedAnswerKey { path: String, reason: String },
    #[error("no input files matching *.{extension} in {dir}")]
    NoInputs { dir: String, extension: String },
    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl AiSettings {
    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_request_timeout)
    }
}

impl RetrySettings {
    pub(crate) fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub(crate) fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}
