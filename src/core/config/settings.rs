use std::path::PathBuf;

use super::parsing::{
    env_optional, env_or_default, normalize_extension, parse_bool, parse_environment, parse_f64,
    parse_mode, parse_u32, parse_u64, parse_usize,
};
use super::types::{
    AiSettings, ConfigError, GradingSettings, IoSettings, RetrySettings, RuntimeSettings,
    Settings, TelemetrySettings,
};
use crate::cli::CliOverrides;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("GRADER_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("GRADER_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let openai_api_key = env_or_default("OPENAI_API_KEY", "");
        let openai_base_url = env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let ai_model = env_or_default("AI_MODEL", "gpt-4o-mini");
        let ai_temperature = parse_f64("AI_TEMPERATURE", env_or_default("AI_TEMPERATURE", "0"))?;
        let ai_request_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "120"))?;
        let extraction_max_tokens = parse_u32(
            "AI_EXTRACTION_MAX_TOKENS",
            env_or_default("AI_EXTRACTION_MAX_TOKENS", "1800"),
        )?;
        let grading_max_tokens =
            parse_u32("AI_GRADING_MAX_TOKENS", env_or_default("AI_GRADING_MAX_TOKENS", "2200"))?;
        let single_shot_max_tokens = parse_u32(
            "AI_SINGLE_SHOT_MAX_TOKENS",
            env_or_default("AI_SINGLE_SHOT_MAX_TOKENS", "4000"),
        )?;

        let max_attempts =
            parse_u32("MODEL_MAX_ATTEMPTS", env_or_default("MODEL_MAX_ATTEMPTS", "4"))?;
        let backoff_base_ms =
            parse_u64("MODEL_BACKOFF_BASE_MS", env_or_default("MODEL_BACKOFF_BASE_MS", "500"))?;
        let backoff_max_ms =
            parse_u64("MODEL_BACKOFF_MAX_MS", env_or_default("MODEL_BACKOFF_MAX_MS", "8000"))?;
        let backoff_jitter = env_optional("MODEL_BACKOFF_JITTER")
            .map(|value| parse_bool(&value))
            .unwrap_or(true);
        let validation_max_retries =
            parse_u32("VALIDATION_MAX_RETRIES", env_or_default("VALIDATION_MAX_RETRIES", "2"))?;

        let mode = parse_mode("GRADING_MODE", env_or_default("GRADING_MODE", "pipeline"))?;
        let confidence_threshold =
            parse_f64("CONFIDENCE_THRESHOLD", env_or_default("CONFIDENCE_THRESHOLD", "80"))?;
        let rubric_only_max_points =
            parse_f64("RUBRIC_ONLY_MAX_POINTS", env_or_default("RUBRIC_ONLY_MAX_POINTS", "10"))?;
        let concurrency =
            parse_usize("GRADING_CONCURRENCY", env_or_default("GRADING_CONCURRENCY", "4"))?;

        let input_dir = PathBuf::from(env_or_default("INPUT_DIR", "input"));
        let input_extension = normalize_extension(&env_or_default("INPUT_EXTENSION", "txt"));
        let answer_key_path = env_optional("ANSWER_KEY_PATH").map(PathBuf::from);
        let rubric_path = PathBuf::from(env_or_default("RUBRIC_PATH", "config/rubric.txt"));
        let output_dir = PathBuf::from(env_or_default("OUTPUT_DIR", "output"));

        let log_level = env_or_default("GRADER_LOG_LEVEL", "info");
        let json = env_optional("GRADER_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            ai: AiSettings {
                openai_api_key,
                openai_base_url,
                ai_model,
                ai_temperature,
                ai_request_timeout,
                extraction_max_tokens,
                grading_max_tokens,
                single_shot_max_tokens,
            },
            retry: RetrySettings {
                max_attempts,
                backoff_base_ms,
                backoff_max_ms,
                backoff_jitter,
                validation_max_retries,
            },
            grading: GradingSettings {
                mode,
                confidence_threshold,
                rubric_only_max_points,
                concurrency,
            },
            io: IoSettings { input_dir, input_extension, answer_key_path, rubric_path, output_dir },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Command-line flags win over the environment. Re-validates afterwards.
    pub(crate) fn apply_overrides(mut self, overrides: CliOverrides) -> Result<Self, ConfigError> {
        if let Some(dir) = overrides.input_dir {
            self.io.input_dir = dir;
        }
        if let Some(extension) = overrides.input_extension {
            self.io.input_extension = normalize_extension(&extension);
        }
        if let Some(path) = overrides.answer_key_path {
            self.io.answer_key_path = Some(path);
        }
        if let Some(path) = overrides.rubric_path {
            self.io.rubric_path = path;
        }
        if let Some(dir) = overrides.output_dir {
            self.io.output_dir = dir;
        }
        if let Some(model) = overrides.model {
            self.ai.ai_model = model;
        }
        if let Some(mode) = overrides.mode {
            self.grading.mode = mode;
        }
        if let Some(threshold) = overrides.confidence_threshold {
            self.grading.confidence_threshold = threshold;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.grading.concurrency = concurrency;
        }

        self.validate()?;
        Ok(self)
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn retry(&self) -> &RetrySettings {
        &self.retry
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn io(&self) -> &IoSettings {
        &self.io
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.grading.confidence_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                field: "CONFIDENCE_THRESHOLD",
                value: threshold.to_string(),
            });
        }

        if self.grading.rubric_only_max_points <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "RUBRIC_ONLY_MAX_POINTS",
                value: self.grading.rubric_only_max_points.to_string(),
            });
        }

        if self.grading.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_CONCURRENCY",
                value: String::from("0"),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MODEL_MAX_ATTEMPTS",
                value: String::from("0"),
            });
        }

        if self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            return Err(ConfigError::InvalidValue {
                field: "MODEL_BACKOFF_MAX_MS",
                value: self.retry.backoff_max_ms.to_string(),
            });
        }

        if self.io.input_extension.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "INPUT_EXTENSION",
                value: String::from("<empty>"),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.ai.openai_api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_API_KEY"));
        }

        Ok(())
    }
}

#[cfg(test)]
impl Settings {
    pub(crate) fn for_tests() -> Self {
        use super::types::Environment;
        use crate::schemas::grading::ProcessingMode;

        Self {
            runtime: RuntimeSettings { environment: Environment::Test, strict_config: false },
            ai: AiSettings {
                openai_api_key: String::from("test-key"),
                openai_base_url: String::from("http://127.0.0.1:9"),
                ai_model: String::from("test-model"),
                ai_temperature: 0.0,
                ai_request_timeout: 5,
                extraction_max_tokens: 1800,
                grading_max_tokens: 2200,
                single_shot_max_tokens: 4000,
            },
            retry: RetrySettings {
                max_attempts: 3,
                backoff_base_ms: 10,
                backoff_max_ms: 100,
                backoff_jitter: true,
                validation_max_retries: 2,
            },
            grading: GradingSettings {
                mode: ProcessingMode::Pipeline,
                confidence_threshold: 80.0,
                rubric_only_max_points: 10.0,
                concurrency: 4,
            },
            io: IoSettings {
                input_dir: PathBuf::from("input"),
                input_extension: String::from("txt"),
                answer_key_path: None,
                rubric_path: PathBuf::from("rubric.txt"),
                output_dir: PathBuf::from("output"),
            },
            telemetry: TelemetrySettings {
                log_level: String::from("debug"),
                json: false,
                prometheus_enabled: false,
            },
        }
    }

    pub(crate) fn with_backoff_jitter(mut self, enabled: bool) -> Self {
        self.retry.backoff_jitter = enabled;
        self
    }

    pub(crate) fn with_openai_base_url(mut self, base_url: &str) -> Self {
        self.ai.openai_base_url = base_url.to_string();
        self
    }
}
