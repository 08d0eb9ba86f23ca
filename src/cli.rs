use std::path::PathBuf;

use crate::core::config::{parse_mode, ConfigError};
use crate::schemas::grading::ProcessingMode;

pub(crate) const USAGE: &str = "\
Usage: exam-grader [OPTIONS]

Options:
  --input-dir <DIR>            Directory with OCR text files (INPUT_DIR)
  --extension <EXT>            Input file extension (INPUT_EXTENSION)
  --answer-key <PATH>          Answer key JSON (ANSWER_KEY_PATH)
  --rubric <PATH>              Rubric text file (RUBRIC_PATH)
  --output-dir <DIR>           Where reports are written (OUTPUT_DIR)
  --model <NAME>               Model identifier (AI_MODEL)
  --mode <pipeline|single-shot>
                               Processing mode for the whole batch (GRADING_MODE)
  --confidence-threshold <N>   Flag grades below this confidence (CONFIDENCE_THRESHOLD)
  --concurrency <N>            Submissions graded at once (GRADING_CONCURRENCY)
  -h, --help                   Print this help
";

/// Flags that override the environment. `None` keeps the environment value.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CliOverrides {
    pub(crate) input_dir: Option<PathBuf>,
    pub(crate) input_extension: Option<String>,
    pub(crate) answer_key_path: Option<PathBuf>,
    pub(crate) rubric_path: Option<PathBuf>,
    pub(crate) output_dir: Option<PathBuf>,
    pub(crate) model: Option<String>,
    pub(crate) mode: Option<ProcessingMode>,
    pub(crate) confidence_threshold: Option<f64>,
    pub(crate) concurrency: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CliCommand {
    Run(CliOverrides),
    Help,
}

pub(crate) fn parse_args<I>(args: I) -> Result<CliCommand, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut overrides = CliOverrides::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, inline)) if flag.starts_with("--") => {
                (flag.to_string(), Some(inline.to_string()))
            }
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| ConfigError::InvalidArgument(format!("{name} missing value")))
        };

        match flag.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "--input-dir" => overrides.input_dir = Some(PathBuf::from(value("--input-dir")?)),
            "--extension" => overrides.input_extension = Some(value("--extension")?),
            "--answer-key" => {
                overrides.answer_key_path = Some(PathBuf::from(value("--answer-key")?));
            }
            "--rubric" => overrides.rubric_path = Some(PathBuf::from(value("--rubric")?)),
            "--output-dir" => overrides.output_dir = Some(PathBuf::from(value("--output-dir")?)),
            "--model" => overrides.model = Some(value("--model")?),
            "--mode" => overrides.mode = Some(parse_mode("--mode", value("--mode")?)?),
            "--confidence-threshold" => {
                let raw = value("--confidence-threshold")?;
                let parsed = raw.parse::<f64>().ok().filter(|threshold| threshold.is_finite());
                let parsed = parsed.ok_or(ConfigError::InvalidValue {
                    field: "--confidence-threshold",
                    value: raw,
                })?;
                overrides.confidence_threshold = Some(parsed);
            }
            "--concurrency" => {
                let raw = value("--concurrency")?;
                let parsed = raw
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue { field: "--concurrency", value: raw })?;
                overrides.concurrency = Some(parsed);
            }
            _ => return Err(ConfigError::InvalidArgument(format!("unknown argument: {flag}"))),
        }
    }

    Ok(CliCommand::Run(overrides))
}
