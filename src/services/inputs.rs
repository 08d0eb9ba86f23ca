use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::config::ConfigError;
use crate::schemas::answer_key::AnswerKey;
use crate::schemas::grading::{ProcessingMode, Submission};

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn unreadable(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Unreadable { path: path.display().to_string(), source }
}

/// The rubric is mandatory and must contain some text.
pub(crate) async fn load_rubric(path: &Path) -> Result<String, ConfigError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingRubric(path.display().to_string()))
        }
        Err(err) => return Err(unreadable(path, err)),
    };

    let rubric = raw.trim();
    if rubric.is_empty() {
        return Err(ConfigError::MissingRubric(path.display().to_string()));
    }
    Ok(rubric.to_string())
}

/// No path means rubric-only grading for every question.
pub(crate) async fn load_answer_key(path: Option<&Path>) -> Result<AnswerKey, ConfigError> {
    let Some(path) = path else {
        return Ok(AnswerKey::empty());
    };

    let raw = tokio::fs::read_to_string(path).await.map_err(|err| unreadable(path, err))?;
    AnswerKey::from_json_str(&raw, &path.display().to_string())
}

/// Files directly inside `dir` with the given extension, sorted by path. The file stem is the
/// submission id.
pub(crate) async fn discover_submissions(
    dir: &Path,
    extension: &str,
    mode: ProcessingMode,
) -> Result<Vec<Submission>, ConfigError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|err| unreadable(dir, err))?;

    let mut paths: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|err| unreadable(dir, err))? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|value| value.to_str())
            .is_some_and(|value| value.eq_ignore_ascii_case(extension));
        if matches && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Err(ConfigError::NoInputs {
            dir: dir.display().to_string(),
            extension: extension.to_string(),
        });
    }

    let mut submissions = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path).await.map_err(|err| unreadable(&path, err))?;
        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        submissions.push(Submission {
            id,
            raw_text: String::from_utf8_lossy(&bytes).into_owned(),
            mode,
            source_sha256: sha256_hex(&bytes),
        });
    }

    tracing::info!(dir = %dir.display(), count = submissions.len(), "Discovered submissions");
    Ok(submissions)
}
