use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::schemas::report::{BatchReport, SubmissionReport, SummaryRow};

pub(crate) const SUMMARY_FILE: &str = "grades_summary.csv";
pub(crate) const REVIEW_QUEUE_FILE: &str = "review_queue.json";
pub(crate) const METRICS_FILE: &str = "metrics.prom";

const DIGEST_SUFFIX_LEN: usize = 8;

const SUMMARY_HEADER: &str =
    "submission_id,total_score,total_possible,percentage,flagged_count,status,item_breakdown";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WrittenArtifacts {
    pub(crate) reports: Vec<PathBuf>,
    pub(crate) summary: PathBuf,
    pub(crate) review_queue: PathBuf,
    pub(crate) metrics: Option<PathBuf>,
}

/// Where a finished batch is persisted.
#[async_trait]
pub(crate) trait ReportSink: Send + Sync {
    async fn write_batch(
        &self,
        report: &BatchReport,
        metrics: Option<String>,
    ) -> Result<WrittenArtifacts>;
}

#[derive(Debug, Clone)]
pub(crate) struct FilesystemSink {
    output_dir: PathBuf,
}

impl FilesystemSink {
    pub(crate) fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }

    pub(crate) fn report_path(&self, stem: &str) -> PathBuf {
        self.output_dir.join(format!("{stem}_report.json"))
    }

    /// One path per report, unique within the batch even when sanitized ids collide.
    pub(crate) fn report_paths(&self, submissions: &[SubmissionReport]) -> Vec<PathBuf> {
        let mut taken = HashSet::with_capacity(submissions.len());
        submissions
            .iter()
            .enumerate()
            .map(|(index, submission)| {
                let base = sanitized_filename(&submission.submission_id);
                let digest: String =
                    submission.source_sha256.chars().take(DIGEST_SUFFIX_LEN).collect();
                let candidates = [
                    base.clone(),
                    format!("{base}_{digest}"),
                    format!("{base}_{digest}_{index}"),
                ];
                let stem = candidates
                    .into_iter()
                    .find(|candidate| !taken.contains(candidate))
                    .unwrap_or_else(|| format!("{base}_{index}"));
                taken.insert(stem.clone());
                self.report_path(&stem)
            })
            .collect()
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let mut body = serde_json::to_vec_pretty(value)
            .with_context(|| format!("Failed to serialize {}", path.display()))?;
        body.push(b'\n');
        write_file(path, &body).await
    }
}

#[async_trait]
impl ReportSink for FilesystemSink {
    async fn write_batch(
        &self,
        report: &BatchReport,
        metrics: Option<String>,
    ) -> Result<WrittenArtifacts> {
        tokio::fs::create_dir_all(&self.output_dir).await.with_context(|| {
            format!("Failed to create output directory {}", self.output_dir.display())
        })?;

        let reports = self.report_paths(&report.submissions);
        for (submission, path) in report.submissions.iter().zip(&reports) {
            self.write_json(path, submission).await?;
        }

        let summary = self.output_dir.join(SUMMARY_FILE);
        write_file(&summary, render_summary_csv(&report.summary).as_bytes()).await?;

        let review_queue = self.output_dir.join(REVIEW_QUEUE_FILE);
        self.write_json(&review_queue, &report.review_document()).await?;

        let metrics = match metrics {
            Some(rendered) => {
                let path = self.output_dir.join(METRICS_FILE);
                write_file(&path, rendered.as_bytes()).await?;
                Some(path)
            }
            None => None,
        };

        tracing::info!(
            output_dir = %self.output_dir.display(),
            reports = reports.len(),
            flagged = report.review_queue.len(),
            "Batch artifacts written"
        );

        Ok(WrittenArtifacts { reports, summary, review_queue, metrics })
    }
}

async fn write_file(path: &Path, body: &[u8]) -> Result<()> {
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub(crate) fn render_summary_csv(rows: &[SummaryRow]) -> String {
    let mut out = String::from(SUMMARY_HEADER);
    out.push('\n');
    for row in rows {
        let fields = [
            csv_field(&row.submission_id),
            format!("{:.2}", row.total_score),
            format!("{:.2}", row.total_possible),
            format!("{:.2}", row.percentage),
            row.flagged_count.to_string(),
            row.status.as_str().to_string(),
            csv_field(&row.item_breakdown),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub(crate) fn sanitized_filename(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches('.');

    if cleaned.is_empty() {
        String::from("submission")
    } else {
        cleaned.to_string()
    }
}
