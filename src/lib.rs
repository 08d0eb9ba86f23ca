pub(crate) mod cli;
pub(crate) mod core;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::cli::CliCommand;
use crate::core::{config::Settings, telemetry};
use crate::schemas::grading::{SubmissionResult, SubmissionStatus};
use crate::schemas::report::RunMetadata;
use crate::services::marking::MarkingScheme;
use crate::services::model_client::{ModelClient, OpenAiTransport};
use crate::services::retry::{RetryPolicy, TokioSleeper};
use crate::services::review_router::ReviewRouter;
use crate::services::storage::{FilesystemSink, ReportSink};
use crate::services::{inputs, report_aggregator};
use crate::tasks::pipeline::Orchestrator;
use crate::tasks::scheduler::{self, CompletionHook};
use crate::tasks::strategy::build_strategy;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let overrides = match cli::parse_args(std::env::args().skip(1))? {
        CliCommand::Help => {
            print!("{}", cli::USAGE);
            return Ok(());
        }
        CliCommand::Run(overrides) => overrides,
    };

    let settings = Settings::load()?.apply_overrides(overrides)?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    if settings.ai().openai_api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY is empty; model calls will be rejected upstream");
    }

    let io = settings.io();
    let rubric = inputs::load_rubric(&io.rubric_path).await?;
    let answer_key = inputs::load_answer_key(io.answer_key_path.as_deref()).await?;
    let submissions =
        inputs::discover_submissions(&io.input_dir, &io.input_extension, settings.grading().mode)
            .await?;

    if answer_key.is_empty() {
        tracing::warn!("No answer key entries; every question is graded on the rubric alone");
    }

    tracing::info!(
        submissions = submissions.len(),
        answer_key_entries = answer_key.len(),
        mode = settings.grading().mode.as_str(),
        model = %settings.ai().ai_model,
        environment = settings.runtime().environment.as_str(),
        "Loaded grading inputs"
    );

    let client = ModelClient::new(
        Arc::new(OpenAiTransport::from_settings(&settings)?),
        RetryPolicy::from_settings(&settings),
        Arc::new(TokioSleeper),
    );
    let marking =
        MarkingScheme::new(Arc::new(answer_key), settings.grading().rubric_only_max_points);
    let strategy =
        build_strategy(settings.grading().mode, client, marking, Arc::from(rubric), &settings);
    let orchestrator = Arc::new(Orchestrator::new(
        strategy,
        ReviewRouter::new(settings.grading().confidence_threshold),
    ));

    let progress: CompletionHook = Arc::new(print_progress);
    let outcome = scheduler::run_batch(
        orchestrator,
        &submissions,
        settings.grading().concurrency,
        Some(progress),
    )
    .await;

    let run = RunMetadata {
        run_id: uuid::Uuid::new_v4().to_string(),
        generated_at: core::time::format_offset(core::time::now_utc()),
        model: settings.ai().ai_model.clone(),
        mode: settings.grading().mode,
        confidence_threshold: settings.grading().confidence_threshold,
    };
    let report = report_aggregator::aggregate(run, outcome.results, outcome.review_queue);

    let sink = FilesystemSink::new(&io.output_dir);
    let written = sink.write_batch(&report, core::metrics::render()).await?;

    tracing::info!(
        run_id = %report.run.run_id,
        submissions = report.summary.len(),
        failed = report.failed_count(),
        flagged = report.review_queue.len(),
        output_dir = %io.output_dir.display(),
        "Grading batch finished"
    );

    println!(
        "[DONE] {} submissions graded, {} failed. Summary: {}",
        report.summary.len(),
        report.failed_count(),
        written.summary.display()
    );
    println!(
        "[REVIEW] {} flagged questions queued for review: {}",
        report.review_queue.len(),
        written.review_queue.display()
    );

    Ok(())
}

fn print_progress(result: &SubmissionResult) {
    match result.status {
        SubmissionStatus::Succeeded => println!(
            "[OK] {}: {}/{} ({:.1}%) flagged {}",
            result.submission_id,
            result.total_score,
            result.total_possible,
            result.percentage,
            result.flagged_count()
        ),
        SubmissionStatus::Failed => println!(
            "[FAILED] {}: {}",
            result.submission_id,
            result.failure_reason.as_deref().unwrap_or("unknown error")
        ),
    }
}
