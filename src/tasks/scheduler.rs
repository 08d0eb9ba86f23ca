use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::schemas::grading::{Submission, SubmissionResult};
use crate::schemas::report::ReviewQueueEntry;
use crate::tasks::pipeline::Orchestrator;

pub(crate) type CompletionHook = Arc<dyn Fn(&SubmissionResult) + Send + Sync>;

/// Every submission's result and the flagged questions, both in input order.
#[derive(Debug, Clone)]
pub(crate) struct BatchOutcome {
    pub(crate) results: Vec<SubmissionResult>,
    pub(crate) review_queue: Vec<ReviewQueueEntry>,
}

/// Grades the batch on at most `concurrency` workers. Results are collected as they complete and
/// put back into input order at the end.
pub(crate) async fn run_batch(
    orchestrator: Arc<Orchestrator>,
    submissions: &[Submission],
    concurrency: usize,
    on_complete: Option<CompletionHook>,
) -> BatchOutcome {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let completed: Arc<Mutex<Vec<(usize, SubmissionResult)>>> =
        Arc::new(Mutex::new(Vec::with_capacity(submissions.len())));
    let mut workers = JoinSet::new();

    tracing::info!(submissions = submissions.len(), concurrency, "Starting grading batch");

    for (index, submission) in submissions.iter().cloned().enumerate() {
        let permits = Arc::clone(&permits);
        let orchestrator = Arc::clone(&orchestrator);
        let completed = Arc::clone(&completed);
        let on_complete = on_complete.clone();

        workers.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::error!(submission_id = %submission.id, "Worker pool closed");
                return;
            };

            let processed = orchestrator.process(index, &submission).await;
            let path: Vec<&str> = processed.history.iter().map(|state| state.as_str()).collect();
            tracing::debug!(
                submission_id = %submission.id,
                states = %path.join(" > "),
                "Submission lifecycle finished"
            );
            let result = processed.result;
            completed.lock().await.push((index, result.clone()));
            if let Some(hook) = &on_complete {
                hook(&result);
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error = %err, "Grading worker join failed");
        }
    }

    let mut completed = std::mem::take(&mut *completed.lock().await);
    completed.sort_by_key(|(index, _)| *index);

    let mut finished = completed.into_iter().peekable();
    let results = submissions
        .iter()
        .enumerate()
        .map(|(index, submission)| match finished.next_if(|(done, _)| *done == index) {
            Some((_, result)) => result,
            None => SubmissionResult::failed(
                submission,
                String::from("grading worker stopped before finishing"),
                0,
            ),
        })
        .collect();

    BatchOutcome { results, review_queue: orchestrator.review_queue().drain_ordered() }
}
