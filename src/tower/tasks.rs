//! Polling remote tasks to a terminal status.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{ApiError, Result, TaskError};
use crate::retry::{retry, RetryOptions};

use super::api::ControlPlane;
use super::types::{Task, TaskFilter, TaskStatus};

/// Default delay between two task polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Mutation name the `updateVm` task is recorded under.
pub const UPDATE_VM_MUTATION: &str = "updateVm";

/// Polls an id may stay unreported before the wait gives up on it.
pub const DEFAULT_UNREPORTED_POLLS: u32 = 12;

/// Waits for asynchronous remote tasks.
///
/// The tracker never submits work itself. Each poll is one retried query; a
/// failed query is transient and retried, a `FAILED` task is terminal.
#[derive(Clone)]
pub struct TaskTracker {
    /// Control plane to query.
    api: Arc<dyn ControlPlane>,
    /// Delay before every poll.
    poll_interval: Duration,
    /// Retry policy for each poll.
    retry: RetryOptions,
    /// Consecutive polls an id may be missing from the results.
    unreported_polls: u32,
}

/// Outcome of a single poll.
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    Finished,
    Pending,
}

impl TaskTracker {
    /// Creates a tracker with the default poll interval and retry policy.
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlane>) -> Self {
        Self {
            api,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryOptions::default(),
            unreported_polls: DEFAULT_UNREPORTED_POLLS,
        }
    }

    /// Sets how many consecutive polls an id may go unreported.
    #[must_use]
    pub const fn with_unreported_polls(mut self, polls: u32) -> Self {
        self.unreported_polls = polls;
        self
    }

    /// Sets the delay between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the retry policy used for each poll.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the retry policy used for each poll.
    #[must_use]
    pub const fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }

    /// Waits until every task in `task_ids` succeeded.
    ///
    /// Returns immediately without querying when `task_ids` is empty. Ids
    /// the control plane does not report yet count as pending, for at most
    /// the configured number of consecutive polls.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Failed`] carrying the remote message as soon as
    /// any task fails, [`ApiError::NotFound`] naming the ids that stayed
    /// unreported, the retry error if a poll keeps failing, or the context
    /// error if `ctx` ends first.
    pub async fn wait_for_tasks(&self, ctx: &Context, task_ids: &[String]) -> Result<()> {
        if task_ids.is_empty() {
            return Ok(());
        }

        info!("Waiting for {} task(s)", task_ids.len());
        let filter = TaskFilter::IdIn(task_ids.to_vec());
        self.poll_until_finished(ctx, &filter, |tasks| {
            task_ids
                .iter()
                .filter(|id| !tasks.iter().any(|t| &t.id == *id))
                .cloned()
                .collect()
        })
        .await
    }

    /// Waits until the latest `mutation` task of `resource_id` succeeded.
    ///
    /// An empty result means there is nothing to wait for.
    ///
    /// # Errors
    ///
    /// Same as [`TaskTracker::wait_for_tasks`].
    pub async fn wait_for_resource_task(
        &self,
        ctx: &Context,
        resource_id: &str,
        mutation: &str,
    ) -> Result<()> {
        info!("Waiting for {mutation} task of {resource_id}");
        let filter = TaskFilter::LatestForResource {
            resource_id: resource_id.to_string(),
            mutation: mutation.to_string(),
        };
        self.poll_until_finished(ctx, &filter, |_| Vec::new()).await
    }

    async fn poll_until_finished<F>(
        &self,
        ctx: &Context,
        filter: &TaskFilter,
        unreported: F,
    ) -> Result<()>
    where
        F: Fn(&[Task]) -> Vec<String>,
    {
        let mut polls: u32 = 0;
        let mut missing: Vec<String> = Vec::new();
        let mut missing_polls: u32 = 0;
        loop {
            ctx.sleep(self.poll_interval).await?;
            polls += 1;

            let tasks = retry(ctx, &self.retry, || self.api.query_tasks(filter)).await?;
            let outcome = evaluate(&tasks)?;
            let now_missing = unreported(&tasks);
            if outcome == PollOutcome::Finished && now_missing.is_empty() {
                debug!("Tasks finished after {polls} poll(s)");
                return Ok(());
            }

            if now_missing.is_empty() || now_missing != missing {
                missing_polls = 0;
            }
            if !now_missing.is_empty() {
                missing_polls += 1;
                if missing_polls >= self.unreported_polls {
                    warn!(
                        "Task(s) {} never reported after {missing_polls} poll(s)",
                        now_missing.join(", ")
                    );
                    return Err(ApiError::NotFound {
                        kind: "task",
                        id: now_missing.join(", "),
                    }
                    .into());
                }
            }
            missing = now_missing;
            debug!(
                "Poll {polls}: {} task(s) still running, {} unreported",
                pending_count(&tasks),
                missing.len()
            );
        }
    }
}

impl std::fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTracker")
            .field("poll_interval", &self.poll_interval)
            .field("retry", &self.retry)
            .field("unreported_polls", &self.unreported_polls)
            .finish_non_exhaustive()
    }
}

/// Classifies one poll result; the first failed task ends the wait.
fn evaluate(tasks: &[Task]) -> Result<PollOutcome> {
    if let Some(failed) = tasks.iter().find(|t| t.status == TaskStatus::Failed) {
        return Err(TaskError::Failed {
            task_id: failed.id.clone(),
            message: failed.error_message.clone().unwrap_or_default(),
        }
        .into());
    }
    if tasks.iter().all(|t| t.status == TaskStatus::Succeeded) {
        Ok(PollOutcome::Finished)
    } else {
        Ok(PollOutcome::Pending)
    }
}

fn pending_count(tasks: &[Task]) -> usize {
    tasks.iter().filter(|t| !t.status.is_terminal()).count()
}
