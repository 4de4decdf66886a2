//! Bounded fan-out of labelled async tasks with per-task deadlines.
//!
//! Every spawned task waits for a permit from the group's semaphore, runs under an optional
//! timeout and has its panics captured. Joining always yields one outcome per task, so a caller
//! can use [`TaskGroup::join_all`] as a barrier that tolerates individual failures.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::TASK_FAILURES;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task aborted")]
    Aborted,
}

#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub label: String,
    pub result: Result<T, TaskError>,
}

pub struct TaskGroup<T> {
    name: String,
    set: JoinSet<TaskOutcome<T>>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// `max_concurrent` is clamped to at least one running task.
    pub fn new(name: impl Into<String>, max_concurrent: usize, timeout: Option<Duration>) -> Self {
        Self { name: name.into(), set: JoinSet::new(), permits: Arc::new(Semaphore::new(max_concurrent.max(1))), timeout }
    }

    /// Queue `fut`. It starts once a permit is free; if it exceeds the group timeout it is dropped
    /// (running its destructors) and reported as [`TaskError::TimedOut`].
    pub fn spawn<F, E>(&mut self, label: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let label = label.into();
        let permits = self.permits.clone();
        let timeout = self.timeout;
        self.set.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return TaskOutcome { label, result: Err(TaskError::Aborted) };
            };
            debug!(task=%label, "task_started");
            let guarded = AssertUnwindSafe(fut).catch_unwind();
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(res) => settle(res),
                    Err(_) => Err(TaskError::TimedOut(limit)),
                },
                None => settle(guarded.await),
            };
            TaskOutcome { label, result }
        });
    }

    /// Wait for every task. Outcomes come back in completion order.
    pub async fn join_all(mut self) -> TaskReport<T> {
        let mut outcomes = Vec::with_capacity(self.set.len());
        while let Some(joined) = self.set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => TaskOutcome { label: String::from("<unknown>"), result: Err(TaskError::Panicked(e.to_string())) },
                Err(_) => TaskOutcome { label: String::from("<unknown>"), result: Err(TaskError::Aborted) },
            };
            if let Err(e) = &outcome.result {
                TASK_FAILURES.add(1, &[]);
                warn!(group=%self.name, task=%outcome.label, error=%e, "task_failed");
            }
            outcomes.push(outcome);
        }
        let report = TaskReport { group: self.name, outcomes };
        info!(group=%report.group, ok=report.successes().count(), failed=report.failures().count(), "task_group_joined");
        report
    }
}

fn settle<T, E: Display>(res: Result<Result<T, E>, Box<dyn Any + Send>>) -> Result<T, TaskError> {
    match res {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(TaskError::Failed(e.to_string())),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() { s.to_string() }
    else if let Some(s) = payload.downcast_ref::<String>() { s.clone() }
    else { String::from("non-string panic payload") }
}

#[derive(Debug)]
pub struct TaskReport<T> {
    pub group: String,
    pub outcomes: Vec<TaskOutcome<T>>,
}

impl<T> TaskReport<T> {
    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok().map(|v| (o.label.as_str(), v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &TaskError)> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err().map(|e| (o.label.as_str(), e)))
    }
}
