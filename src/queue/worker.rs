//! Queue worker runtime
//!
//! Polls a [`JobQueue`], runs claimed tasks through a [`TaskHandler`] with bounded concurrency
//! and a per-task timeout, and reports outcomes back to the ledger before invoking the
//! handler's completion callbacks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{FailOutcome, JobQueue, QueueError};
use crate::config::QueueConfig;
use crate::models::queue_task::Model as QueueTask;

/// Failure reported by a task handler
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
pub enum TaskError {
    /// Worth retrying, optionally not before `retry_after` seconds
    #[error("{message}")]
    Transient {
        message: String,
        retry_after: Option<u64>,
    },

    /// Retrying cannot help
    #[error("{message}")]
    Permanent { message: String },
}

impl TaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        TaskError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        TaskError::Permanent {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TaskError::Transient { message, .. } | TaskError::Permanent { message } => message,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            TaskError::Transient { retry_after, .. } => *retry_after,
            TaskError::Permanent { .. } => None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, TaskError::Permanent { .. })
    }
}

/// Work performed for each claimed task
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: &QueueTask) -> Result<JsonValue, TaskError>;

    /// Called once the ledger records success
    async fn on_completed(&self, _task: &QueueTask, _output: &JsonValue) {}

    /// Called once the task has no attempts left
    async fn on_failed(&self, _task: &QueueTask, _error: &TaskError) {}
}

#[derive(Clone)]
pub struct QueueWorker {
    queue: JobQueue,
    handler: Arc<dyn TaskHandler>,
    config: QueueConfig,
}

impl QueueWorker {
    pub fn new(queue: JobQueue, handler: Arc<dyn TaskHandler>, config: QueueConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Poll until the shutdown token fires
    #[instrument(skip_all, fields(queue = %self.queue.name()))]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting queue worker with config: {:?}", self.config);
        let tick = Duration::from_millis(self.config.tick_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Queue worker shutdown requested");
                    break;
                }
                _ = sleep(tick) => {
                    match self.run_once().await {
                        Ok(count) if count > 0 => debug!("Executed {} tasks", count),
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "Queue worker tick failed"),
                    }
                }
            }
        }

        info!("Queue worker stopped");
    }

    /// Claim one round of due tasks and run them to completion
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let tasks = self.queue.claim(self.config.claim_batch).await?;
        let count = tasks.len();
        if count == 0 {
            return Ok(0);
        }

        gauge!("queue_active", "queue" => self.queue.name().to_string()).set(count as f64);

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(count);
        for task in tasks {
            let worker = self.clone();
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                worker.run_task(task).await;
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Queue task panicked");
            }
        }

        gauge!("queue_active", "queue" => self.queue.name().to_string()).set(0.0);
        if let Ok(stats) = self.queue.stats().await {
            gauge!("queue_waiting", "queue" => self.queue.name().to_string())
                .set(stats.waiting as f64);
        }

        Ok(count)
    }

    /// Keep running rounds until nothing is immediately claimable
    pub async fn drain(&self) -> Result<usize, QueueError> {
        let mut total = 0;
        loop {
            let ran = self.run_once().await?;
            if ran == 0 {
                return Ok(total);
            }
            total += ran;
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, attempt = task.attempts))]
    async fn run_task(&self, task: QueueTask) {
        let queue_label = self.queue.name().to_string();
        let limit = Duration::from_secs(self.config.max_run_seconds);

        let result = match tokio::time::timeout(limit, self.handler.handle(&task)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::transient(format!(
                "task exceeded {} seconds",
                self.config.max_run_seconds
            ))),
        };

        match result {
            Ok(output) => match self.queue.complete(&task, output.clone()).await {
                Ok(true) => {
                    counter!("queue_tasks_total", "queue" => queue_label, "outcome" => "succeeded")
                        .increment(1);
                    self.handler.on_completed(&task, &output).await;
                }
                Ok(false) => warn!("Lease lost before completion was recorded"),
                Err(err) => error!(error = %err, "Failed to record task completion"),
            },
            Err(task_error) => match self.queue.fail(&task, &task_error).await {
                Ok(FailOutcome::Exhausted) => {
                    counter!("queue_tasks_total", "queue" => queue_label, "outcome" => "failed")
                        .increment(1);
                    self.handler.on_failed(&task, &task_error).await;
                }
                Ok(FailOutcome::Retrying { .. }) => {
                    counter!("queue_tasks_total", "queue" => queue_label, "outcome" => "retried")
                        .increment(1);
                }
                Ok(FailOutcome::LeaseLost) => warn!("Lease lost before failure was recorded"),
                Err(err) => error!(error = %err, "Failed to record task failure"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_accessors() {
        let transient = TaskError::Transient {
            message: "rate limited".to_string(),
            retry_after: Some(30),
        };
        assert_eq!(transient.message(), "rate limited");
        assert_eq!(transient.retry_after(), Some(30));
        assert!(!transient.is_permanent());

        let permanent = TaskError::permanent("bad payload");
        assert!(permanent.is_permanent());
        assert_eq!(permanent.retry_after(), None);
        assert_eq!(permanent.to_string(), "bad payload");
    }
}
