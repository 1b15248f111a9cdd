//! # Job Queue
//!
//! A database-backed, at-least-once task queue. Tasks are claimed by stamping a fresh lease id
//! onto queued rows in one conditional UPDATE, so several workers (or processes) can poll the
//! same queue without handing a task out twice. Failed tasks are requeued with exponential
//! backoff until they exhaust their attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rand::{Rng, thread_rng};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::RetryPolicyConfig;
use crate::models::queue_task::{self, ActiveModel, Column, Entity, Model, TaskStatus};

pub mod worker;

pub use worker::{QueueWorker, TaskError, TaskHandler};

/// Queue carrying catalog batch tasks
pub const BATCH_QUEUE: &str = "catalog-batches";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] DbErr),

    #[error("Invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Handle returned by [`JobQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub paused: bool,
}

/// Result of reporting a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Requeued; claimable again after `retry_after`
    Retrying { retry_after: DateTime<Utc> },
    /// No attempts left, or the error was permanent
    Exhausted,
    /// The lease was lost (task recovered or cancelled meanwhile)
    LeaseLost,
}

#[derive(Clone)]
pub struct JobQueue {
    db: DatabaseConnection,
    name: Arc<str>,
    paused: Arc<AtomicBool>,
    max_attempts: i32,
    retry_policy: RetryPolicyConfig,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name)
            .field("paused", &self.is_paused())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl JobQueue {
    pub fn new(
        db: DatabaseConnection,
        name: &str,
        max_attempts: u32,
        retry_policy: RetryPolicyConfig,
    ) -> Self {
        Self {
            db,
            name: Arc::from(name),
            paused: Arc::new(AtomicBool::new(false)),
            max_attempts: max_attempts.max(1) as i32,
            retry_policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn enqueue<P: Serialize>(
        &self,
        payload: &P,
        correlation_id: Option<Uuid>,
    ) -> Result<TaskHandle, QueueError> {
        self.enqueue_with_id(Uuid::new_v4(), payload, correlation_id)
            .await
    }

    /// Enqueue under a caller-chosen id, so bookkeeping keyed on the id can be written first
    pub async fn enqueue_with_id<P: Serialize>(
        &self,
        id: Uuid,
        payload: &P,
        correlation_id: Option<Uuid>,
    ) -> Result<TaskHandle, QueueError> {
        let now = Utc::now().fixed_offset();
        let task = ActiveModel {
            id: Set(id),
            queue: Set(self.name.to_string()),
            correlation_id: Set(correlation_id),
            payload: Set(serde_json::to_value(payload)?),
            status: Set(TaskStatus::Queued),
            priority: Set(0),
            attempts: Set(0),
            max_attempts: Set(self.max_attempts),
            scheduled_at: Set(now),
            retry_after: Set(None),
            started_at: Set(None),
            finished_at: Set(None),
            lease_id: Set(None),
            output: Set(None),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        task.insert(&self.db).await?;

        counter!("queue_tasks_total", "queue" => self.name.to_string(), "outcome" => "enqueued")
            .increment(1);
        debug!(queue = %self.name, task_id = %id, "Task enqueued");
        Ok(TaskHandle { id })
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Model>, QueueError> {
        Ok(Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn count_status(&self, status: TaskStatus) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::Queue.eq(self.name.as_ref()))
            .filter(Column::Status.eq(status))
            .count(&self.db)
            .await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            waiting: self.count_status(TaskStatus::Queued).await?,
            active: self.count_status(TaskStatus::Running).await?,
            completed: self.count_status(TaskStatus::Succeeded).await?,
            failed: self.count_status(TaskStatus::Failed).await?,
            paused: self.is_paused(),
        })
    }

    /// Stop handing out tasks from this process; enqueueing keeps working
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!(queue = %self.name, "Queue paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!(queue = %self.name, "Queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Drop every waiting task; running and finished tasks are kept
    pub async fn clear(&self) -> Result<u64, QueueError> {
        let result = Entity::delete_many()
            .filter(Column::Queue.eq(self.name.as_ref()))
            .filter(Column::Status.eq(TaskStatus::Queued))
            .exec(&self.db)
            .await?;
        info!(queue = %self.name, removed = result.rows_affected, "Queue cleared");
        Ok(result.rows_affected)
    }

    /// Lease up to `limit` due tasks
    pub async fn claim(&self, limit: usize) -> Result<Vec<Model>, QueueError> {
        if self.is_paused() || limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now().fixed_offset();
        let eligible = Entity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Queue.eq(self.name.as_ref()))
            .filter(Column::Status.eq(TaskStatus::Queued))
            .filter(Column::ScheduledAt.lte(now))
            .filter(
                Column::RetryAfter
                    .is_null()
                    .or(Column::RetryAfter.lte(now)),
            )
            .order_by_desc(Column::Priority)
            .order_by_asc(Column::ScheduledAt)
            .limit(limit as u64)
            .into_tuple::<Uuid>()
            .all(&self.db)
            .await?;

        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        let lease_id = Uuid::new_v4();
        let claimed = Entity::update_many()
            .col_expr(Column::Status, Expr::value(TaskStatus::Running))
            .col_expr(Column::LeaseId, Expr::value(lease_id))
            .col_expr(Column::StartedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .filter(Column::Id.is_in(eligible))
            .filter(Column::Status.eq(TaskStatus::Queued))
            .exec(&self.db)
            .await?;

        if claimed.rows_affected == 0 {
            return Ok(Vec::new());
        }

        Ok(Entity::find()
            .filter(Column::LeaseId.eq(lease_id))
            .filter(Column::Status.eq(TaskStatus::Running))
            .order_by_desc(Column::Priority)
            .order_by_asc(Column::ScheduledAt)
            .all(&self.db)
            .await?)
    }

    /// Mark a leased task succeeded; false if the lease no longer holds
    pub async fn complete(&self, task: &Model, output: JsonValue) -> Result<bool, QueueError> {
        let now = Utc::now().fixed_offset();
        let changes = ActiveModel {
            status: Set(TaskStatus::Succeeded),
            finished_at: Set(Some(now)),
            output: Set(Some(output)),
            error: Set(None),
            updated_at: Set(now),
            ..Default::default()
        };

        let result = Entity::update_many()
            .set(changes)
            .filter(Column::Id.eq(task.id))
            .filter(Column::LeaseId.eq(task.lease_id))
            .filter(Column::Status.eq(TaskStatus::Running))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Report a failed attempt; requeues with backoff while attempts remain
    pub async fn fail(&self, task: &Model, error: &TaskError) -> Result<FailOutcome, QueueError> {
        let now = Utc::now();
        let exhausted = error.is_permanent() || task.attempts >= task.max_attempts;
        let prior_failures = task.attempts.saturating_sub(1).max(0);

        let mut details = json!({
            "message": error.message(),
            "attempts": task.attempts,
            "permanent": error.is_permanent(),
            "timestamp": now.to_rfc3339(),
        });

        let (changes, outcome) = if exhausted {
            (
                ActiveModel {
                    status: Set(TaskStatus::Failed),
                    finished_at: Set(Some(now.fixed_offset())),
                    error: Set(Some(details)),
                    updated_at: Set(now.fixed_offset()),
                    ..Default::default()
                },
                FailOutcome::Exhausted,
            )
        } else {
            let backoff_seconds = self.calculate_backoff(prior_failures, error.retry_after());
            let retry_after = now + Duration::milliseconds((backoff_seconds * 1_000.0) as i64);
            details["backoff_seconds"] = json!(backoff_seconds);
            (
                ActiveModel {
                    status: Set(TaskStatus::Queued),
                    retry_after: Set(Some(retry_after.fixed_offset())),
                    lease_id: Set(None),
                    error: Set(Some(details)),
                    updated_at: Set(now.fixed_offset()),
                    ..Default::default()
                },
                FailOutcome::Retrying { retry_after },
            )
        };

        let result = Entity::update_many()
            .set(changes)
            .filter(Column::Id.eq(task.id))
            .filter(Column::LeaseId.eq(task.lease_id))
            .filter(Column::Status.eq(TaskStatus::Running))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(FailOutcome::LeaseLost);
        }

        match outcome {
            FailOutcome::Retrying { retry_after } => warn!(
                task_id = %task.id,
                attempt = task.attempts,
                %retry_after,
                "Task failed, retrying: {}",
                error.message()
            ),
            _ => warn!(
                task_id = %task.id,
                attempt = task.attempts,
                "Task failed permanently: {}",
                error.message()
            ),
        }
        Ok(outcome)
    }

    /// Exponential backoff in seconds, floored at any retry-after hint, plus jitter
    pub fn calculate_backoff(&self, prior_failures: i32, retry_after_hint: Option<u64>) -> f64 {
        let base_seconds = self.retry_policy.base_seconds as f64;
        let max_seconds = self.retry_policy.max_seconds as f64;

        let mut backoff = (base_seconds * 2_f64.powi(prior_failures)).min(max_seconds);
        if let Some(hint) = retry_after_hint {
            backoff = backoff.max(hint as f64);
        }

        let jitter_span = self.retry_policy.jitter_factor * backoff;
        let jitter = if jitter_span > 0.0 {
            thread_rng().gen_range(0.0..jitter_span)
        } else {
            0.0
        };
        backoff + jitter
    }

    /// Fail every waiting task of a sync run so no further batches start
    pub async fn cancel_correlated(
        &self,
        correlation_id: Uuid,
        reason: &str,
    ) -> Result<u64, QueueError> {
        let now = Utc::now().fixed_offset();
        let changes = ActiveModel {
            status: Set(TaskStatus::Failed),
            finished_at: Set(Some(now)),
            error: Set(Some(json!({ "message": reason, "cancelled": true }))),
            updated_at: Set(now),
            ..Default::default()
        };

        let result = Entity::update_many()
            .set(changes)
            .filter(Column::Queue.eq(self.name.as_ref()))
            .filter(Column::CorrelationId.eq(correlation_id))
            .filter(Column::Status.eq(TaskStatus::Queued))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(%correlation_id, cancelled = result.rows_affected, "Cancelled queued tasks");
        }
        Ok(result.rows_affected)
    }

    /// Requeue tasks whose worker disappeared while holding the lease
    pub async fn recover_stalled(&self, older_than: std::time::Duration) -> Result<u64, QueueError> {
        let now = Utc::now();
        let cutoff = now - Duration::from_std(older_than).unwrap_or(Duration::days(365));

        let changes = ActiveModel {
            status: Set(TaskStatus::Queued),
            lease_id: Set(None),
            retry_after: Set(None),
            updated_at: Set(now.fixed_offset()),
            ..Default::default()
        };

        let result = Entity::update_many()
            .set(changes)
            .filter(Column::Queue.eq(self.name.as_ref()))
            .filter(Column::Status.eq(TaskStatus::Running))
            .filter(queue_task::Column::StartedAt.lt(cutoff.fixed_offset()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            warn!(queue = %self.name, recovered = result.rows_affected, "Recovered stalled tasks");
        }
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_queue(policy: RetryPolicyConfig) -> JobQueue {
        let db = sea_orm::Database::connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        JobQueue::new(db, "test", 3, policy)
    }

    #[tokio::test]
    async fn backoff_grows_exponentially_with_bounded_jitter() {
        let queue = test_queue(RetryPolicyConfig {
            base_seconds: 5,
            max_seconds: 900,
            jitter_factor: 0.1,
        })
        .await;

        let first = queue.calculate_backoff(0, None);
        assert!((5.0..=5.5).contains(&first));

        let second = queue.calculate_backoff(1, None);
        assert!((10.0..=11.0).contains(&second));

        let third = queue.calculate_backoff(2, None);
        assert!((20.0..=22.0).contains(&third));
    }

    #[tokio::test]
    async fn backoff_is_capped_and_honours_retry_after() {
        let queue = test_queue(RetryPolicyConfig {
            base_seconds: 5,
            max_seconds: 60,
            jitter_factor: 0.0,
        })
        .await;

        assert_eq!(queue.calculate_backoff(10, None), 60.0);
        assert_eq!(queue.calculate_backoff(0, Some(120)), 120.0);
        assert_eq!(queue.calculate_backoff(3, Some(1)), 40.0);
    }

    #[tokio::test]
    async fn zero_base_produces_immediate_retry() {
        let queue = test_queue(RetryPolicyConfig {
            base_seconds: 0,
            max_seconds: 0,
            jitter_factor: 0.5,
        })
        .await;
        assert_eq!(queue.calculate_backoff(4, None), 0.0);
    }
}
