//! Queued dispatch: batches travel through the job queue and the last one closes the run.

mod test_utils;

use std::time::Duration;

use sea_orm::EntityTrait;
use serde_json::json;

use catalog_sync::config::{RetryPolicyConfig, SweeperConfig};
use catalog_sync::models::queue_task::TaskStatus;
use catalog_sync::models::sync_run::{DispatchMode, RunStatus};
use catalog_sync::models::sync_state::SyncType;
use catalog_sync::queue::{BATCH_QUEUE, FailOutcome, JobQueue, TaskError, TaskHandler};
use catalog_sync::sync::{StaleRunSweeper, StopReason, SyncOptionsInput};
use test_utils::{STORE, credentials, day, harness, setup_test_db};

fn queued(h: &test_utils::Harness) -> catalog_sync::sync::SyncOptions {
    h.options(SyncOptionsInput {
        dispatch: Some(DispatchMode::Queued),
        ..Default::default()
    })
}

#[tokio::test]
async fn queued_run_is_closed_by_last_batch() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3", "4", "5", "6"], day(1));

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();
    assert_eq!(summary.status, RunStatus::Running);
    assert_eq!(summary.batch_progress.total, 2);
    assert_eq!(summary.batch_progress.pending, 2);
    assert_eq!(h.queue.stats().await.unwrap().waiting, 2);

    let ran = h.worker().drain().await.unwrap();
    assert_eq!(ran, 2);

    let history = h.runs.find(summary.run_id).await.unwrap().unwrap();
    assert_eq!(history.status, RunStatus::Succeeded);
    assert_eq!(history.processed, 6);

    let state = h.states.find(STORE, SyncType::Products).await.unwrap().unwrap();
    assert!(!state.is_in_progress);
    assert!(state.last_synced_at.is_some());
    assert_eq!(state.batch_completed, 2);
    assert_eq!(state.total_syncs, 1);
    assert_eq!(h.queue.stats().await.unwrap().completed, 2);
}

#[tokio::test]
async fn redelivered_batch_does_not_recount_items() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3", "4"], day(1));
    h.source.fail_fetch("3");

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();
    assert_eq!(summary.batch_progress.total, 1);

    let task = h.queue.claim(1).await.unwrap().remove(0);
    let worker = h.orchestrator.batch_worker();
    let first = worker.handle(&task).await.unwrap();
    let second = worker.handle(&task).await.unwrap();
    assert_eq!(first["processed"], 3);
    assert_eq!(second["processed"], 0);
    assert_eq!(second["failed"], 0);

    let state = h.states.find(STORE, SyncType::Products).await.unwrap().unwrap();
    assert_eq!(state.run_processed, 3);
    assert_eq!(state.run_created, 3);
    assert_eq!(state.run_updated, 0);
    assert_eq!(state.run_failed, 1);

    assert!(h.queue.complete(&task, first.clone()).await.unwrap());
    worker.on_completed(&task, &first).await;

    let history = h.runs.find(summary.run_id).await.unwrap().unwrap();
    assert_eq!(history.status, RunStatus::Succeeded);
    assert_eq!(history.processed, 3);

    let state = h.states.find(STORE, SyncType::Products).await.unwrap().unwrap();
    assert_eq!(state.total_processed, 3);
    assert_eq!(state.total_created, 3);

    let view = h
        .orchestrator
        .status(STORE, SyncType::Products)
        .await
        .unwrap()
        .unwrap();
    let errors = view.current_run.unwrap().errors;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].item_id.as_deref(), Some("3"));
}

#[tokio::test]
async fn queued_runaway_run_enqueues_no_leftovers() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2"], day(1));
    h.source.set_count(Some(2));
    h.source.script_pages(vec![vec!["1", "2"]; 10]);

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::Runaway));
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.batch_progress.total, 0);

    let stats = h.queue.stats().await.unwrap();
    assert_eq!((stats.waiting, stats.completed, stats.failed), (0, 0, 0));
    let state = h.states.find(STORE, SyncType::Products).await.unwrap().unwrap();
    assert!(!state.is_in_progress);
}

#[tokio::test]
async fn empty_queued_run_closes_immediately() {
    let h = harness().await.unwrap();

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.batch_progress.total, 0);
    assert_eq!(h.queue.stats().await.unwrap().waiting, 0);
}

#[tokio::test]
async fn some_failed_batches_make_run_partial() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3", "4", "5", "6"], day(1));
    // one connection for enumeration, one for the first batch
    h.factory.allow_connects(2);

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();
    h.worker().drain().await.unwrap();

    let history = h.runs.find(summary.run_id).await.unwrap().unwrap();
    assert_eq!(history.status, RunStatus::Partial);
    assert_eq!(history.batch_failed, 1);
    assert_eq!(history.error.as_deref(), Some("1 of 2 batches failed"));

    let state = h.states.find(STORE, SyncType::Products).await.unwrap().unwrap();
    assert!(!state.is_in_progress);
    assert!(state.last_synced_at.is_none());
    assert_eq!(state.last_sync_error.as_deref(), Some("1 of 2 batches failed"));

    let view = h
        .orchestrator
        .status(STORE, SyncType::Products)
        .await
        .unwrap()
        .unwrap();
    let errors = view.current_run.unwrap().errors;
    assert!(errors.iter().any(|entry| entry.item_id.is_none()
        && entry.batch_id.is_some()
        && entry.error.starts_with("batch failed")));
}

#[tokio::test]
async fn all_failed_batches_fail_the_run() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3", "4", "5", "6"], day(1));
    h.factory.allow_connects(1);

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();
    h.worker().drain().await.unwrap();

    let history = h.runs.find(summary.run_id).await.unwrap().unwrap();
    assert_eq!(history.status, RunStatus::Failed);
    assert_eq!(history.error.as_deref(), Some("2 of 2 batches failed"));
}

#[tokio::test]
async fn finalization_happens_once() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3", "4", "5"], day(1));

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();
    h.worker().drain().await.unwrap();

    let finalizer = h.orchestrator.finalizer();
    assert_eq!(finalizer.try_complete(summary.run_id).await.unwrap(), None);
    assert!(
        !finalizer
            .fail(summary.run_id, RunStatus::Failed, "late failure")
            .await
            .unwrap()
    );

    let state = h.states.find(STORE, SyncType::Products).await.unwrap().unwrap();
    assert_eq!(state.total_syncs, 1);
    assert_eq!(state.total_created, 5);
    assert_eq!(state.last_sync_error, None);
    assert_eq!(
        h.runs.find(summary.run_id).await.unwrap().unwrap().status,
        RunStatus::Succeeded
    );
}

#[tokio::test]
async fn cancelling_queued_run_drops_waiting_batches() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3", "4", "5", "6"], day(1));

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();
    assert!(h.orchestrator.cancel(summary.run_id).await.unwrap());

    let stats = h.queue.stats().await.unwrap();
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.failed, 2);
    assert_eq!(h.worker().drain().await.unwrap(), 0);

    let history = h.runs.find(summary.run_id).await.unwrap().unwrap();
    assert_eq!(history.status, RunStatus::Cancelled);
    assert_eq!(history.batch_failed, 2);
    assert_eq!(h.items.stats(STORE).await.unwrap().total, 0);
}

#[tokio::test]
async fn reset_run_leaves_no_batches_to_run() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3", "4", "5", "6"], day(1));

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();
    h.orchestrator
        .force_reset(STORE, SyncType::Products)
        .await
        .unwrap();

    // closing the run fails its waiting tasks
    assert_eq!(h.worker().drain().await.unwrap(), 0);
    assert_eq!(
        h.runs.find(summary.run_id).await.unwrap().unwrap().status,
        RunStatus::TimedOut
    );
}

#[tokio::test]
async fn paused_queue_holds_tasks_until_resumed() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3"], day(1));
    h.queue.pause();

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), queued(&h))
        .await
        .unwrap();
    assert_eq!(h.worker().drain().await.unwrap(), 0);
    assert!(h.queue.stats().await.unwrap().paused);

    h.queue.resume();
    assert_eq!(h.worker().drain().await.unwrap(), 1);
    assert_eq!(
        h.runs.find(summary.run_id).await.unwrap().unwrap().status,
        RunStatus::Succeeded
    );
}

#[tokio::test]
async fn clear_removes_only_waiting_tasks() {
    let db = setup_test_db().await.unwrap();
    let queue = JobQueue::new(db, BATCH_QUEUE, 3, RetryPolicyConfig::default());

    queue.enqueue(&json!({ "n": 1 }), None).await.unwrap();
    queue.enqueue(&json!({ "n": 2 }), None).await.unwrap();
    let claimed = queue.claim(1).await.unwrap();
    assert_eq!(claimed.len(), 1);

    assert_eq!(queue.clear().await.unwrap(), 1);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.active, 1);
}

#[tokio::test]
async fn claim_never_hands_out_a_task_twice() {
    let db = setup_test_db().await.unwrap();
    let queue = JobQueue::new(db, BATCH_QUEUE, 3, RetryPolicyConfig::default());
    for n in 0..3 {
        queue.enqueue(&json!({ "n": n }), None).await.unwrap();
    }

    let first = queue.claim(2).await.unwrap();
    let second = queue.claim(2).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);
    assert!(first.iter().all(|task| task.id != second[0].id));
    assert!(first.iter().all(|task| task.status == TaskStatus::Running && task.attempts == 1));
    assert!(queue.claim(2).await.unwrap().is_empty());
}

#[tokio::test]
async fn transient_failure_requeues_with_backoff() {
    let db = setup_test_db().await.unwrap();
    let policy = RetryPolicyConfig {
        base_seconds: 30,
        max_seconds: 60,
        jitter_factor: 0.0,
    };
    let queue = JobQueue::new(db, BATCH_QUEUE, 2, policy);
    let handle = queue.enqueue(&json!({}), None).await.unwrap();

    let task = queue.claim(1).await.unwrap().remove(0);
    let outcome = queue
        .fail(&task, &TaskError::transient("upstream 503"))
        .await
        .unwrap();
    assert!(matches!(outcome, FailOutcome::Retrying { .. }));

    let stored = queue.find(handle.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Queued);
    assert!(stored.retry_after.is_some());
    assert!(queue.claim(1).await.unwrap().is_empty(), "backoff not yet elapsed");

    // the stale lease cannot report again
    assert_eq!(
        queue.fail(&task, &TaskError::transient("again")).await.unwrap(),
        FailOutcome::LeaseLost
    );
}

#[tokio::test]
async fn permanent_failure_and_exhaustion_stop_retries() {
    let db = setup_test_db().await.unwrap();
    let queue = JobQueue::new(db, BATCH_QUEUE, 3, RetryPolicyConfig::default());

    let handle = queue.enqueue(&json!({}), None).await.unwrap();
    let task = queue.claim(1).await.unwrap().remove(0);
    let outcome = queue
        .fail(&task, &TaskError::permanent("token revoked"))
        .await
        .unwrap();
    assert_eq!(outcome, FailOutcome::Exhausted);
    let stored = queue.find(handle.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.error.unwrap()["message"], "token revoked");
}

#[tokio::test]
async fn backoff_grows_and_respects_hints() {
    let db = setup_test_db().await.unwrap();
    let policy = RetryPolicyConfig {
        base_seconds: 5,
        max_seconds: 60,
        jitter_factor: 0.0,
    };
    let queue = JobQueue::new(db, BATCH_QUEUE, 3, policy);

    assert_eq!(queue.calculate_backoff(0, None), 5.0);
    assert_eq!(queue.calculate_backoff(2, None), 20.0);
    assert_eq!(queue.calculate_backoff(10, None), 60.0);
    assert_eq!(queue.calculate_backoff(0, Some(45)), 45.0);
}

#[tokio::test]
async fn sweeper_recovers_stalled_tasks_and_stale_runs() {
    let h = harness().await.unwrap();
    h.orchestrator
        .begin_run(STORE, SyncType::Products, credentials(), h.default_options())
        .await
        .unwrap();
    catalog_sync::models::sync_state::Entity::update_many()
        .col_expr(
            catalog_sync::models::sync_state::Column::RunStartedAt,
            sea_orm::sea_query::Expr::value(
                (chrono::Utc::now() - chrono::Duration::hours(3)).fixed_offset(),
            ),
        )
        .exec(&h.db)
        .await
        .unwrap();

    let handle = h.queue.enqueue(&json!({}), None).await.unwrap();
    h.queue.claim(1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = StaleRunSweeper::new(
        h.orchestrator.clone(),
        h.queue.clone(),
        SweeperConfig {
            tick_seconds: 60,
            stalled_task_seconds: 0,
        },
    );
    let stats = sweeper.tick().await;
    assert_eq!(stats.runs_reset, 1);
    assert_eq!(stats.tasks_recovered, 1);

    let task = h.queue.find(handle.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.lease_id.is_none());

    let again = sweeper.tick().await;
    assert_eq!(again.runs_reset, 0);
}
