mod test_utils;

use serde_json::json;
use uuid::Uuid;

use catalog_sync::checkpoint::CheckpointManager;
use catalog_sync::models::checkpoint::CheckpointStage;
use catalog_sync::models::sync_state::SyncType;
use test_utils::{STORE, credentials, day, harness, setup_test_db};

#[tokio::test]
async fn checkpoints_are_listed_in_order_and_cleared() {
    let db = setup_test_db().await.unwrap();
    let checkpoints = CheckpointManager::new(db);
    let run_id = Uuid::new_v4();

    checkpoints
        .save(run_id, None, CheckpointStage::Started, None)
        .await;
    checkpoints
        .save(
            run_id,
            Some("42"),
            CheckpointStage::BatchDispatched,
            Some(json!({ "size": 4 })),
        )
        .await;
    checkpoints
        .save(Uuid::new_v4(), None, CheckpointStage::Started, None)
        .await;

    let listed = checkpoints.list(run_id).await.unwrap();
    let stages: Vec<CheckpointStage> = listed.iter().map(|cp| cp.stage).collect();
    assert_eq!(
        stages,
        vec![CheckpointStage::Started, CheckpointStage::BatchDispatched]
    );

    let latest = checkpoints.get_latest(run_id).await.unwrap().unwrap();
    assert_eq!(latest.last_processed_id.as_deref(), Some("42"));
    assert_eq!(latest.metadata.unwrap()["size"], 4);

    assert_eq!(checkpoints.clear(run_id).await.unwrap(), 2);
    assert!(checkpoints.get_latest(run_id).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_run_keeps_its_trail() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3", "4", "5"], day(1));
    h.source.fail_page_at(1);

    let summary = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), h.default_options())
        .await
        .unwrap();

    let stages: Vec<CheckpointStage> = h
        .checkpoints
        .list(summary.run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|cp| cp.stage)
        .collect();
    assert_eq!(stages.first(), Some(&CheckpointStage::Started));
    assert!(stages.contains(&CheckpointStage::Enumerating));
    assert_eq!(stages.last(), Some(&CheckpointStage::Failed));
}
