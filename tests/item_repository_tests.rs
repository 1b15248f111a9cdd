mod test_utils;

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use catalog_sync::models::item::{LastAction, Tags, Variant, Variants};
use catalog_sync::repositories::{ItemRecord, ItemRepository, UpsertOutcome};
use test_utils::{STORE, day, setup_test_db};

fn record(item_id: &str, title: &str) -> ItemRecord {
    ItemRecord {
        store_id: STORE.to_string(),
        item_id: item_id.to_string(),
        title: title.to_string(),
        description: Some("plain text".to_string()),
        handle: Some(title.to_lowercase()),
        category: Some("Widgets".to_string()),
        vendor: None,
        tags: Tags(BTreeSet::from(["sale".to_string()])),
        variants: Variants(vec![Variant {
            variant_id: format!("{item_id}01"),
            price: "9.99".to_string(),
            sku: format!("SKU-{item_id}"),
            compare_at_price: None,
            inventory_qty: Some(3),
            inventory_item_id: None,
        }]),
        source_created_at: Some(day(1).fixed_offset()),
        source_updated_at: Some(day(2).fixed_offset()),
    }
}

async fn repo() -> (DatabaseConnection, ItemRepository) {
    let db = setup_test_db().await.unwrap();
    (db.clone(), ItemRepository::new(db))
}

#[tokio::test]
async fn upsert_creates_then_updates_in_place() {
    let (_db, items) = repo().await;
    let run = Uuid::new_v4();

    assert_eq!(
        items.upsert(&record("1", "Lamp"), run).await.unwrap(),
        UpsertOutcome::Created
    );
    let first = items.find(STORE, "1").await.unwrap().unwrap();
    assert_eq!(first.last_action, LastAction::Added);
    assert_eq!(first.cursor.as_deref(), Some(run.to_string().as_str()));

    let second_run = Uuid::new_v4();
    assert_eq!(
        items
            .upsert(&record("1", "Desk Lamp"), second_run)
            .await
            .unwrap(),
        UpsertOutcome::Updated
    );

    let updated = items.find(STORE, "1").await.unwrap().unwrap();
    assert_eq!(updated.id, first.id);
    assert_eq!(updated.title, "Desk Lamp");
    assert_eq!(updated.last_action, LastAction::Updated);
    assert_eq!(updated.first_seen_at, first.first_seen_at);
    assert_eq!(updated.local_created_at, first.local_created_at);
    assert_eq!(updated.variants.0[0].sku, "SKU-1");
    assert_eq!(items.stats(STORE).await.unwrap().total, 1);
}

#[tokio::test]
async fn repeated_write_in_same_run_is_already_applied() {
    let (_db, items) = repo().await;
    let run = Uuid::new_v4();

    assert_eq!(
        items.upsert(&record("1", "Lamp"), run).await.unwrap(),
        UpsertOutcome::Created
    );
    assert_eq!(
        items.upsert(&record("1", "Lamp"), run).await.unwrap(),
        UpsertOutcome::AlreadyApplied
    );
    let stored = items.find(STORE, "1").await.unwrap().unwrap();
    assert_eq!(stored.last_action, LastAction::Added);

    assert_eq!(
        items.upsert(&record("1", "Lamp"), Uuid::new_v4()).await.unwrap(),
        UpsertOutcome::Updated
    );
}

#[tokio::test]
async fn same_item_id_in_other_store_is_separate() {
    let (_db, items) = repo().await;
    let run = Uuid::new_v4();

    items.upsert(&record("1", "Lamp"), run).await.unwrap();
    let mut other = record("1", "Chair");
    other.store_id = "store-2".to_string();
    assert_eq!(
        items.upsert(&other, run).await.unwrap(),
        UpsertOutcome::Created
    );

    assert_eq!(items.find(STORE, "1").await.unwrap().unwrap().title, "Lamp");
    assert_eq!(items.find("store-2", "1").await.unwrap().unwrap().title, "Chair");
}

#[tokio::test]
async fn soft_delete_skips_already_deleted_items() {
    let (_db, items) = repo().await;
    let run = Uuid::new_v4();
    for id in ["1", "2", "3"] {
        items.upsert(&record(id, "Lamp"), run).await.unwrap();
    }

    let ids = vec!["2".to_string(), "3".to_string()];
    assert_eq!(items.soft_delete(STORE, &ids, Some(run)).await.unwrap(), 2);
    assert_eq!(items.soft_delete(STORE, &ids, Some(run)).await.unwrap(), 0);

    assert_eq!(items.active_item_ids(STORE).await.unwrap(), vec!["1".to_string()]);
    let gone = items.find(STORE, "2").await.unwrap().unwrap();
    assert_eq!(gone.last_action, LastAction::Deleted);
    assert!(gone.deleted_at.is_some());

    let stats = items.stats(STORE).await.unwrap();
    assert_eq!((stats.total, stats.active, stats.deleted), (3, 1, 2));
}

#[tokio::test]
async fn upsert_revives_soft_deleted_item() {
    let (_db, items) = repo().await;
    let run = Uuid::new_v4();
    items.upsert(&record("1", "Lamp"), run).await.unwrap();
    items.delete(STORE, "1", false).await.unwrap();

    assert_eq!(
        items.upsert(&record("1", "Lamp"), run).await.unwrap(),
        UpsertOutcome::Updated
    );
    let revived = items.find(STORE, "1").await.unwrap().unwrap();
    assert!(revived.deleted_at.is_none());
    assert_eq!(revived.last_action, LastAction::Updated);
}

#[tokio::test]
async fn purge_only_removes_old_tombstones() {
    let (_db, items) = repo().await;
    let run = Uuid::new_v4();
    for id in ["1", "2"] {
        items.upsert(&record(id, "Lamp"), run).await.unwrap();
    }
    items
        .soft_delete(STORE, &["2".to_string()], Some(run))
        .await
        .unwrap();

    let past = (Utc::now() - Duration::days(1)).fixed_offset();
    assert_eq!(items.purge_deleted_before(STORE, past).await.unwrap(), 0);

    let future = (Utc::now() + Duration::minutes(1)).fixed_offset();
    assert_eq!(items.purge_deleted_before(STORE, future).await.unwrap(), 1);
    assert!(items.find(STORE, "2").await.unwrap().is_none());
    assert!(items.find(STORE, "1").await.unwrap().is_some());
}

#[tokio::test]
async fn hard_delete_removes_row() {
    let (_db, items) = repo().await;
    items.upsert(&record("1", "Lamp"), Uuid::new_v4()).await.unwrap();

    assert!(items.delete(STORE, "1", true).await.unwrap());
    assert!(!items.delete(STORE, "1", true).await.unwrap());
    assert!(!items.delete(STORE, "missing", false).await.unwrap());
    assert_eq!(items.stats(STORE).await.unwrap().total, 0);
}

#[tokio::test]
async fn list_pages_in_item_id_order() {
    let (_db, items) = repo().await;
    let run = Uuid::new_v4();
    for id in ["a", "b", "c", "d", "e"] {
        items.upsert(&record(id, "Lamp"), run).await.unwrap();
    }
    items.delete(STORE, "c", false).await.unwrap();

    let (page, total) = items.list(STORE, false, 2, 1).await.unwrap();
    assert_eq!(total, 4);
    let ids: Vec<&str> = page.iter().map(|item| item.item_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "d"]);

    let (_, with_deleted) = items.list(STORE, true, 10, 0).await.unwrap();
    assert_eq!(with_deleted, 5);
}
