//! Management API exercised through the router with `tower::ServiceExt::oneshot`.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use catalog_sync::config::AppConfig;
use catalog_sync::models::sync_state::SyncType;
use catalog_sync::server::{AppState, create_app};
use test_utils::{Harness, STORE, credentials, day, harness};

fn app(h: &Harness) -> Router {
    let state = AppState::new(
        Arc::new(AppConfig::default()),
        h.db.clone(),
        h.orchestrator.clone(),
    );
    create_app(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn start_body() -> Value {
    json!({
        "credentials": { "shop_domain": "acme.myshopify.com", "access_token": "shpat_test" },
        "options": { "batchSize": 2 }
    })
}

async fn wait_until_idle(h: &Harness) {
    for _ in 0..200 {
        let state = h.states.find(STORE, SyncType::Products).await.unwrap();
        if state.is_some_and(|state| !state.is_in_progress) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sync did not finish");
}

#[tokio::test]
async fn start_sync_accepts_and_runs_in_background() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3"], day(1));
    let app = app(&h);

    let (status, body) = send(&app, Method::POST, "/stores/store-1/syncs", Some(start_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["mode"], "full");
    assert_eq!(body["data"]["dispatch"], "inline");
    let run_id = body["data"]["run_id"].as_str().unwrap().to_string();

    wait_until_idle(&h).await;

    let (status, body) = send(&app, Method::GET, "/stores/store-1/syncs/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_in_progress"], false);
    assert_eq!(body["data"]["total_created"], 3);
    assert_eq!(body["data"]["current_run"]["run_id"], run_id.as_str());
    assert_eq!(body["data"]["current_run"]["batch_progress"]["total"], 2);

    let (status, body) = send(&app, Method::GET, &format!("/executions/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "succeeded");
    assert_eq!(body["data"]["processed"], 3);
    assert!(body["data"]["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn start_sync_conflicts_while_running() {
    let h = harness().await.unwrap();
    let app = app(&h);
    let running = h
        .orchestrator
        .begin_run(STORE, SyncType::Products, credentials(), h.default_options())
        .await
        .unwrap();

    let (status, body) = send(&app, Method::POST, "/stores/store-1/syncs", Some(start_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(body["details"]["state"]["is_in_progress"], true);
    assert_eq!(
        body["details"]["state"]["current_run"]["run_id"],
        running.run_id.to_string().as_str()
    );
}

#[tokio::test]
async fn start_sync_rejects_bad_options() {
    let h = harness().await.unwrap();
    let app = app(&h);

    let mut body = start_body();
    body["options"] = json!({ "batchSize": 0 });
    let (status, response) = send(&app, Method::POST, "/stores/store-1/syncs", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "VALIDATION_FAILED");

    let mut body = start_body();
    body["options"] = json!({ "batchSzie": 10 });
    let (status, response) = send(&app, Method::POST, "/stores/store-1/syncs", Some(body)).await;
    assert!(status.is_client_error());
    assert_eq!(response["success"], false);

    assert!(h.states.find(STORE, SyncType::Products).await.unwrap().is_none());
}

#[tokio::test]
async fn status_and_reset_of_unknown_store_are_not_found() {
    let h = harness().await.unwrap();
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/stores/nowhere/syncs/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = send(&app, Method::POST, "/stores/nowhere/syncs/reset", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reset_releases_a_stuck_run() {
    let h = harness().await.unwrap();
    let app = app(&h);
    h.orchestrator
        .begin_run(STORE, SyncType::Products, credentials(), h.default_options())
        .await
        .unwrap();

    let (status, body) = send(&app, Method::POST, "/stores/store-1/syncs/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_in_progress"], false);
    assert!(
        body["data"]["last_sync_error"]
            .as_str()
            .unwrap()
            .starts_with("Sync timed out")
    );
}

#[tokio::test]
async fn items_can_be_listed_read_and_deleted() {
    let h = harness().await.unwrap();
    h.seed(&["1", "2", "3"], day(1));
    h.orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), h.default_options())
        .await
        .unwrap();
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/stores/store-1/items?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["has_more"], true);
    assert_eq!(body["data"]["data"][0]["item_id"], "1");

    let (status, body) = send(&app, Method::GET, "/stores/store-1/items/2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Product 2");
    assert_eq!(body["data"]["last_action"], "ADDED");

    let (status, _) = send(&app, Method::GET, "/stores/store-1/items/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::DELETE, "/stores/store-1/items/2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hard"], false);
    let (status, _) = send(&app, Method::DELETE, "/stores/store-1/items/2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::GET, "/stores/store-1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"]["active"], 2);
    assert_eq!(body["data"]["items"]["deleted"], 1);
    assert_eq!(body["data"]["syncs"][0]["total_syncs"], 1);

    let (status, body) = send(
        &app,
        Method::GET,
        "/stores/store-1/items?include_deleted=true",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
}

#[tokio::test]
async fn invalid_page_size_is_rejected() {
    let h = harness().await.unwrap();
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/stores/store-1/items?limit=1000", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn executions_are_listed_and_cancel_is_guarded() {
    let h = harness().await.unwrap();
    h.seed(&["1"], day(1));
    let finished = h
        .orchestrator
        .run_sync(STORE, SyncType::Products, credentials(), h.default_options())
        .await
        .unwrap();
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/executions?store_id=store-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["data"][0]["status"], "succeeded");

    let (status, body) = send(&app, Method::GET, "/executions?status=failed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/executions/{}/cancel", finished.run_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("succeeded"));

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = send(&app, Method::POST, &format!("/executions/{unknown}/cancel"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::GET, &format!("/executions/{unknown}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn running_execution_can_be_cancelled() {
    let h = harness().await.unwrap();
    let app = app(&h);
    let run = h
        .orchestrator
        .begin_run(STORE, SyncType::Products, credentials(), h.default_options())
        .await
        .unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/executions/{}/cancel", run.run_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cancel_requested"], true);

    let summary = h.orchestrator.execute(run).await.unwrap();
    assert_eq!(summary.status.as_str(), "cancelled");
}

#[tokio::test]
async fn queue_can_be_paused_resumed_and_cleared() {
    let h = harness().await.unwrap();
    let app = app(&h);
    h.queue.enqueue(&json!({}), None).await.unwrap();

    let (status, body) = send(&app, Method::POST, "/queue/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["paused"], true);
    assert!(h.queue.is_paused());

    let (_, body) = send(&app, Method::GET, "/queue/stats", None).await;
    assert_eq!(body["data"]["waiting"], 1);

    let (_, body) = send(&app, Method::POST, "/queue/resume", None).await;
    assert_eq!(body["data"]["paused"], false);

    let (status, body) = send(&app, Method::POST, "/queue/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], 1);
}

#[tokio::test]
async fn health_and_docs_are_served() {
    let h = harness().await.unwrap();
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, Method::GET, "/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/stores/{store_id}/syncs"].is_object());
}
