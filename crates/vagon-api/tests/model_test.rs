//! Detector info and tuning integration tests.
//!
//! Run with: `cargo test -p vagon-api --test model_test`

mod helpers;

use helpers::setup_test_app;
use serde_json::{json, Value};

#[tokio::test]
async fn model_info_lists_vocabulary_and_modes() {
    let app = setup_test_app().await;
    let info: Value = app.client().get("/model/info").await.json();

    assert_eq!(info["backend"], "scripted");
    assert_eq!(info["classes_count"], 31);
    assert_eq!(info["modo_deteccion"], "standard");
    assert_eq!(info["modes"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn partial_update_changes_only_given_fields() {
    let app = setup_test_app().await;
    let client = app.client();

    let updated: Value = client
        .post("/model/config")
        .json(&json!({ "min_confidence": 0.5, "modo_deteccion": "agresivo" }))
        .await
        .json();
    assert_eq!(updated["min_confidence"], 0.5);
    assert_eq!(updated["modo_deteccion"], "aggressive");
    assert_eq!(updated["umbral_agrupacion"], 50.0);

    let current: Value = client.get("/model/config").await.json();
    assert_eq!(current, updated);
}

#[tokio::test]
async fn out_of_range_update_is_rejected_without_change() {
    let app = setup_test_app().await;
    let client = app.client();

    let response = client
        .put("/model/config")
        .json(&json!({ "min_confidence": 0.05, "usar_agrupacion": false }))
        .await;
    assert_eq!(response.status_code(), 400);

    let current: Value = client.get("/model/config").await.json();
    assert_eq!(current["min_confidence"], 0.25);
    assert_eq!(current["usar_agrupacion"], true);
}

#[tokio::test]
async fn health_reports_store_and_cameras() {
    let app = setup_test_app().await;
    let response = app.client().get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "healthy");
    assert_eq!(body["active_cameras"], 0);

    app.client().get("/live").await.assert_status_ok();
    app.client().get("/ready").await.assert_status_ok();
    app.client().get("/api/openapi.json").await.assert_status_ok();
}
