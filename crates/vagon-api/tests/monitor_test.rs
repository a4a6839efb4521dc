//! Camera monitor and camera listing integration tests.
//!
//! Run with: `cargo test -p vagon-api --test monitor_test`

mod helpers;

use helpers::setup_test_app;
use serde_json::Value;

#[tokio::test]
async fn second_start_reports_already_running() {
    let app = setup_test_app().await;
    let client = app.client();

    let first: Value = client.post("/monitor/start/cam_ingreso_1").await.json();
    assert_eq!(first["status"], "started");
    assert_eq!(first["camera_id"], "cam_ingreso_1");

    let second: Value = client.post("/monitor/start/cam_ingreso_1").await.json();
    assert_eq!(second["status"], "already_running");
    assert_eq!(app.state.monitors.active_count().await, 1);

    let stopped: Value = client.post("/monitor/stop/cam_ingreso_1").await.json();
    assert_eq!(stopped["status"], "stopped");
    let again: Value = client.post("/monitor/stop/cam_ingreso_1").await.json();
    assert_eq!(again["status"], "not_running");
}

#[tokio::test]
async fn unknown_camera_is_not_found() {
    let app = setup_test_app().await;
    let response = app.client().post("/monitor/start/cam_nope").await;
    assert_eq!(response.status_code(), 404);
    let response = app.client().get("/monitor/status/cam_nope").await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn status_and_list_cover_every_configured_camera() {
    let app = setup_test_app().await;

    let statuses: Value = app.client().get("/monitor/status").await.json();
    let ids: Vec<&str> = statuses
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["camera_id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"cam_ingreso_1"));
    assert!(ids.contains(&"cam_egreso_1"));
    assert!(statuses[0]["stats"]["frames_processed"].is_u64());

    let cameras: Value = app.client().get("/cameras/list").await.json();
    assert_eq!(cameras.as_array().unwrap().len(), ids.len());
    assert!(cameras
        .as_array()
        .unwrap()
        .iter()
        .all(|c| c["is_running"] == false));
}

#[tokio::test]
async fn system_info_reports_capture_capabilities() {
    let app = setup_test_app().await;
    let response = app.client().get("/cameras/system-info").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["ffmpeg_available"], false);
    assert!(body["detected_devices"].is_array());
    assert_eq!(body["active_monitors"], 0);
    assert!(body["hostname"].is_string());
}
