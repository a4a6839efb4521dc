//! Video job integration tests over a scripted ffmpeg.
//!
//! Run with: `cargo test -p vagon-api --test video_test`

#![cfg(unix)]

mod helpers;

use std::time::Duration;

use helpers::fixtures::{chunk_form, finalize_form};
use helpers::video::{AfterFrames, FakeVideoTools};
use helpers::{detection, setup_test_app_with, TestApp};
use serde_json::Value;
use vagon_db::VagonetaRepository;

async fn app_with_tools(tools: &FakeVideoTools) -> TestApp {
    let ffmpeg = tools.ffmpeg_path();
    let ffprobe = tools.ffprobe_path();
    setup_test_app_with(move |config| {
        config.ffmpeg_path = ffmpeg;
        config.ffprobe_path = ffprobe;
    })
    .await
}

/// Upload a (fake) video and return its processing id.
async fn start_video_job(app: &TestApp, file_id: &str) -> String {
    let client = app.client();
    client
        .post("/upload-chunk/")
        .multipart(chunk_form(file_id, 0, 1, b"fake video bytes".to_vec()))
        .await
        .assert_status_ok();

    let response = client
        .post("/finalize-upload/")
        .multipart(finalize_form(file_id, "carro.mp4", 1))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "video_processing_pending");
    body["processing_id"].as_str().unwrap().to_string()
}

async fn status(app: &TestApp, processing_id: &str) -> Value {
    app.client()
        .get(&format!("/processing-status/{}", processing_id))
        .await
        .json()
}

async fn wait_until(app: &TestApp, processing_id: &str, done: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..100 {
        let snapshot = status(app, processing_id).await;
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} did not reach the expected state", processing_id);
}

async fn wait_terminal(app: &TestApp, processing_id: &str) -> Value {
    wait_until(app, processing_id, |s| {
        s["status"] != "queued" && s["status"] != "running"
    })
    .await
}

/// Event names and payloads of a finished job's stream, in order.
async fn stream_events(app: &TestApp, processing_id: &str) -> Vec<(String, Value)> {
    let text = app
        .client()
        .get(&format!("/stream-video-processing/{}", processing_id))
        .await
        .text();

    text.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = serde_json::from_str::<Value>(v.trim()).ok();
                }
            }
            Some((name?, data.unwrap_or(Value::Null)))
        })
        .collect()
}

fn names_without_progress(events: &[(String, Value)]) -> Vec<&str> {
    events
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| *name != "progress")
        .collect()
}

#[tokio::test]
async fn accepted_frames_yield_a_single_record_of_the_best_frame() {
    let tools = FakeVideoTools::new(3, AfterFrames::End);
    let app = app_with_tools(&tools).await;
    app.recognizer.answer_each(vec![
        vec![detection("03", 0.5, 20.0)],
        vec![detection("012", 0.9, 20.0)],
        vec![detection("03", 0.6, 20.0)],
    ]);

    let processing_id = start_video_job(&app, "vid-best").await;
    let snapshot = wait_terminal(&app, &processing_id).await;
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["frame_cursor"], 3);
    assert_eq!(snapshot["total_frames"], 3);
    assert_eq!(snapshot["best"]["numero"], "012");
    assert!(snapshot["record_id"].is_string());

    assert_eq!(app.repository.len().await, 1);
    let trajectory = app.repository.trajectory("012").await.unwrap();
    assert_eq!(trajectory.len(), 1);
    assert_eq!(
        trajectory[0].media_reference,
        format!("frames/{}.jpg", processing_id)
    );
    assert_eq!(trajectory[0].id.to_string(), snapshot["record_id"]);

    let events = stream_events(&app, &processing_id).await;
    assert_eq!(
        names_without_progress(&events),
        vec![
            "detection_update",
            "detection_update",
            "detection_update",
            "final_result",
            "db_record_created",
            "stream_end",
        ]
    );
    let updates: Vec<&Value> = events
        .iter()
        .filter(|(name, _)| name == "detection_update")
        .map(|(_, event)| event)
        .collect();
    assert_eq!(updates[1]["data"]["numero"], "012");
    assert_eq!(updates[1]["data"]["is_best"], true);
    assert_eq!(updates[2]["data"]["is_best"], false);

    let (_, final_result) = events
        .iter()
        .find(|(name, _)| name == "final_result")
        .unwrap();
    assert_eq!(final_result["data"]["frames_processed"], 3);

    // The best frame was stored and is served back
    app.client()
        .get(&format!("/media/frames/{}.jpg", processing_id))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn events_are_numbered_in_publication_order() {
    let tools = FakeVideoTools::new(2, AfterFrames::End);
    let app = app_with_tools(&tools).await;
    app.recognizer.answer(vec![detection("07", 0.8, 20.0)]);

    let processing_id = start_video_job(&app, "vid-order").await;
    wait_terminal(&app, &processing_id).await;

    let events = stream_events(&app, &processing_id).await;
    let seqs: Vec<u64> = events
        .iter()
        .map(|(_, event)| event["seq"].as_u64().unwrap())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{:?}", seqs);
    assert_eq!(events.last().unwrap().0, "stream_end");
    assert_eq!(app.repository.len().await, 1);
}

#[tokio::test]
async fn video_without_accepted_number_ends_in_no_detection_final() {
    let tools = FakeVideoTools::new(2, AfterFrames::End);
    let app = app_with_tools(&tools).await;

    let processing_id = start_video_job(&app, "vid-empty").await;
    let snapshot = wait_terminal(&app, &processing_id).await;
    assert_eq!(snapshot["status"], "completed");
    assert!(snapshot["record_id"].is_null());
    assert!(app.repository.is_empty().await);

    let events = stream_events(&app, &processing_id).await;
    assert_eq!(
        names_without_progress(&events),
        vec!["final_result", "no_detection_final", "stream_end"]
    );
}

#[tokio::test]
async fn cancelling_mid_run_writes_no_record() {
    let tools = FakeVideoTools::new(1, AfterFrames::Stall);
    let app = app_with_tools(&tools).await;
    app.recognizer.answer(vec![detection("012", 0.9, 20.0)]);

    let processing_id = start_video_job(&app, "vid-cancel").await;
    // The first frame is analysed, then ffmpeg stalls
    wait_until(&app, &processing_id, |s| s["frame_cursor"] == 1).await;

    let cancel: Value = app
        .client()
        .post(&format!("/cancel-processing/{}", processing_id))
        .await
        .json();
    assert_eq!(cancel["cancelled"], true);

    let snapshot = status(&app, &processing_id).await;
    assert_eq!(snapshot["status"], "cancelled");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(app.repository.is_empty().await);

    let names: Vec<String> = stream_events(&app, &processing_id)
        .await
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert!(names.contains(&"detection_update".to_string()));
    assert!(!names.contains(&"final_result".to_string()));
    assert!(!names.contains(&"db_record_created".to_string()));
    assert_eq!(names.last().map(String::as_str), Some("stream_end"));
}

#[tokio::test]
async fn decoder_failure_after_frames_marks_the_error_partial() {
    let tools = FakeVideoTools::new(2, AfterFrames::Fail("moov atom not found"));
    let app = app_with_tools(&tools).await;
    app.recognizer.answer(vec![detection("012", 0.9, 20.0)]);

    let processing_id = start_video_job(&app, "vid-broken").await;
    let snapshot = wait_terminal(&app, &processing_id).await;
    assert_eq!(snapshot["status"], "failed");
    assert!(app.repository.is_empty().await);

    let events = stream_events(&app, &processing_id).await;
    assert_eq!(
        names_without_progress(&events),
        vec!["detection_update", "detection_update", "error", "stream_end"]
    );
    let (_, error) = events.iter().find(|(name, _)| name == "error").unwrap();
    assert_eq!(error["data"]["partial"], true);
    assert_eq!(error["data"]["frames_processed"], 2);
    let message = error["data"]["message"].as_str().unwrap();
    assert!(message.contains("moov atom not found"), "{}", message);
    assert!(message.contains("nothing was recorded"), "{}", message);
}

#[tokio::test]
async fn decoder_failure_before_any_frame_is_not_partial() {
    let tools = FakeVideoTools::new(0, AfterFrames::Fail("Invalid data found"));
    let app = app_with_tools(&tools).await;

    let processing_id = start_video_job(&app, "vid-garbage").await;
    let snapshot = wait_terminal(&app, &processing_id).await;
    assert_eq!(snapshot["status"], "failed");

    let events = stream_events(&app, &processing_id).await;
    let (_, error) = events.iter().find(|(name, _)| name == "error").unwrap();
    assert_eq!(error["data"]["partial"], false);
    assert_eq!(error["data"]["frames_processed"], 0);
}
