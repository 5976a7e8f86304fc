mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{photo, png, test_state};
use face_attendance::camera::FrameLoop;
use face_attendance::common::config::CameraConfig;
use face_attendance::core::pipeline;
use face_attendance::service::{self, AppState, LiveFeed, LiveWorker};
use face_attendance::storage::{AttendanceFilter, NewStudent};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn worker(state: &AppState) -> LiveWorker {
    LiveWorker {
        pipeline: Arc::clone(&state.pipeline),
        store: Arc::clone(&state.store),
        gallery: Arc::clone(&state.gallery),
        recognition: state.config.recognition.clone(),
    }
}

const RED: [u8; 3] = [200, 40, 40];

#[tokio::test]
async fn live_feed_publishes_frames_and_marks_attendance() {
    let state = test_state();
    pipeline::register_student(
        state.engine(),
        &state.store,
        &state.gallery,
        &state.config,
        NewStudent {
            id: "S001".into(),
            name: "Asha Rao".into(),
            course: "BSc".into(),
        },
        &png(&photo(RED)),
        None,
    )
    .unwrap();

    let feed = LiveFeed::spawn_source(
        FrameLoop::new(vec![photo(RED)]).unwrap(),
        worker(&state),
    );

    let mut frames = feed.subscribe();
    tokio::time::timeout(Duration::from_secs(10), frames.changed())
        .await
        .expect("a frame within the timeout")
        .expect("sender alive");
    let jpeg = frames.borrow_and_update().clone().expect("published frame");
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    // Let a few more frames through; the record must stay unique
    for _ in 0..3 {
        let _ = tokio::time::timeout(Duration::from_secs(2), frames.changed()).await;
    }

    tokio::task::spawn_blocking(move || feed.stop()).await.unwrap();

    let records = state
        .store()
        .unwrap()
        .attendance_log(&AttendanceFilter::default())
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].student_id, "S001");
}

#[tokio::test]
async fn stopped_feed_closes_the_channel() {
    let state = test_state();
    let feed = LiveFeed::spawn_source(
        FrameLoop::new(vec![photo([0, 0, 0])]).unwrap(),
        worker(&state),
    );
    let mut frames = feed.subscribe();

    tokio::task::spawn_blocking(move || feed.stop()).await.unwrap();

    // Drain whatever was published before the stop, then the sender is gone
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while frames.changed().await.is_ok() {}
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn endpoints_follow_the_camera_thread() {
    let state = test_state();
    let feed = LiveFeed::spawn_source(FrameLoop::new(vec![photo(RED)]).unwrap(), worker(&state));
    let state = state.with_live_feed(feed.subscribe());
    let server = TestServer::new(service::app(state)).expect("test server");

    let health = server.get("/healthz").await.json::<Value>();
    assert_eq!(health["live_feed"], true);

    tokio::task::spawn_blocking(move || feed.stop()).await.unwrap();

    let health = server.get("/healthz").await.json::<Value>();
    assert_eq!(health["live_feed"], false);
    server
        .get("/video_feed")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn missing_camera_is_reported_at_startup() {
    let state = test_state();
    let camera = CameraConfig {
        device_index: 250,
        ..CameraConfig::default()
    };

    let opened = tokio::task::spawn_blocking(move || LiveFeed::spawn_camera(camera, worker(&state)))
        .await
        .unwrap();
    assert!(opened.is_err());
}
