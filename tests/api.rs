mod common;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use chrono::TimeZone;
use common::{photo, png, test_state};
use serde_json::{json, Value};

const RED: [u8; 3] = [200, 40, 40];
const BLUE: [u8; 3] = [40, 40, 200];
const GREEN: [u8; 3] = [40, 200, 40];

fn server() -> TestServer {
    TestServer::new(face_attendance::service::app(test_state())).expect("test server")
}

fn image_part(color: [u8; 3]) -> Part {
    Part::bytes(png(&photo(color)))
        .file_name("photo.png")
        .mime_type("image/png")
}

fn registration_form(id: &str, name: &str, color: [u8; 3]) -> MultipartForm {
    MultipartForm::new()
        .add_text("student_id", id)
        .add_text("name", name)
        .add_text("course", "BSc Computer Science")
        .add_part("file", image_part(color))
}

async fn register(server: &TestServer, id: &str, name: &str, color: [u8; 3]) -> Value {
    let response = server
        .post("/api/students")
        .multipart(registration_form(id, name, color))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

async fn recognize(server: &TestServer, color: [u8; 3]) -> Value {
    let response = server
        .post("/api/recognize")
        .multipart(MultipartForm::new().add_part("file", image_part(color)))
        .await;
    response.assert_status_ok();
    response.json::<Value>()
}

#[tokio::test]
async fn health_reports_gallery_size() {
    let server = server();
    let body = server.get("/healthz").await.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["students"], 0);
    assert_eq!(body["live_feed"], false);

    register(&server, "S001", "Asha Rao", RED).await;
    let body = server.get("/healthz").await.json::<Value>();
    assert_eq!(body["students"], 1);
}

#[tokio::test]
async fn register_and_list_students() {
    let server = server();
    let created = register(&server, " S001 ", "Asha Rao", RED).await;
    assert_eq!(created["student"]["id"], "S001", "id is trimmed");
    assert_eq!(created["faces_detected"], 1);
    assert!(created["quality"]["overall_score"].as_f64().unwrap() > 0.1);

    register(&server, "S002", "Bilal Khan", BLUE).await;

    let list = server.get("/api/students").await.json::<Value>();
    assert_eq!(list["count"], 2);
    assert_eq!(list["students"][0]["name"], "Asha Rao");

    let detail = server.get("/api/students/S002").await.json::<Value>();
    assert_eq!(detail["course"], "BSc Computer Science");
    assert_eq!(detail["embedding_dim"], 3);
    assert_eq!(detail["attendance"], json!([]));
}

#[tokio::test]
async fn registration_errors_map_to_status_codes() {
    let server = server();
    register(&server, "S001", "Asha Rao", RED).await;

    server
        .post("/api/students")
        .multipart(registration_form("S001", "Someone Else", GREEN))
        .await
        .assert_status(StatusCode::CONFLICT);

    let no_file = MultipartForm::new()
        .add_text("student_id", "S002")
        .add_text("name", "No Photo")
        .add_text("course", "BSc");
    server
        .post("/api/students")
        .multipart(no_file)
        .await
        .assert_status_bad_request();

    let blank_name = registration_form("S003", "   ", GREEN);
    server
        .post("/api/students")
        .multipart(blank_name)
        .await
        .assert_status_bad_request();

    let garbage = MultipartForm::new()
        .add_text("student_id", "S004")
        .add_text("name", "Garbage")
        .add_text("course", "BSc")
        .add_part("file", Part::bytes(b"not an image".to_vec()).file_name("x.png"));
    server
        .post("/api/students")
        .multipart(garbage)
        .await
        .assert_status_bad_request();

    let no_face = MultipartForm::new()
        .add_text("student_id", "S005")
        .add_text("name", "Dark Room")
        .add_text("course", "BSc")
        .add_part("file", image_part([0, 0, 0]));
    let response = server.post("/api/students").multipart(no_face).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("No face"));
}

#[tokio::test]
async fn recognition_records_once_per_day() {
    let server = server();
    register(&server, "S001", "Asha Rao", RED).await;

    let first = recognize(&server, RED).await;
    let face = &first["faces"][0];
    assert_eq!(face["student_id"], "S001");
    assert_eq!(face["name"], "Asha Rao");
    assert_eq!(face["recorded"], true);
    assert_eq!(face["status"], "present");

    let second = recognize(&server, RED).await;
    assert_eq!(second["faces"][0]["student_id"], "S001");
    assert_eq!(second["faces"][0]["recorded"], false);

    let log = server.get("/api/attendance").await.json::<Value>();
    assert_eq!(log["count"], 1);
    assert_eq!(log["records"][0]["student_id"], "S001");
    assert_eq!(log["records"][0]["course"], "BSc Computer Science");

    let dashboard = server.get("/api/dashboard").await.json::<Value>();
    assert_eq!(dashboard["today"]["total_students"], 1);
    assert_eq!(dashboard["today"]["present"], 1);
    assert_eq!(dashboard["today"]["attendance_rate"], 100.0);
    assert_eq!(dashboard["recent"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn dashboard_recent_spans_earlier_days() {
    let state = test_state();
    let server = TestServer::new(face_attendance::service::app(state.clone())).expect("test server");
    register(&server, "S001", "Asha Rao", RED).await;

    let offset = state.config.attendance.offset().unwrap();
    let earlier = offset.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
    state
        .store()
        .unwrap()
        .record_attendance("S001", earlier, None)
        .unwrap();

    let dashboard = server.get("/api/dashboard").await.json::<Value>();
    assert_eq!(dashboard["today"]["present"], 0);
    let recent = dashboard["recent"].as_array().unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["date"], "2026-01-05");
}

#[tokio::test]
async fn unknown_faces_are_not_recorded() {
    let server = server();
    register(&server, "S001", "Asha Rao", RED).await;

    let report = recognize(&server, GREEN).await;
    assert_eq!(report["faces"].as_array().unwrap().len(), 1);
    assert!(report["faces"][0]["student_id"].is_null());
    assert_eq!(report["faces"][0]["recorded"], false);

    let log = server.get("/api/attendance").await.json::<Value>();
    assert_eq!(log["count"], 0);
}

#[tokio::test]
async fn attendance_filters() {
    let server = server();
    register(&server, "S001", "Asha Rao", RED).await;
    register(&server, "S002", "Bilal Khan", BLUE).await;
    recognize(&server, RED).await;
    recognize(&server, BLUE).await;

    let only_bilal = server
        .get("/api/attendance")
        .add_query_param("student_id", "S002")
        .await
        .json::<Value>();
    assert_eq!(only_bilal["count"], 1);
    assert_eq!(only_bilal["records"][0]["name"], "Bilal Khan");

    let long_ago = server
        .get("/api/attendance")
        .add_query_param("date", "2001-01-01")
        .await
        .json::<Value>();
    assert_eq!(long_ago["count"], 0);

    server
        .get("/api/attendance")
        .add_query_param("date", "2026-10-05")
        .add_query_param("month", "2026-10")
        .await
        .assert_status_bad_request();

    server
        .get("/api/attendance")
        .add_query_param("month", "October")
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn csv_exports() {
    let server = server();
    register(&server, "S001", "Rao, Asha", RED).await;
    recognize(&server, RED).await;

    let response = server.get("/export").await;
    response.assert_status_ok();
    let disposition = response.header("content-disposition");
    assert!(disposition.to_str().unwrap().contains("attendance_report.csv"));
    assert!(response
        .header("content-type")
        .to_str()
        .unwrap()
        .starts_with("text/csv"));

    let csv = response.text();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Date,Timestamp,Student ID,Name,Course,Status");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains(",S001,\"Rao, Asha\",BSc Computer Science,present"));

    let summary = server
        .get("/export/summary")
        .add_query_param("month", "2001-01")
        .await;
    summary.assert_status_ok();
    assert!(summary
        .header("content-disposition")
        .to_str()
        .unwrap()
        .contains("attendance_summary_2001-01.csv"));
    let text = summary.text();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("Student ID,Name,Course,Days Present,Days Late,School Days,Attendance %")
    );
    assert_eq!(lines.next(), Some("S001,\"Rao, Asha\",BSc Computer Science,0,0,0,0.0"));
}

#[tokio::test]
async fn update_student_metadata() {
    let server = server();
    register(&server, "S001", "Asha Rao", RED).await;

    let updated = server
        .put("/api/students/S001")
        .json(&json!({ "course": "MSc Data Science" }))
        .await
        .json::<Value>();
    assert_eq!(updated["name"], "Asha Rao");
    assert_eq!(updated["course"], "MSc Data Science");

    server
        .put("/api/students/S001")
        .json(&json!({ "name": "  " }))
        .await
        .assert_status_bad_request();

    server
        .put("/api/students/S999")
        .json(&json!({ "name": "Ghost" }))
        .await
        .assert_status_not_found();

    // The gallery follows the rename
    server
        .put("/api/students/S001")
        .json(&json!({ "name": "Asha R." }))
        .await
        .assert_status_ok();
    let report = recognize(&server, RED).await;
    assert_eq!(report["faces"][0]["name"], "Asha R.");
}

#[tokio::test]
async fn re_enroll_replaces_face() {
    let server = server();
    register(&server, "S001", "Asha Rao", RED).await;

    let response = server
        .post("/api/students/S001/photo")
        .multipart(MultipartForm::new().add_part("file", image_part(GREEN)))
        .await;
    response.assert_status_ok();

    let old_face = recognize(&server, RED).await;
    assert!(old_face["faces"][0]["student_id"].is_null());
    let new_face = recognize(&server, GREEN).await;
    assert_eq!(new_face["faces"][0]["student_id"], "S001");

    server
        .post("/api/students/S404/photo")
        .multipart(MultipartForm::new().add_part("file", image_part(GREEN)))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn delete_student_removes_history() {
    let server = server();
    register(&server, "S001", "Asha Rao", RED).await;
    recognize(&server, RED).await;

    server
        .delete("/api/students/S001")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    server.get("/api/students/S001").await.assert_status_not_found();
    server.delete("/api/students/S001").await.assert_status_not_found();

    let log = server.get("/api/attendance").await.json::<Value>();
    assert_eq!(log["count"], 0);

    let report = recognize(&server, RED).await;
    assert!(report["faces"][0]["student_id"].is_null());
}

#[tokio::test]
async fn live_endpoints_without_camera() {
    let server = server();

    let page = server.get("/live").await;
    page.assert_status_ok();
    assert!(page.text().contains("/video_feed"));

    server
        .get("/video_feed")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}
