use crate::core::pipeline::{self, FrameReport, Registration};
use crate::report::{self, ReportPeriod};
use crate::service::error::ApiError;
use crate::service::live::mjpeg_part;
use crate::service::protocol::*;
use crate::service::state::AppState;
use crate::storage::{AttendanceFilter, NewStudent, StudentSummary};
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Datelike;
use futures::StreamExt;
use std::convert::Infallible;
use tracing::info;

/// Largest accepted upload (photos and frames).
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

const RECENT_LIMIT: usize = 50;
const STUDENT_HISTORY_LIMIT: usize = 30;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/dashboard", get(dashboard))
        .route("/api/students", get(list_students).post(register_student))
        .route(
            "/api/students/:id",
            get(get_student).put(update_student).delete(delete_student),
        )
        .route("/api/students/:id/photo", post(re_enroll_student))
        .route("/api/attendance", get(list_attendance))
        .route("/api/recognize", post(recognize))
        .route("/export", get(export_log))
        .route("/export/summary", get(export_summary))
        .route("/live", get(live_page))
        .route("/video_feed", get(video_feed))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let students = state.gallery()?.len();
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        students,
        live_feed: state.live_feed().is_some(),
    }))
}

async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardResponse>, ApiError> {
    let live_feed = state.live_feed().is_some();
    let today = state.pipeline.now().date_naive();

    let (stats, recent) = state
        .blocking(move |state| {
            let store = state.store()?;
            let stats = store.daily_stats(today)?;
            let recent = store.attendance_log(&AttendanceFilter {
                limit: Some(RECENT_LIMIT),
                ..Default::default()
            })?;
            Ok((stats, recent))
        })
        .await?;

    Ok(Json(DashboardResponse { today: stats, recent, live_feed }))
}

async fn list_students(State(state): State<AppState>) -> Result<Json<StudentsResponse>, ApiError> {
    let students = state.blocking(|state| state.store()?.list_students()).await?;
    Ok(Json(StudentsResponse { count: students.len(), students }))
}

/// Fields of a registration form. Text fields may come before or after the file.
#[derive(Default)]
struct UploadForm {
    student_id: Option<String>,
    name: Option<String>,
    course: Option<String>,
    file: Option<Bytes>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let field_name = field.name().unwrap_or_default().to_string();
            match field_name.as_str() {
                "student_id" | "id" => form.student_id = Some(field.text().await?),
                "name" => form.name = Some(field.text().await?),
                "course" => form.course = Some(field.text().await?),
                "file" | "photo" | "image" => form.file = Some(field.bytes().await?),
                other => tracing::debug!("Ignoring form field '{}'", other),
            }
        }
        Ok(form)
    }

    fn take_file(&mut self) -> Result<Bytes, ApiError> {
        match self.file.take() {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(ApiError::bad_request("missing photo: send it as the 'file' field")),
        }
    }
}

async fn register_student(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let photo = form.take_file()?;

    let missing = |field: &str| ApiError::bad_request(format!("missing field '{}'", field));
    let student = NewStudent {
        id: form.student_id.ok_or_else(|| missing("student_id"))?,
        name: form.name.ok_or_else(|| missing("name"))?,
        course: form.course.ok_or_else(|| missing("course"))?,
    };

    let registration = state
        .blocking(move |state| {
            pipeline::register_student(
                state.engine(),
                &state.store,
                &state.gallery,
                &state.config,
                student,
                &photo,
                state.photos_dir.as_deref(),
            )
        })
        .await?;

    info!(
        "Registered {} ({}) via API, {}",
        registration.student.name,
        registration.student.id,
        registration.quality.get_quality_assessment()
    );
    Ok((StatusCode::CREATED, Json(registration)))
}

async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StudentDetail>, ApiError> {
    let detail = state
        .blocking(move |state| {
            let store = state.store()?;
            let student = store.get_student(&id)?;
            let attendance = store.attendance_log(&AttendanceFilter {
                student_id: Some(id),
                limit: Some(STUDENT_HISTORY_LIMIT),
                ..Default::default()
            })?;
            Ok(StudentDetail {
                embedding_dim: student.embedding.len(),
                student: StudentSummary::from(&student),
                attendance,
            })
        })
        .await?;
    Ok(Json(detail))
}

async fn update_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStudentRequest>,
) -> Result<Json<StudentSummary>, ApiError> {
    let (name, course) = request.normalized().map_err(ApiError::bad_request)?;

    let student = state
        .blocking(move |state| {
            let store = state.store()?;
            store.update_student(&id, name.as_deref(), course.as_deref())?;
            pipeline::reload_gallery(&store, &state.gallery)?;
            Ok(StudentSummary::from(&store.get_student(&id)?))
        })
        .await?;
    Ok(Json(student))
}

async fn delete_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .blocking(move |state| {
            let store = state.store()?;
            store.delete_student(&id)?;
            pipeline::reload_gallery(&store, &state.gallery)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn re_enroll_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Registration>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let photo = form.take_file()?;

    let registration = state
        .blocking(move |state| {
            pipeline::re_enroll(
                state.engine(),
                &state.store,
                &state.gallery,
                &state.config,
                &id,
                &photo,
                state.photos_dir.as_deref(),
            )
        })
        .await?;
    Ok(Json(registration))
}

fn query_filter(query: AttendanceQuery) -> Result<AttendanceFilter, ApiError> {
    let period = ReportPeriod::from_params(
        query.date.as_deref(),
        query.month.as_deref(),
        query.from.as_deref(),
        query.to.as_deref(),
    )?;
    let student_id = query.student_id.filter(|s| !s.trim().is_empty());
    let mut filter = period.to_filter(student_id)?;
    filter.limit = query.limit;
    Ok(filter)
}

async fn list_attendance(
    State(state): State<AppState>,
    Query(query): Query<AttendanceQuery>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let filter = query_filter(query)?;
    let records = state
        .blocking(move |state| state.store()?.attendance_log(&filter))
        .await?;
    Ok(Json(AttendanceResponse { count: records.len(), records }))
}

/// Recognize faces in an uploaded frame and log attendance like the camera does.
async fn recognize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FrameReport>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let bytes = form.take_file()?;

    let report = state
        .blocking(move |state| {
            let frame = pipeline::decode_photo(&bytes)?;
            let gallery = state.gallery()?;
            state
                .pipeline
                .process_frame(&frame, &gallery, &state.store, state.pipeline.now())
        })
        .await?;
    Ok(Json(report))
}

fn csv_attachment(filename: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_log(
    State(state): State<AppState>,
    Query(query): Query<AttendanceQuery>,
) -> Result<Response, ApiError> {
    let filter = query_filter(query)?;
    let records = state
        .blocking(move |state| state.store()?.attendance_log(&filter))
        .await?;
    info!("Exporting {} attendance records", records.len());
    Ok(csv_attachment(report::LOG_FILENAME, report::attendance_log_csv(&records)))
}

async fn export_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Response, ApiError> {
    let (year, month) = match query.month.as_deref() {
        Some(month) => report::parse_month(month)?,
        None => {
            let today = state.pipeline.now().date_naive();
            (today.year(), today.month())
        }
    };

    let rows = state
        .blocking(move |state| state.store()?.monthly_summary(year, month))
        .await?;
    Ok(csv_attachment(
        &report::summary_filename(year, month),
        report::monthly_summary_csv(&rows),
    ))
}

async fn live_page() -> Html<&'static str> {
    Html(LIVE_PAGE)
}

async fn video_feed(State(state): State<AppState>) -> Result<Response, ApiError> {
    let receiver = state
        .live_feed()
        .ok_or_else(|| ApiError::unavailable("live camera feed is not running"))?;

    // Ends when the camera thread drops its sender
    let frames = futures::stream::unfold(receiver, |mut rx| async move {
        rx.changed().await.ok()?;
        let frame = rx.borrow_and_update().clone();
        Some((frame, rx))
    })
    .filter_map(|frame| async move { frame })
    .map(|jpeg| Ok::<_, Infallible>(mjpeg_part(&jpeg)));

    Response::builder()
        .header(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .map_err(|e| ApiError::internal(e.to_string()))
}

const LIVE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Live attendance</title></head>
<body>
<h1>Live attendance</h1>
<img src="/video_feed" alt="camera feed">
<p><a href="/api/dashboard">Today</a> | <a href="/export">Download CSV</a></p>
</body>
</html>
"#;
