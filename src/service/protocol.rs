use crate::storage::{AttendanceRecord, DailyStats, StudentSummary};
use serde::{Deserialize, Serialize};

// Request types

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateStudentRequest {
    pub name: Option<String>,
    pub course: Option<String>,
}

impl UpdateStudentRequest {
    /// Trimmed values; blanks are rejected rather than stored.
    pub fn normalized(self) -> Result<(Option<String>, Option<String>), String> {
        let clean = |field: &str, value: Option<String>| -> Result<Option<String>, String> {
            match value.map(|v| v.trim().to_string()) {
                Some(v) if v.is_empty() => Err(format!("{} must not be empty", field)),
                other => Ok(other),
            }
        };
        let name = clean("name", self.name)?;
        let course = clean("course", self.course)?;
        if name.is_none() && course.is_none() {
            return Err("nothing to update: give name and/or course".to_string());
        }
        Ok((name, course))
    }
}

/// Filters shared by `/api/attendance` and `/export`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AttendanceQuery {
    pub date: Option<String>,
    pub month: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub student_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SummaryQuery {
    /// `YYYY-MM`; defaults to the current month
    pub month: Option<String>,
}

// Response types

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub students: usize,
    pub live_feed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StudentsResponse {
    pub count: usize,
    pub students: Vec<StudentSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StudentDetail {
    #[serde(flatten)]
    pub student: StudentSummary,
    pub embedding_dim: usize,
    pub attendance: Vec<AttendanceRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AttendanceResponse {
    pub count: usize,
    pub records: Vec<AttendanceRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DashboardResponse {
    pub today: DailyStats,
    pub recent: Vec<AttendanceRecord>,
    pub live_feed: bool,
}
