use crate::core::recognizer::Embedding;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub course: String,
    pub embedding: Embedding,
    pub created_at: DateTime<FixedOffset>,
}

/// Student without the embedding, as listed by the API and CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub id: String,
    pub name: String,
    pub course: String,
    pub created_at: DateTime<FixedOffset>,
}

impl From<&Student> for StudentSummary {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id.clone(),
            name: student.name.clone(),
            course: student.course.clone(),
            created_at: student.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub id: String,
    pub name: String,
    pub course: String,
}

impl NewStudent {
    /// Trim every field and reject blanks.
    pub fn normalized(self) -> Result<Self, String> {
        let id = self.id.trim().to_string();
        let name = self.name.trim().to_string();
        let course = self.course.trim().to_string();

        for (field, value) in [("student_id", &id), ("name", &name), ("course", &course)] {
            if value.is_empty() {
                return Err(format!("{} must not be empty", field));
            }
        }
        if id.len() > 64 {
            return Err("student_id must be at most 64 characters".to_string());
        }

        Ok(Self { id, name, course })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "late" => Ok(AttendanceStatus::Late),
            other => Err(format!("unknown attendance status: {}", other)),
        }
    }
}

/// An attendance row joined with the student's details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: String,
    pub name: String,
    pub course: String,
    pub date: NaiveDate,
    pub timestamp: DateTime<FixedOffset>,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded { id: i64, status: AttendanceStatus },
    AlreadyRecorded,
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded { .. })
    }
}

/// Inclusive date range plus optional student; empty means everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub student_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_students: i64,
    pub present: i64,
    pub late: i64,
    /// Percentage of registered students seen today, one decimal place
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummaryRow {
    pub student_id: String,
    pub name: String,
    pub course: String,
    /// Days attended, late arrivals included
    pub days_present: i64,
    pub days_late: i64,
    /// Days in the month on which anyone was recorded
    pub school_days: i64,
    pub attendance_rate: f64,
}

pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 1000.0).round() / 10.0
}
