//! SQLite-backed student registry and attendance log.

pub mod migrations;
pub mod models;
pub mod schema;

pub use models::{
    AttendanceFilter, AttendanceRecord, AttendanceStatus, DailyStats, MonthlySummaryRow,
    NewStudent, RecordOutcome, Student, StudentSummary,
};

use crate::common::{AttendanceError, Result};
use crate::core::matcher::GalleryEntry;
use crate::core::recognizer::Embedding;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug)]
pub struct AttendanceStore {
    path: PathBuf,
    conn: Connection,
}

impl AttendanceStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(path, conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(PathBuf::from(":memory:"), conn)
    }

    fn init(path: PathBuf, conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::initialize_schema(&conn)?;
        tracing::info!("Attendance database ready at {}", path.display());
        Ok(Self { path, conn })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // --- students ---

    pub fn add_student(
        &self,
        student: &NewStudent,
        embedding: &[f32],
        created_at: DateTime<FixedOffset>,
    ) -> Result<()> {
        let blob = encode_embedding(embedding)?;
        let result = self.conn.execute(
            r"
            INSERT INTO students (id, name, course, embedding, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![student.id, student.name, student.course, blob, created_at.to_rfc3339()],
        );

        match result {
            Ok(_) => {
                tracing::info!("Registered student {} ({})", student.id, student.name);
                Ok(())
            }
            Err(e) if is_constraint_violation(&e) => {
                Err(AttendanceError::DuplicateStudent(student.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_student(&self, id: &str) -> Result<Student> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, course, embedding, created_at FROM students WHERE id = ?1",
                [id],
                |row| {
                    let blob: Vec<u8> = row.get(3)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        blob,
                        parse_timestamp(row.get(4)?, 4)?,
                    ))
                },
            )
            .optional()?;

        let (id, name, course, blob, created_at) =
            row.ok_or_else(|| AttendanceError::StudentNotFound(id.to_string()))?;

        Ok(Student {
            id,
            name,
            course,
            embedding: decode_embedding(&blob)?,
            created_at,
        })
    }

    pub fn student_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM students WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_students(&self) -> Result<Vec<StudentSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, course, created_at FROM students ORDER BY name COLLATE NOCASE, id",
        )?;

        let students = stmt
            .query_map([], |row| {
                Ok(StudentSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    course: row.get(2)?,
                    created_at: parse_timestamp(row.get(3)?, 3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(students)
    }

    pub fn count_students(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Change name and/or course; the embedding is untouched.
    pub fn update_student(&self, id: &str, name: Option<&str>, course: Option<&str>) -> Result<()> {
        let affected = self.conn.execute(
            r"
            UPDATE students
            SET name = COALESCE(?2, name), course = COALESCE(?3, course)
            WHERE id = ?1
            ",
            params![id, name, course],
        )?;

        if affected == 0 {
            return Err(AttendanceError::StudentNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn replace_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let blob = encode_embedding(embedding)?;
        let affected = self.conn.execute(
            "UPDATE students SET embedding = ?2 WHERE id = ?1",
            params![id, blob],
        )?;

        if affected == 0 {
            return Err(AttendanceError::StudentNotFound(id.to_string()));
        }
        tracing::info!("Replaced embedding for student {}", id);
        Ok(())
    }

    /// Remove a student together with their attendance history.
    pub fn delete_student(&self, id: &str) -> Result<()> {
        let affected = self.conn.execute("DELETE FROM students WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(AttendanceError::StudentNotFound(id.to_string()));
        }
        tracing::info!("Deleted student {}", id);
        Ok(())
    }

    /// Every decodable embedding; corrupt rows are logged and skipped.
    pub fn gallery_entries(&self) -> Result<Vec<GalleryEntry>> {
        let mut stmt = self.conn.prepare("SELECT id, name, embedding FROM students")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (student_id, name, blob) in rows {
            match decode_embedding(&blob) {
                Ok(embedding) => entries.push(GalleryEntry { student_id, name, embedding }),
                Err(e) => tracing::warn!("Skipping student {}: {}", student_id, e),
            }
        }

        tracing::info!("Loaded {} student profiles", entries.len());
        Ok(entries)
    }

    // --- attendance ---

    /// Log a sighting. Only the first sighting per student per local date is
    /// stored; later ones return `AlreadyRecorded`.
    pub fn record_attendance(
        &self,
        student_id: &str,
        at: DateTime<FixedOffset>,
        late_after: Option<NaiveTime>,
    ) -> Result<RecordOutcome> {
        if !self.student_exists(student_id)? {
            return Err(AttendanceError::StudentNotFound(student_id.to_string()));
        }

        let date = at.date_naive().format(DATE_FORMAT).to_string();
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM attendance WHERE student_id = ?1 AND date = ?2",
                params![student_id, date],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let status = match late_after {
            Some(cutoff) if at.time() > cutoff => AttendanceStatus::Late,
            _ => AttendanceStatus::Present,
        };

        let result = self.conn.execute(
            "INSERT INTO attendance (student_id, date, timestamp, status) VALUES (?1, ?2, ?3, ?4)",
            params![student_id, date, at.to_rfc3339(), status.as_str()],
        );

        match result {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                tracing::info!(
                    "Attendance recorded for {} at {} ({})",
                    student_id,
                    at.format("%H:%M:%S"),
                    status
                );
                Ok(RecordOutcome::Recorded { id, status })
            }
            Err(e) if is_constraint_violation(&e) => Ok(RecordOutcome::AlreadyRecorded),
            Err(e) => Err(e.into()),
        }
    }

    /// Joined log, newest first. Timestamps carry their own offset, so they
    /// are compared as instants rather than as text.
    pub fn attendance_log(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>> {
        let from = filter.from.map(|d| d.format(DATE_FORMAT).to_string());
        let to = filter.to.map(|d| d.format(DATE_FORMAT).to_string());
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let mut stmt = self.conn.prepare(
            r"
            SELECT a.id, a.student_id, s.name, s.course, a.date, a.timestamp, a.status
            FROM attendance a
            JOIN students s ON a.student_id = s.id
            WHERE (?1 IS NULL OR a.date >= ?1)
              AND (?2 IS NULL OR a.date <= ?2)
              AND (?3 IS NULL OR a.student_id = ?3)
            ORDER BY julianday(a.timestamp) DESC, a.id DESC
            LIMIT ?4
            ",
        )?;

        let records = stmt
            .query_map(params![from, to, filter.student_id, limit], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn daily_stats(&self, date: NaiveDate) -> Result<DailyStats> {
        let total_students = self.count_students()?;
        let (present, late): (i64, i64) = self.conn.query_row(
            r"
            SELECT COUNT(DISTINCT student_id),
                   COUNT(DISTINCT CASE WHEN status = 'late' THEN student_id END)
            FROM attendance WHERE date = ?1
            ",
            [date.format(DATE_FORMAT).to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(DailyStats {
            date,
            total_students,
            present,
            late,
            attendance_rate: models::percentage(present, total_students),
        })
    }

    pub fn monthly_summary(&self, year: i32, month: u32) -> Result<Vec<MonthlySummaryRow>> {
        let (from, to) = month_bounds(year, month)?;
        self.period_summary(from, to)
    }

    /// Per-student totals for an inclusive date range.
    pub fn period_summary(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MonthlySummaryRow>> {
        let from = from.format(DATE_FORMAT).to_string();
        let to = to.format(DATE_FORMAT).to_string();

        let school_days: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT date) FROM attendance WHERE date >= ?1 AND date <= ?2",
            params![from, to],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            r"
            SELECT s.id, s.name, s.course,
                   COUNT(a.id),
                   COALESCE(SUM(CASE WHEN a.status = 'late' THEN 1 ELSE 0 END), 0)
            FROM students s
            LEFT JOIN attendance a
              ON a.student_id = s.id AND a.date >= ?1 AND a.date <= ?2
            GROUP BY s.id, s.name, s.course
            ORDER BY s.name COLLATE NOCASE, s.id
            ",
        )?;

        let rows = stmt
            .query_map(params![from, to], |row| {
                let days_present: i64 = row.get(3)?;
                Ok(MonthlySummaryRow {
                    student_id: row.get(0)?,
                    name: row.get(1)?,
                    course: row.get(2)?,
                    days_present,
                    days_late: row.get(4)?,
                    school_days,
                    attendance_rate: models::percentage(days_present, school_days),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AttendanceRecord> {
        let date_str: String = row.get(4)?;
        let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
        let status_str: String = row.get(6)?;
        let status = status_str.parse::<AttendanceStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into())
        })?;

        Ok(AttendanceRecord {
            id: row.get(0)?,
            student_id: row.get(1)?,
            name: row.get(2)?,
            course: row.get(3)?,
            date,
            timestamp: parse_timestamp(row.get(5)?, 5)?,
            status,
        })
    }
}

/// First and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    let invalid = || AttendanceError::InvalidInput(format!("invalid month: {}-{:02}", year, month));
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    let last = next.pred_opt().ok_or_else(invalid)?;
    Ok((first, last))
}

fn parse_timestamp(value: String, column: usize) -> rusqlite::Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

pub fn encode_embedding(embedding: &[f32]) -> Result<Vec<u8>> {
    if embedding.is_empty() {
        return Err(AttendanceError::InvalidInput("embedding must not be empty".into()));
    }
    bincode::serialize(embedding)
        .map_err(|e| AttendanceError::Storage(format!("Failed to serialize embedding: {}", e)))
}

pub fn decode_embedding(blob: &[u8]) -> Result<Embedding> {
    bincode::deserialize(blob)
        .map_err(|e| AttendanceError::Storage(format!("Failed to deserialize embedding: {}", e)))
}
