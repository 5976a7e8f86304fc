use crate::storage::{AttendanceRecord, MonthlySummaryRow};
use std::io::{self, Write};

pub const LOG_HEADER: [&str; 6] = ["Date", "Timestamp", "Student ID", "Name", "Course", "Status"];

pub const SUMMARY_HEADER: [&str; 7] = [
    "Student ID",
    "Name",
    "Course",
    "Days Present",
    "Days Late",
    "School Days",
    "Attendance %",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Attendance log rows in the order given (the store returns newest first).
pub fn write_attendance_log<W: Write>(out: &mut W, records: &[AttendanceRecord]) -> io::Result<()> {
    write_row(out, LOG_HEADER)?;
    for record in records {
        write_row(
            out,
            [
                record.date.to_string().as_str(),
                record.timestamp.format(TIMESTAMP_FORMAT).to_string().as_str(),
                record.student_id.as_str(),
                record.name.as_str(),
                record.course.as_str(),
                record.status.as_str(),
            ],
        )?;
    }
    Ok(())
}

pub fn write_monthly_summary<W: Write>(out: &mut W, rows: &[MonthlySummaryRow]) -> io::Result<()> {
    write_row(out, SUMMARY_HEADER)?;
    for row in rows {
        write_row(
            out,
            [
                row.student_id.as_str(),
                row.name.as_str(),
                row.course.as_str(),
                row.days_present.to_string().as_str(),
                row.days_late.to_string().as_str(),
                row.school_days.to_string().as_str(),
                format!("{:.1}", row.attendance_rate).as_str(),
            ],
        )?;
    }
    Ok(())
}

pub fn attendance_log_csv(records: &[AttendanceRecord]) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail
    let _ = write_attendance_log(&mut buf, records);
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn monthly_summary_csv(rows: &[MonthlySummaryRow]) -> String {
    let mut buf = Vec::new();
    let _ = write_monthly_summary(&mut buf, rows);
    String::from_utf8_lossy(&buf).into_owned()
}

fn write_row<'a, W, I>(out: &mut W, fields: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a str>,
{
    let line = fields.into_iter().map(escape_field).collect::<Vec<_>>().join(",");
    out.write_all(line.as_bytes())?;
    out.write_all(b"\r\n")
}

/// Quote a field when it contains a delimiter, quote or line break.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AttendanceStatus;
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    fn record(name: &str, status: AttendanceStatus) -> AttendanceRecord {
        let ist = FixedOffset::east_opt(330 * 60).unwrap();
        AttendanceRecord {
            id: 1,
            student_id: "S001".into(),
            name: name.into(),
            course: "BSc CS".into(),
            date: NaiveDate::from_ymd_opt(2026, 10, 5).unwrap(),
            timestamp: ist.with_ymd_and_hms(2026, 10, 5, 9, 3, 7).unwrap(),
            status,
        }
    }

    #[test]
    fn escapes_only_when_needed() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("Doe, Jane"), "\"Doe, Jane\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn log_has_header_and_local_timestamps() {
        let csv = attendance_log_csv(&[
            record("Asha", AttendanceStatus::Present),
            record("Doe, Jane", AttendanceStatus::Late),
        ]);
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(lines[0], "Date,Timestamp,Student ID,Name,Course,Status");
        assert_eq!(lines[1], "2026-10-05,2026-10-05 09:03:07,S001,Asha,BSc CS,present");
        assert_eq!(lines[2], "2026-10-05,2026-10-05 09:03:07,S001,\"Doe, Jane\",BSc CS,late");
        assert_eq!(lines[3], "");
    }

    #[test]
    fn empty_log_is_just_the_header() {
        assert_eq!(attendance_log_csv(&[]), "Date,Timestamp,Student ID,Name,Course,Status\r\n");
    }

    #[test]
    fn summary_formats_percentages() {
        let csv = monthly_summary_csv(&[MonthlySummaryRow {
            student_id: "S001".into(),
            name: "Asha".into(),
            course: "BSc CS".into(),
            days_present: 2,
            days_late: 1,
            school_days: 3,
            attendance_rate: 66.7,
        }]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Student ID,Name,Course,Days Present,Days Late,School Days,Attendance %")
        );
        assert_eq!(lines.next(), Some("S001,Asha,BSc CS,2,1,3,66.7"));
    }
}
