//! CSV exports and the date periods they cover.

pub mod csv;

pub use self::csv::{attendance_log_csv, monthly_summary_csv};

use crate::common::{AttendanceError, Result};
use crate::storage::{month_bounds, AttendanceFilter};
use chrono::{Datelike, NaiveDate};

pub const LOG_FILENAME: &str = "attendance_report.csv";

/// Date range a report or log query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportPeriod {
    #[default]
    All,
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Range { from: Option<NaiveDate>, to: Option<NaiveDate> },
}

impl ReportPeriod {
    /// Build from query parameters. `date`, `month` and `from`/`to` are
    /// mutually exclusive; none of them means the whole history.
    pub fn from_params(
        date: Option<&str>,
        month: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Self> {
        let ranged = from.is_some() || to.is_some();
        let given = [date.is_some(), month.is_some(), ranged]
            .iter()
            .filter(|set| **set)
            .count();
        if given > 1 {
            return Err(AttendanceError::InvalidInput(
                "use only one of date, month or from/to".to_string(),
            ));
        }

        if let Some(date) = date {
            return Ok(ReportPeriod::Day(parse_date("date", date)?));
        }
        if let Some(month) = month {
            let (year, month) = parse_month(month)?;
            return Ok(ReportPeriod::Month { year, month });
        }
        if ranged {
            let from = from.map(|d| parse_date("from", d)).transpose()?;
            let to = to.map(|d| parse_date("to", d)).transpose()?;
            if let (Some(f), Some(t)) = (from, to) {
                if f > t {
                    return Err(AttendanceError::InvalidInput(format!(
                        "from ({}) is after to ({})",
                        f, t
                    )));
                }
            }
            return Ok(ReportPeriod::Range { from, to });
        }

        Ok(ReportPeriod::All)
    }

    /// Inclusive bounds; `None` is open-ended.
    pub fn bounds(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        match *self {
            ReportPeriod::All => Ok((None, None)),
            ReportPeriod::Day(date) => Ok((Some(date), Some(date))),
            ReportPeriod::Month { year, month } => {
                let (first, last) = month_bounds(year, month)?;
                Ok((Some(first), Some(last)))
            }
            ReportPeriod::Range { from, to } => Ok((from, to)),
        }
    }

    pub fn to_filter(&self, student_id: Option<String>) -> Result<AttendanceFilter> {
        let (from, to) = self.bounds()?;
        Ok(AttendanceFilter {
            from,
            to,
            student_id,
            limit: None,
        })
    }
}

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        AttendanceError::InvalidInput(format!("{} must be YYYY-MM-DD, got '{}'", field, value))
    })
}

/// Parse `YYYY-MM` into (year, month).
pub fn parse_month(value: &str) -> Result<(i32, u32)> {
    let first = NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d")
        .map_err(|_| {
            AttendanceError::InvalidInput(format!("month must be YYYY-MM, got '{}'", value))
        })?;
    Ok((first.year(), first.month()))
}

pub fn summary_filename(year: i32, month: u32) -> String {
    format!("attendance_summary_{}-{:02}.csv", year, month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn no_params_means_everything() {
        let period = ReportPeriod::from_params(None, None, None, None).unwrap();
        assert_eq!(period, ReportPeriod::All);
        assert_eq!(period.bounds().unwrap(), (None, None));
    }

    #[test]
    fn single_day_and_month() {
        let day = ReportPeriod::from_params(Some("2026-10-05"), None, None, None).unwrap();
        assert_eq!(day.bounds().unwrap(), (Some(d(2026, 10, 5)), Some(d(2026, 10, 5))));

        let month = ReportPeriod::from_params(None, Some("2026-02"), None, None).unwrap();
        assert_eq!(month, ReportPeriod::Month { year: 2026, month: 2 });
        assert_eq!(month.bounds().unwrap(), (Some(d(2026, 2, 1)), Some(d(2026, 2, 28))));
    }

    #[test]
    fn open_ended_range() {
        let period = ReportPeriod::from_params(None, None, Some("2026-10-01"), None).unwrap();
        let filter = period.to_filter(Some("S1".into())).unwrap();
        assert_eq!(filter.from, Some(d(2026, 10, 1)));
        assert_eq!(filter.to, None);
        assert_eq!(filter.student_id.as_deref(), Some("S1"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ReportPeriod::from_params(Some("05/10/2026"), None, None, None).is_err());
        assert!(ReportPeriod::from_params(None, Some("2026-13"), None, None).is_err());
        assert!(ReportPeriod::from_params(Some("2026-10-05"), Some("2026-10"), None, None).is_err());
        assert!(
            ReportPeriod::from_params(None, None, Some("2026-10-09"), Some("2026-10-01")).is_err()
        );
    }

    #[test]
    fn summary_filename_pads_month() {
        assert_eq!(summary_filename(2026, 3), "attendance_summary_2026-03.csv");
    }
}
