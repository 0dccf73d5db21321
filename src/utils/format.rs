use crate::database::models::AttendanceRecord;
use crate::engine::decider::{DayStatus, DaySummary};
use crate::error::PunchError;
use crate::utils::time::{MonthKey, format_time};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineStatus {
    Complete,
    NoCheckout,
    MissingCheckin,
    /// Records exist but none of them count.
    Abnormal,
    Missed,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Complete => "complete",
            LineStatus::NoCheckout => "no checkout",
            LineStatus::MissingCheckin => "missing checkin",
            LineStatus::Abnormal => "abnormal",
            LineStatus::Missed => "missed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayLine {
    pub date: NaiveDate,
    pub status: LineStatus,
    pub time_range: String,
}

impl fmt::Display for DisplayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {:<15}  {}",
            self.date.format("%Y-%m-%d"),
            self.status.as_str(),
            self.time_range
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthReport {
    pub month: String,
    /// Newest day first.
    pub lines: Vec<DisplayLine>,
    /// Days with an effective check-in.
    pub punch_days: usize,
    pub missed_days: usize,
}

impl fmt::Display for MonthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Attendance for {}", self.month)?;
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        write!(
            f,
            "Punch days: {}  Missed days: {}",
            self.punch_days, self.missed_days
        )
    }
}

/// One line per day of `month` up to and including `today`, newest first.
pub fn month_lines(records: &[AttendanceRecord], month: MonthKey, today: NaiveDate) -> MonthReport {
    let mut by_date: BTreeMap<NaiveDate, Vec<&AttendanceRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| month.contains(r.date)) {
        by_date.entry(record.date).or_default().push(record);
    }

    let last_day = month.last_day().min(today);
    let mut lines = Vec::new();
    let mut punch_days = 0;
    let mut missed_days = 0;

    let mut day = last_day;
    while day >= month.first_day() {
        let day_records = by_date.get(&day).map(Vec::as_slice).unwrap_or_default();
        let line = day_line(day, day_records);

        if matches!(line.status, LineStatus::Complete | LineStatus::NoCheckout) {
            punch_days += 1;
        } else {
            missed_days += 1;
        }
        lines.push(line);

        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }

    MonthReport {
        month: month.to_string(),
        lines,
        punch_days,
        missed_days,
    }
}

fn day_line(date: NaiveDate, records: &[&AttendanceRecord]) -> DisplayLine {
    if records.is_empty() {
        return DisplayLine {
            date,
            status: LineStatus::Missed,
            time_range: "no records".to_string(),
        };
    }

    let summary = DaySummary::fold(date, records.iter().copied());
    let (status, time_range) = match (summary.first_checkin, summary.last_checkout) {
        (Some(i), Some(o)) => (
            LineStatus::Complete,
            format!("in {} / out {}", format_time(i), format_time(o)),
        ),
        (Some(i), None) => (LineStatus::NoCheckout, format!("in {}", format_time(i))),
        (None, Some(o)) => (LineStatus::MissingCheckin, format!("out {}", format_time(o))),
        (None, None) => {
            let mut times: Vec<_> = records.iter().map(|r| r.timestamp).collect();
            times.sort();
            let range = match (times.first(), times.last()) {
                (Some(first), Some(last)) if first != last => {
                    format!("{} - {}", format_time(*first), format_time(*last))
                }
                (Some(only), _) => format_time(*only),
                _ => String::new(),
            };
            (LineStatus::Abnormal, range)
        }
    };

    DisplayLine {
        date,
        status,
        time_range,
    }
}

pub fn format_day_summary(summary: &DaySummary) -> String {
    let mut text = format!("{}: {}\n", summary.date.format("%Y-%m-%d"), summary.status.as_str());

    match summary.first_checkin {
        Some(ts) => text.push_str(&format!("  check-in:  {}\n", format_time(ts))),
        None => text.push_str("  check-in:  -\n"),
    }
    match summary.last_checkout {
        Some(ts) => text.push_str(&format!("  check-out: {}\n", format_time(ts))),
        None => text.push_str("  check-out: -\n"),
    }

    if summary.status == DayStatus::CheckoutOnly {
        text.push_str("  check-out without check-in, request a correction\n");
    }
    if summary.ineffective_count > 0 {
        text.push_str(&format!(
            "  {} record(s) not counted\n",
            summary.ineffective_count
        ));
    }

    text
}

pub fn format_error_message(error: &str) -> String {
    format!("❌ Error: {}", error)
}

pub fn format_success_message(message: &str) -> String {
    format!("✅ {}", message)
}

pub fn format_info_message(message: &str) -> String {
    format!("ℹ️ {}", message)
}

/// Manual punch feedback. Nothing to do is informational; a refused punch
/// reads differently from a broken one.
pub fn format_punch_error(error: &PunchError) -> String {
    match error {
        PunchError::NoActionNeeded { reason } => format_info_message(reason),
        e if e.is_validation() => format!("🚫 {}", e.user_message()),
        e => format_error_message(&e.user_message()),
    }
}
