use anyhow::Result;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Source of "now" in device-local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to. Used by simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Calendar month, rendered as `YYYY-MM` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(anyhow::anyhow!("Invalid month: {}-{}", year, month));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        let next = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        };
        next.and_then(|d| d.pred_opt()).unwrap_or_default()
    }

    pub fn days_in_month(&self) -> u32 {
        self.last_day().day()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("Invalid month format. Use YYYY-MM"))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(anyhow::anyhow!("Invalid month format. Use YYYY-MM"));
        }
        let year: i32 = year.parse()?;
        let month: u32 = month.parse()?;
        Self::new(year, month)
    }
}

pub fn parse_time_string(time_str: &str) -> Result<NaiveTime> {
    let time_str = time_str.trim();

    if let Ok(time) = NaiveTime::parse_from_str(time_str, "%H:%M") {
        return Ok(time);
    }

    if let Ok(time) = NaiveTime::parse_from_str(time_str, "%H:%M:%S") {
        return Ok(time);
    }

    Err(anyhow::anyhow!("Invalid time format. Use HH:MM or HH:MM:SS"))
}

pub fn parse_date_string(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date format. Use YYYY-MM-DD"))
}

/// Accepts the timestamp shapes servers send back: RFC 3339, or naive ISO with
/// `T` or space separator. Offsets are converted to device-local time.
pub fn parse_remote_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

pub fn format_time(datetime: NaiveDateTime) -> String {
    datetime.format("%H:%M").to_string()
}

pub fn format_datetime(datetime: NaiveDateTime) -> String {
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_key_parses_and_bounds() {
        let month: MonthKey = "2024-02".parse().unwrap();
        assert_eq!(month.to_string(), "2024-02");
        assert_eq!(month.days_in_month(), 29);
        assert_eq!(month.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let december: MonthKey = "2025-12".parse().unwrap();
        assert_eq!(december.last_day(), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert!(december.contains(NaiveDate::from_ymd_opt(2025, 12, 5).unwrap()));

        assert!("2025-13".parse::<MonthKey>().is_err());
        assert!("2025-1".parse::<MonthKey>().is_err());
        assert!("202512".parse::<MonthKey>().is_err());
    }

    #[test]
    fn parse_time_accepts_both_formats() {
        assert_eq!(parse_time_string("07:30").unwrap(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(parse_time_string(" 20:30:15 ").unwrap(), NaiveTime::from_hms_opt(20, 30, 15).unwrap());
        assert!(parse_time_string("7h30").is_err());
    }

    #[test]
    fn remote_timestamps_in_naive_forms() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(8, 1, 2).unwrap();
        assert_eq!(parse_remote_timestamp("2026-03-02T08:01:02"), Some(expected));
        assert_eq!(parse_remote_timestamp("2026-03-02 08:01:02.000"), Some(expected));
        assert_eq!(parse_remote_timestamp(""), None);
        assert_eq!(parse_remote_timestamp("yesterday"), None);
    }

    #[test]
    fn manual_clock_advances() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(7, 30, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(format_time(clock.now()), "07:35");
        assert_eq!(clock.today(), start.date());
    }
}
