//! Day state folding and the check-in / check-out decision table.

use crate::database::models::{AttendanceRecord, PunchType};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

pub const REASON_CHECKIN_DONE: &str = "checkin already done today";
pub const REASON_NO_CHECKIN: &str = "cannot checkout without checkin";
pub const REASON_CHECKOUT_DONE: &str = "checkout already done";
pub const REASON_ALL_DONE: &str = "both punches already done today";

const MORNING_END_SECS: u32 = 8 * 3600;
const EVENING_START_SECS: u32 = 20 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DayStatus {
    None,
    CheckinOnly,
    /// Anomalous, but representable: e.g. a check-in that was never synced here.
    CheckoutOnly,
    Complete,
}

impl DayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayStatus::None => "none",
            DayStatus::CheckinOnly => "checkin-only",
            DayStatus::CheckoutOnly => "checkout-only",
            DayStatus::Complete => "complete",
        }
    }
}

/// Derived view of one day, recomputed from the log every time it is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub first_checkin: Option<NaiveDateTime>,
    pub last_checkout: Option<NaiveDateTime>,
    pub status: DayStatus,
    /// Latest timestamp among all effective punches of the day.
    pub latest_effective: Option<NaiveDateTime>,
    /// Records for the day that exist but do not count.
    pub ineffective_count: usize,
}

impl DaySummary {
    /// Fold effective records of `date`. Order of `records` does not matter:
    /// earliest check-in and latest check-out win.
    pub fn fold<'a>(date: NaiveDate, records: impl IntoIterator<Item = &'a AttendanceRecord>) -> Self {
        let mut first_checkin: Option<NaiveDateTime> = None;
        let mut last_checkout: Option<NaiveDateTime> = None;
        let mut latest_effective: Option<NaiveDateTime> = None;
        let mut ineffective_count = 0;

        for record in records.into_iter().filter(|r| r.date == date) {
            if !record.is_effective() {
                ineffective_count += 1;
                continue;
            }

            let ts = record.timestamp;
            latest_effective = latest_effective.max(Some(ts));

            match record.effective_type() {
                PunchType::Checkin => {
                    first_checkin = Some(first_checkin.map_or(ts, |cur| cur.min(ts)));
                }
                PunchType::Checkout => {
                    last_checkout = Some(last_checkout.map_or(ts, |cur| cur.max(ts)));
                }
            }
        }

        let status = match (first_checkin.is_some(), last_checkout.is_some()) {
            (false, false) => DayStatus::None,
            (true, false) => DayStatus::CheckinOnly,
            (false, true) => DayStatus::CheckoutOnly,
            (true, true) => DayStatus::Complete,
        };

        Self {
            date,
            first_checkin,
            last_checkout,
            status,
            latest_effective,
            ineffective_count,
        }
    }

    pub fn has_checkin(&self) -> bool {
        self.first_checkin.is_some()
    }

    pub fn has_checkout(&self) -> bool {
        self.last_checkout.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub punch_type: Option<PunchType>,
    pub reason: &'static str,
}

impl Decision {
    fn punch(punch_type: PunchType) -> Self {
        Self {
            punch_type: Some(punch_type),
            reason: "ok",
        }
    }

    fn none(reason: &'static str) -> Self {
        Self {
            punch_type: None,
            reason,
        }
    }
}

/// Decide what a punch at `now` should be, given the day so far.
pub fn decide(summary: &DaySummary, now: NaiveTime) -> Decision {
    let secs = now.num_seconds_from_midnight();
    let has_in = summary.has_checkin();
    let has_out = summary.has_checkout();

    if secs < MORNING_END_SECS {
        return if has_in {
            Decision::none(REASON_CHECKIN_DONE)
        } else {
            Decision::punch(PunchType::Checkin)
        };
    }

    if secs >= EVENING_START_SECS {
        return if !has_in {
            Decision::none(REASON_NO_CHECKIN)
        } else if has_out {
            Decision::none(REASON_CHECKOUT_DONE)
        } else {
            Decision::punch(PunchType::Checkout)
        };
    }

    if !has_in {
        Decision::punch(PunchType::Checkin)
    } else if !has_out {
        Decision::punch(PunchType::Checkout)
    } else {
        Decision::none(REASON_ALL_DONE)
    }
}
