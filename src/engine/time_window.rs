//! Clock-time windows for manual and automatic punches.
//!
//! All windows are closed intervals in device-local time.

use crate::database::models::PunchType;
use chrono::{NaiveTime, Timelike};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockWindow {
    start: u32,
    end: u32,
}

impl ClockWindow {
    pub const fn new(start: (u32, u32, u32), end: (u32, u32, u32)) -> Self {
        Self {
            start: start.0 * 3600 + start.1 * 60 + start.2,
            end: end.0 * 3600 + end.1 * 60 + end.2,
        }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        let secs = t.num_seconds_from_midnight();
        self.start <= secs && secs <= self.end
    }
}

pub const CHECKIN_WINDOW: ClockWindow = ClockWindow::new((0, 0, 0), (20, 0, 0));
pub const CHECKOUT_WINDOW: ClockWindow = ClockWindow::new((8, 0, 0), (23, 59, 59));
pub const CHECKIN_AUTO_WINDOW: ClockWindow = ClockWindow::new((7, 30, 0), (8, 0, 0));
pub const CHECKOUT_AUTO_WINDOW: ClockWindow = ClockWindow::new((20, 0, 0), (20, 30, 0));

/// Wide window check used by manual punches.
pub fn is_time_allowed(punch_type: PunchType, t: NaiveTime) -> bool {
    match punch_type {
        PunchType::Checkin => CHECKIN_WINDOW.contains(t),
        PunchType::Checkout => CHECKOUT_WINDOW.contains(t),
    }
}

/// Which type, if any, unattended punching should try at `t`.
pub fn auto_window(t: NaiveTime) -> Option<PunchType> {
    if CHECKIN_AUTO_WINDOW.contains(t) {
        Some(PunchType::Checkin)
    } else if CHECKOUT_AUTO_WINDOW.contains(t) {
        Some(PunchType::Checkout)
    } else {
        None
    }
}

/// Automatic punches need the narrow window first, then the wide one.
pub fn is_auto_time_allowed(punch_type: PunchType, t: NaiveTime) -> bool {
    auto_window(t) == Some(punch_type) && is_time_allowed(punch_type, t)
}
