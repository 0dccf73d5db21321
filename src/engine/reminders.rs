//! Once-a-day nudges derived from the day summary.

use crate::engine::context::EngineContext;
use anyhow::Result;
use chrono::NaiveTime;

const CHECKIN_REMINDER_FROM: (u32, u32) = (7, 30);
const CHECKOUT_REMINDER_FROM: (u32, u32) = (20, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reminder {
    Checkin,
    Checkout,
    /// No check-in by the deadline: ask for a correction or give up the day.
    Correction { deadline: NaiveTime },
}

impl Reminder {
    pub fn message(&self, username: &str) -> String {
        match self {
            Reminder::Checkin => "Remember to check in for work.".to_string(),
            Reminder::Checkout => "Remember to check out.".to_string(),
            Reminder::Correction { deadline } => format!(
                "{} has no check-in today after {}. Request a correction or skip the day.",
                username,
                deadline.format("%H:%M")
            ),
        }
    }
}

fn hm(t: (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(t.0, t.1, 0).unwrap_or_default()
}

/// Reminders due now. Each kind fires at most once per day; the sent date is
/// persisted before returning.
pub async fn due_reminders(ctx: &EngineContext) -> Result<Vec<Reminder>> {
    let now = ctx.clock.now();
    let today = now.date();
    let t = now.time();

    let summary = ctx.day_summary(today).await?;
    let mut settings = ctx.load_settings().await?;
    let mut due = Vec::new();

    if t >= hm(CHECKIN_REMINDER_FROM)
        && !summary.has_checkin()
        && settings.last_checkin_reminder != Some(today)
    {
        settings.last_checkin_reminder = Some(today);
        due.push(Reminder::Checkin);
    }

    if t >= hm(CHECKOUT_REMINDER_FROM)
        && summary.has_checkin()
        && !summary.has_checkout()
        && settings.last_checkout_reminder != Some(today)
    {
        settings.last_checkout_reminder = Some(today);
        due.push(Reminder::Checkout);
    }

    if t > settings.punch_deadline
        && !summary.has_checkin()
        && settings.last_correction_reminder != Some(today)
    {
        settings.last_correction_reminder = Some(today);
        due.push(Reminder::Correction {
            deadline: settings.punch_deadline,
        });
    }

    if !due.is_empty() {
        ctx.save_settings(&settings).await?;
    }

    Ok(due)
}
