use crate::database::models::{AttendanceRecord, PunchType};
use crate::engine::context::{EngineContext, SyncTrigger};
use crate::engine::decider::{self, DaySummary};
use crate::engine::{geo, time_window};
use crate::error::{PunchError, PunchResult};
use crate::location::LocationFix;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const DEFAULT_FIX_MAX_AGE: Duration = Duration::from_secs(120);
pub const DEFAULT_FIRST_FIX_TIMEOUT: Duration = Duration::from_secs(8);

const FIRST_FIX_HINT: &str = "Location is taking a while. Make sure location services are on \
     and the device has a clear view of the sky.";

#[derive(Debug, Clone)]
pub struct PunchOutcome {
    pub record: AttendanceRecord,
    pub distance_m: f64,
}

impl PunchOutcome {
    pub fn message(&self) -> String {
        let punch_type = self.record.effective_type();
        format!(
            "{} recorded at {} ({:.0} m from the punch point)",
            capitalize(punch_type.label()),
            self.record.timestamp.format("%H:%M:%S"),
            self.distance_m
        )
    }
}

/// Runs one punch attempt end to end.
///
/// A successful attempt writes exactly one pending record; every failure path
/// returns before touching the log.
pub struct PunchExecutor {
    ctx: EngineContext,
    fix_max_age: Duration,
    first_fix_timeout: Duration,
    trigger: Option<SyncTrigger>,
    hint_shown: AtomicBool,
}

impl PunchExecutor {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            fix_max_age: DEFAULT_FIX_MAX_AGE,
            first_fix_timeout: DEFAULT_FIRST_FIX_TIMEOUT,
            trigger: None,
            hint_shown: AtomicBool::new(false),
        }
    }

    pub fn with_fix_max_age(mut self, max_age: Duration) -> Self {
        self.fix_max_age = max_age;
        self
    }

    pub fn with_first_fix_timeout(mut self, timeout: Duration) -> Self {
        self.first_fix_timeout = timeout;
        self
    }

    pub fn with_sync_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub async fn day_summary(&self, date: NaiveDate) -> PunchResult<DaySummary> {
        Ok(self.ctx.day_summary(date).await?)
    }

    pub async fn attempt_punch(
        &self,
        forced_type: Option<PunchType>,
        is_automatic: bool,
    ) -> PunchResult<PunchOutcome> {
        let now = self.ctx.clock.now();
        let summary = self.ctx.day_summary(now.date()).await?;

        let punch_type = match forced_type {
            Some(punch_type) => punch_type,
            None => {
                let decision = decider::decide(&summary, now.time());
                decision
                    .punch_type
                    .ok_or_else(|| PunchError::no_action(decision.reason))?
            }
        };

        let window_ok = if is_automatic {
            time_window::is_auto_time_allowed(punch_type, now.time())
        } else {
            time_window::is_time_allowed(punch_type, now.time())
        };
        if !window_ok {
            return Err(PunchError::OutsideTimeWindow { punch_type });
        }

        if let Some(latest) = summary.latest_effective {
            if now < latest {
                return Err(PunchError::TimeTravelRejected { latest });
            }
        }

        let settings = self.ctx.load_settings().await?;
        let anchor = settings.anchor.ok_or(PunchError::NotConfigured)?;

        let fix = self.fresh_fix().await?;
        let distance_m = geo::distance_m(anchor, fix.point);
        if !geo::in_range(distance_m, settings.radius_m) {
            return Err(PunchError::OutOfRange { distance_m });
        }

        let notes = format!(
            "{} punch: location matched, {:.0} m",
            punch_type.label(),
            distance_m
        );
        let record =
            AttendanceRecord::new_local_punch(&self.ctx.user, punch_type, now, fix.point, notes);
        self.ctx.log.put(&record).await?;

        tracing::info!(
            correlation_id = %record.correlation_id,
            punch_type = %punch_type,
            distance_m = distance_m.round(),
            automatic = is_automatic,
            "Punch recorded"
        );

        if let Some(trigger) = &self.trigger {
            trigger.fire();
        }

        Ok(PunchOutcome { record, distance_m })
    }

    /// Last known fix if fresh enough, else wait for a new one.
    async fn fresh_fix(&self) -> PunchResult<LocationFix> {
        let max_age = self.fix_max_age.as_secs();

        if let Some(fix) = self.ctx.location.current_fix() {
            if fix.age_seconds <= max_age && fix.point.is_valid() {
                return Ok(fix);
            }
            tracing::debug!(age_seconds = fix.age_seconds, "Location fix is stale");
        }

        match self.ctx.location.request_fix(self.first_fix_timeout).await {
            Some(fix) if fix.age_seconds <= max_age && fix.point.is_valid() => Ok(fix),
            _ => {
                let hint = if self.hint_shown.swap(true, Ordering::SeqCst) {
                    None
                } else {
                    tracing::info!("{}", FIRST_FIX_HINT);
                    Some(FIRST_FIX_HINT.to_string())
                };
                Err(PunchError::LocationUnavailable { hint })
            }
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{PunchStatus, SyncState};
    use crate::engine::decider::{DayStatus, REASON_ALL_DONE, REASON_NO_CHECKIN};
    use crate::location::LocationFix;
    use crate::testing::{CAFE, OFFICE, at, harness};
    use pretty_assertions::assert_eq;

    fn executor(h: &crate::testing::Harness) -> PunchExecutor {
        PunchExecutor::new(h.ctx.clone()).with_first_fix_timeout(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn manual_morning_punch_records_pending_checkin() {
        let h = harness(at(8, 55)).await;
        let outcome = executor(&h).attempt_punch(None, false).await.unwrap();

        assert_eq!(outcome.record.punch_type, Some(PunchType::Checkin));
        assert_eq!(outcome.record.status, PunchStatus::Success);
        assert_eq!(outcome.record.sync_state, SyncState::Pending);
        assert!(outcome.distance_m < 1.0);

        let stored = h.ctx.log.get(&outcome.record.correlation_id).await.unwrap().unwrap();
        assert_eq!(stored, outcome.record);
    }

    #[tokio::test]
    async fn second_call_after_day_is_complete_is_no_action() {
        let h = harness(at(8, 55)).await;
        let exec = executor(&h);
        exec.attempt_punch(None, false).await.unwrap();
        h.clock.set(at(18, 0));
        exec.attempt_punch(None, false).await.unwrap();

        let err = exec.attempt_punch(None, false).await.unwrap_err();
        match err {
            PunchError::NoActionNeeded { reason } => assert_eq!(reason, REASON_ALL_DONE),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(h.ctx.log.list_for_date(at(0, 0).date()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn evening_punch_resolves_to_checkout_after_checkin() {
        let h = harness(at(8, 30)).await;
        let exec = executor(&h);
        exec.attempt_punch(None, false).await.unwrap();

        h.clock.set(at(19, 0));
        let outcome = exec.attempt_punch(None, false).await.unwrap();
        assert_eq!(outcome.record.punch_type, Some(PunchType::Checkout));

        let summary = exec.day_summary(at(0, 0).date()).await.unwrap();
        assert_eq!(summary.status, DayStatus::Complete);
    }

    #[tokio::test]
    async fn late_punch_without_checkin_needs_nothing() {
        let h = harness(at(21, 0)).await;
        let err = executor(&h).attempt_punch(None, false).await.unwrap_err();
        match err {
            PunchError::NoActionNeeded { reason } => assert_eq!(reason, REASON_NO_CHECKIN),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn forced_checkin_before_latest_punch_is_time_travel() {
        let h = harness(at(9, 0)).await;
        let exec = executor(&h);
        exec.attempt_punch(Some(PunchType::Checkin), false).await.unwrap();

        h.clock.set(at(8, 59));
        let err = exec
            .attempt_punch(Some(PunchType::Checkin), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PunchError::TimeTravelRejected { latest } if latest == at(9, 0)));
        assert_eq!(h.ctx.log.list_for_date(at(0, 0).date()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forced_checkout_before_eight_is_outside_window() {
        let h = harness(at(7, 0)).await;
        let err = executor(&h)
            .attempt_punch(Some(PunchType::Checkout), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PunchError::OutsideTimeWindow { punch_type: PunchType::Checkout }));
    }

    #[tokio::test]
    async fn automatic_punch_outside_auto_window_is_rejected() {
        let h = harness(at(9, 0)).await;
        let err = executor(&h).attempt_punch(None, true).await.unwrap_err();
        assert!(matches!(err, PunchError::OutsideTimeWindow { .. }));
    }

    #[tokio::test]
    async fn out_of_range_writes_nothing() {
        let h = harness(at(8, 55)).await;
        h.location.set(Some(LocationFix {
            point: CAFE,
            age_seconds: 3,
        }));
        let err = executor(&h).attempt_punch(None, false).await.unwrap_err();
        match err {
            PunchError::OutOfRange { distance_m } => assert!(distance_m > 1000.0),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(h.ctx.log.list_for_date(at(0, 0).date()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_fix_is_treated_as_missing_and_hint_shows_once() {
        let h = harness(at(8, 55)).await;
        h.location.set(Some(LocationFix {
            point: OFFICE,
            age_seconds: 121,
        }));
        let exec = executor(&h);

        let first = exec.attempt_punch(None, false).await.unwrap_err();
        assert!(matches!(first, PunchError::LocationUnavailable { hint: Some(_) }));

        let second = exec.attempt_punch(None, false).await.unwrap_err();
        assert!(matches!(second, PunchError::LocationUnavailable { hint: None }));

        h.location.set(Some(LocationFix {
            point: OFFICE,
            age_seconds: 120,
        }));
        assert!(exec.attempt_punch(None, false).await.is_ok());
    }

    #[tokio::test]
    async fn missing_anchor_is_not_configured() {
        let h = harness(at(8, 55)).await;
        let mut settings = h.ctx.load_settings().await.unwrap();
        settings.anchor = None;
        h.ctx.save_settings(&settings).await.unwrap();

        let err = executor(&h).attempt_punch(None, false).await.unwrap_err();
        assert!(matches!(err, PunchError::NotConfigured));
    }

    #[tokio::test]
    async fn success_fires_sync_trigger() {
        let h = harness(at(8, 55)).await;
        let trigger = SyncTrigger::new();
        let exec = executor(&h).with_sync_trigger(trigger.clone());
        exec.attempt_punch(None, false).await.unwrap();

        tokio::time::timeout(Duration::from_millis(100), trigger.fired())
            .await
            .expect("trigger should hold a stored permit");
    }
}
