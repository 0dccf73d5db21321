//! Unattended punching with a persisted per-day retry budget.

use crate::database::models::PunchType;
use crate::engine::executor::{PunchExecutor, PunchOutcome};
use crate::engine::time_window;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_ATTEMPT_SPACING: Duration = Duration::from_secs(5 * 60);

/// Run `task` every `period` on its own task until the handle is aborted.
///
/// The first run happens immediately. Late ticks are skipped, not bunched.
pub fn every<F, Fut>(period: Duration, task: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    every_after(Duration::ZERO, period, task)
}

/// Like [`every`], with the first run after `delay`.
pub fn every_after<F, Fut>(delay: Duration, period: Duration, mut task: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + delay;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            task().await;
        }
    })
}

#[derive(Debug)]
pub enum TickOutcome {
    Disabled,
    /// Not inside an auto-window.
    Idle,
    /// The target punch is already done, or a check-out has no check-in.
    NothingToDo(PunchType),
    BudgetExhausted(PunchType),
    /// Last attempt was less than the spacing ago.
    Waiting(PunchType),
    Punched(PunchOutcome),
    /// Attempt made and slot consumed, but the punch failed.
    Failed {
        punch_type: PunchType,
        reason: String,
    },
}

pub struct AutoPunchScheduler {
    executor: Arc<PunchExecutor>,
    max_attempts: u32,
    spacing: Duration,
}

impl AutoPunchScheduler {
    pub fn new(executor: Arc<PunchExecutor>) -> Self {
        Self {
            executor,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            spacing: DEFAULT_ATTEMPT_SPACING,
        }
    }

    /// One scheduler tick. Punch failures are swallowed; only storage errors
    /// reading settings or the budget come back as `Err`.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let ctx = self.executor.context();
        let now = ctx.clock.now();

        let settings = ctx.load_settings().await?;
        if !settings.auto_punch_enabled {
            return Ok(TickOutcome::Disabled);
        }

        let Some(target) = time_window::auto_window(now.time()) else {
            return Ok(TickOutcome::Idle);
        };

        let summary = ctx.day_summary(now.date()).await?;
        let nothing_to_do = match target {
            PunchType::Checkin => summary.has_checkin(),
            PunchType::Checkout => !summary.has_checkin() || summary.has_checkout(),
        };
        if nothing_to_do {
            return Ok(TickOutcome::NothingToDo(target));
        }

        let budget = ctx
            .settings
            .retry_budget(ctx.username(), now.date(), target)
            .await?;
        if budget.attempts >= self.max_attempts {
            return Ok(TickOutcome::BudgetExhausted(target));
        }
        if let Some(last) = budget.last_attempt_at {
            let since = (now - last).to_std().unwrap_or_default();
            if since < self.spacing {
                return Ok(TickOutcome::Waiting(target));
            }
        }

        let budget = ctx
            .settings
            .record_attempt(ctx.username(), now.date(), target, now)
            .await?;
        tracing::debug!(
            punch_type = %target,
            attempt = budget.attempts,
            "Automatic punch attempt"
        );

        match self.executor.attempt_punch(Some(target), true).await {
            Ok(outcome) => Ok(TickOutcome::Punched(outcome)),
            Err(e) => {
                tracing::debug!(punch_type = %target, "Automatic punch failed: {}", e);
                Ok(TickOutcome::Failed {
                    punch_type: target,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::SyncState;
    use crate::location::LocationFix;
    use crate::testing::{CAFE, OFFICE, at, harness};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(h: &crate::testing::Harness) -> AutoPunchScheduler {
        let executor = PunchExecutor::new(h.ctx.clone()).with_first_fix_timeout(Duration::from_millis(10));
        AutoPunchScheduler::new(Arc::new(executor))
    }

    fn stand_at(h: &crate::testing::Harness, point: crate::database::models::GeoPoint) {
        h.location.set(Some(LocationFix {
            point,
            age_seconds: 1,
        }));
    }

    #[tokio::test]
    async fn auto_checkin_in_window_and_range() {
        let h = harness(at(7, 45)).await;
        let outcome = scheduler(&h).tick().await.unwrap();
        let TickOutcome::Punched(outcome) = outcome else {
            panic!("expected a punch, got {outcome:?}");
        };
        assert_eq!(outcome.record.punch_type, Some(PunchType::Checkin));
        assert_eq!(outcome.record.sync_state, SyncState::Pending);
    }

    #[tokio::test]
    async fn disabled_or_outside_windows_does_nothing() {
        let h = harness(at(12, 0)).await;
        let sched = scheduler(&h);
        assert!(matches!(sched.tick().await.unwrap(), TickOutcome::Idle));

        let mut settings = h.ctx.load_settings().await.unwrap();
        settings.auto_punch_enabled = false;
        h.ctx.save_settings(&settings).await.unwrap();
        h.clock.set(at(7, 45));
        assert!(matches!(sched.tick().await.unwrap(), TickOutcome::Disabled));
    }

    #[tokio::test]
    async fn three_out_of_range_attempts_exhaust_the_budget() {
        let h = harness(at(7, 30)).await;
        stand_at(&h, CAFE);
        let sched = scheduler(&h);

        for minute in [30, 35, 40] {
            h.clock.set(at(7, minute));
            let outcome = sched.tick().await.unwrap();
            assert!(matches!(outcome, TickOutcome::Failed { .. }), "got {outcome:?}");
        }

        stand_at(&h, OFFICE);
        h.clock.set(at(7, 45));
        assert!(matches!(
            sched.tick().await.unwrap(),
            TickOutcome::BudgetExhausted(PunchType::Checkin)
        ));
        assert!(h.ctx.log.list_for_date(at(0, 0).date()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attempts_are_spaced_and_budget_survives_restart() {
        let h = harness(at(7, 30)).await;
        stand_at(&h, CAFE);

        assert!(matches!(scheduler(&h).tick().await.unwrap(), TickOutcome::Failed { .. }));

        // A new scheduler over the same store still sees the last attempt.
        h.clock.set(at(7, 32));
        assert!(matches!(
            scheduler(&h).tick().await.unwrap(),
            TickOutcome::Waiting(PunchType::Checkin)
        ));

        stand_at(&h, OFFICE);
        h.clock.set(at(7, 35));
        assert!(matches!(scheduler(&h).tick().await.unwrap(), TickOutcome::Punched(_)));

        let budget = h
            .ctx
            .settings
            .retry_budget("mei", at(0, 0).date(), PunchType::Checkin)
            .await
            .unwrap();
        assert_eq!(budget.attempts, 2);
    }

    #[tokio::test]
    async fn evening_window_skips_without_consuming_a_slot() {
        let h = harness(at(20, 10)).await;
        assert!(matches!(
            scheduler(&h).tick().await.unwrap(),
            TickOutcome::NothingToDo(PunchType::Checkout)
        ));
        let budget = h
            .ctx
            .settings
            .retry_budget("mei", at(0, 0).date(), PunchType::Checkout)
            .await
            .unwrap();
        assert_eq!(budget.attempts, 0);
    }

    #[tokio::test]
    async fn every_runs_immediately_and_repeats() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = every(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(55)).await;
        handle.abort();
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
