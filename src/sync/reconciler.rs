//! Push pending local punches, pull the remote month back in.
//!
//! Each direction is split into a network half (`collect_*`, safe to run on a
//! worker task) and a store half (`apply_*`, run by whoever owns the log). The
//! one-shot helpers run both halves in sequence.

use crate::database::models::{
    AttendanceRecord, GeoPoint, PunchStatus, PunchType, RecordOrigin, SyncState, server_key,
};
use crate::engine::context::EngineContext;
use crate::error::{SyncError, SyncResult};
use crate::sync::remote::{PunchSubmission, RemoteAttendanceClient, RemoteRecord, tag_notes};
use crate::utils::time::{MonthKey, parse_date_string, parse_remote_timestamp};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_PUSH_BATCH: usize = 80;
pub const DEFAULT_PULL_MIN_INTERVAL: Duration = Duration::from_secs(25);

/// Holds an in-flight flag for as long as it lives.
#[derive(Debug)]
pub struct InflightGuard {
    flag: Arc<AtomicBool>,
}

impl InflightGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub enum PushItem {
    Accepted { server_id: i64 },
    /// Found on the remote already, e.g. an earlier submit whose response was lost.
    AlreadyRemote { server_id: i64 },
    Rejected(String),
}

#[derive(Debug, Default)]
pub struct PushResults {
    pub items: Vec<(String, PushItem)>,
    /// Set when the batch stopped early; unvisited records stay pending.
    pub interrupted: Option<String>,
    pub skipped_offline: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushSummary {
    pub synced: usize,
    pub deduplicated: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PullSummary {
    pub ingested: usize,
    /// Remote copies of punches made on this device.
    pub matched_local: usize,
    pub skipped: usize,
}

pub struct Reconciler {
    ctx: EngineContext,
    batch_size: usize,
    embed_cid_tag: bool,
    pull_min_interval: Duration,
    push_inflight: Arc<AtomicBool>,
    pull_inflight: Arc<AtomicBool>,
    last_pull: Mutex<Option<(MonthKey, Instant)>>,
}

impl Reconciler {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            batch_size: DEFAULT_PUSH_BATCH,
            embed_cid_tag: true,
            pull_min_interval: DEFAULT_PULL_MIN_INTERVAL,
            push_inflight: Arc::new(AtomicBool::new(false)),
            pull_inflight: Arc::new(AtomicBool::new(false)),
            last_pull: Mutex::new(None),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_cid_tag(mut self, embed: bool) -> Self {
        self.embed_cid_tag = embed;
        self
    }

    pub fn with_pull_min_interval(mut self, interval: Duration) -> Self {
        self.pull_min_interval = interval;
        self
    }

    pub fn remote(&self) -> Arc<dyn RemoteAttendanceClient> {
        self.ctx.remote.clone()
    }

    pub fn embeds_cid_tag(&self) -> bool {
        self.embed_cid_tag
    }

    pub fn try_begin_push(&self) -> Option<InflightGuard> {
        InflightGuard::try_acquire(&self.push_inflight)
    }

    /// `None` when a pull is running or `month` was pulled too recently.
    pub fn try_begin_pull(&self, month: MonthKey) -> Option<InflightGuard> {
        let mut last = self.last_pull.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((last_month, at)) = *last {
            if last_month == month && at.elapsed() < self.pull_min_interval {
                tracing::debug!(%month, "Pull throttled");
                return None;
            }
        }
        let guard = InflightGuard::try_acquire(&self.pull_inflight)?;
        *last = Some((month, Instant::now()));
        Some(guard)
    }

    /// Requeue failed records and load the next batch.
    pub async fn prepare_push(&self) -> SyncResult<Vec<AttendanceRecord>> {
        let requeued = self.ctx.log.requeue_errors().await?;
        if requeued > 0 {
            tracing::debug!(requeued, "Requeued failed records");
        }
        Ok(self.ctx.log.get_unsynced(self.batch_size).await?)
    }

    /// Network half of a push. Touches no local state.
    ///
    /// The server files a punch under the day it received it, so the lookup
    /// covers `current_month` as well as the months the punches were made in.
    pub async fn collect_push(
        remote: &dyn RemoteAttendanceClient,
        batch: Vec<AttendanceRecord>,
        embed_cid_tag: bool,
        current_month: MonthKey,
    ) -> SyncResult<PushResults> {
        let mut results = PushResults::default();
        if batch.is_empty() {
            return Ok(results);
        }
        if !remote.is_reachable().await {
            results.skipped_offline = true;
            return Ok(results);
        }

        let mut months: BTreeSet<MonthKey> = batch.iter().map(|r| MonthKey::of(r.date)).collect();
        months.insert(current_month);
        let mut known: HashMap<String, i64> = HashMap::new();
        for month in months {
            for existing in remote.fetch_month(month).await? {
                if let Some(cid) = existing.correlation_id() {
                    known.insert(cid, existing.id);
                }
            }
        }

        for record in batch {
            let cid = record.correlation_id.clone();
            if let Some(&server_id) = known.get(&cid) {
                results.items.push((cid, PushItem::AlreadyRemote { server_id }));
                continue;
            }

            match remote.submit_punch(&submission_for(&record, embed_cid_tag)).await {
                Ok(ack) => results.items.push((cid, PushItem::Accepted { server_id: ack.id })),
                Err(SyncError::RemoteRejected(msg)) => {
                    results.items.push((cid, PushItem::Rejected(msg)));
                }
                Err(e) => {
                    results.interrupted = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(results)
    }

    /// Store half of a push.
    pub async fn apply_push(&self, outcome: SyncResult<PushResults>) -> SyncResult<PushSummary> {
        let now = self.ctx.clock.now();
        let mut summary = PushSummary::default();

        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                self.note_sync_error(&e.to_string()).await?;
                return Err(e);
            }
        };

        if results.skipped_offline {
            tracing::debug!("Remote store unreachable, push skipped");
            return Ok(summary);
        }

        let mut last_error = results.interrupted.clone();
        for (cid, item) in results.items {
            match item {
                PushItem::Accepted { server_id } => {
                    self.ctx.log.mark_synced(&cid, Some(server_id)).await?;
                    summary.synced += 1;
                }
                PushItem::AlreadyRemote { server_id } => {
                    self.ctx.log.mark_synced(&cid, Some(server_id)).await?;
                    summary.deduplicated += 1;
                }
                PushItem::Rejected(msg) => {
                    tracing::warn!(correlation_id = %cid, "Remote rejected punch: {}", msg);
                    self.ctx.log.mark_sync_error(&cid, &msg, now).await?;
                    last_error = Some(msg);
                    summary.failed += 1;
                }
            }
        }

        if let Some(msg) = last_error {
            self.note_sync_error(&msg).await?;
        }

        if summary.synced + summary.deduplicated > 0 {
            tracing::info!(
                synced = summary.synced,
                deduplicated = summary.deduplicated,
                failed = summary.failed,
                "Push finished"
            );
        }

        Ok(summary)
    }

    /// Network half of a pull.
    pub async fn collect_pull(
        remote: &dyn RemoteAttendanceClient,
        month: MonthKey,
    ) -> SyncResult<Vec<RemoteRecord>> {
        remote.fetch_month(month).await
    }

    /// Store half of a pull.
    pub async fn apply_pull(
        &self,
        outcome: SyncResult<Vec<RemoteRecord>>,
    ) -> SyncResult<PullSummary> {
        let remote_records = match outcome {
            Ok(records) => records,
            Err(e) => {
                if !matches!(e, SyncError::NetworkUnreachable(_)) {
                    self.note_sync_error(&e.to_string()).await?;
                }
                return Err(e);
            }
        };

        let mut summary = PullSummary::default();
        for remote in remote_records {
            if let Some(cid) = remote.correlation_id() {
                if self.ctx.log.get(&cid).await?.is_some() {
                    self.ctx.log.mark_synced(&cid, Some(remote.id)).await?;
                    summary.matched_local += 1;
                    continue;
                }
            }

            match self.from_remote(&remote) {
                Some(record) => {
                    self.ctx.log.put(&record).await?;
                    summary.ingested += 1;
                }
                None => {
                    tracing::warn!(server_id = remote.id, "Skipping remote record without a usable date");
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    pub async fn push_once(&self) -> SyncResult<PushSummary> {
        let Some(_guard) = self.try_begin_push() else {
            return Ok(PushSummary::default());
        };
        let batch = self.prepare_push().await?;
        let current_month = MonthKey::of(self.ctx.clock.today());
        let outcome =
            Self::collect_push(self.ctx.remote.as_ref(), batch, self.embed_cid_tag, current_month)
                .await;
        self.apply_push(outcome).await
    }

    pub async fn pull_once(&self, month: MonthKey) -> SyncResult<PullSummary> {
        let Some(_guard) = self.try_begin_pull(month) else {
            return Ok(PullSummary::default());
        };
        let outcome = Self::collect_pull(self.ctx.remote.as_ref(), month).await;
        self.apply_pull(outcome).await
    }

    async fn note_sync_error(&self, message: &str) -> SyncResult<()> {
        let now = self.ctx.clock.now();
        self.ctx
            .settings
            .record_sync_error(self.ctx.username(), message, now)
            .await?;
        Ok(())
    }

    fn from_remote(&self, remote: &RemoteRecord) -> Option<AttendanceRecord> {
        let timestamp = remote
            .client_time
            .as_deref()
            .and_then(parse_remote_timestamp)
            .or_else(|| parse_remote_timestamp(&remote.punched_at));
        let date = parse_date_string(&remote.date)
            .ok()
            .or_else(|| timestamp.map(|ts| ts.date()))?;
        let timestamp = timestamp.or_else(|| date.and_hms_opt(0, 0, 0))?;

        Some(AttendanceRecord {
            correlation_id: server_key(remote.id),
            user_id: self.ctx.user.user_id.clone(),
            username: self.ctx.user.username.clone(),
            punch_type: remote.punch_type.as_deref().and_then(PunchType::parse_lenient),
            status: PunchStatus::parse(&remote.status),
            timestamp,
            date,
            location: remote.lat.zip(remote.lon).map(|(lat, lon)| GeoPoint::new(lat, lon)),
            notes: remote.notes.clone(),
            sync_state: SyncState::Synced,
            sync_error: None,
            sync_error_at: None,
            server_id: Some(remote.id),
            origin: RecordOrigin::Remote,
        })
    }
}

fn submission_for(record: &AttendanceRecord, embed_cid_tag: bool) -> PunchSubmission {
    let notes = if embed_cid_tag {
        tag_notes(&record.notes, &record.correlation_id)
    } else {
        record.notes.clone()
    };

    PunchSubmission {
        group_id: None,
        status: record.status.as_str().to_string(),
        lat: record.location.map(|p| p.lat),
        lon: record.location.map(|p| p.lon),
        notes,
        client_time: Some(record.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()),
        punch_type: record.punch_type.map(|t| t.as_str().to_string()),
        correlation_id: Some(record.correlation_id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::PunchType;
    use crate::engine::executor::PunchExecutor;
    use crate::engine::scheduler::{AutoPunchScheduler, TickOutcome};
    use crate::testing::{FakeRemote, OFFICE, at, harness};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn local_punch(h: &crate::testing::Harness, kind: PunchType, h_m: (u32, u32)) -> AttendanceRecord {
        AttendanceRecord::new_local_punch(&h.ctx.user, kind, at(h_m.0, h_m.1), OFFICE, "manual".into())
    }

    #[tokio::test]
    async fn auto_checkin_then_push_marks_synced() {
        let h = harness(at(7, 45)).await;
        let executor = Arc::new(PunchExecutor::new(h.ctx.clone()));
        let TickOutcome::Punched(outcome) = AutoPunchScheduler::new(executor).tick().await.unwrap() else {
            panic!("automatic check-in should succeed");
        };
        assert_eq!(outcome.record.sync_state, SyncState::Pending);

        let summary = Reconciler::new(h.ctx.clone()).push_once().await.unwrap();
        assert_eq!(summary.synced, 1);

        let stored = h.ctx.log.get(&outcome.record.correlation_id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Synced);
        assert!(stored.server_id.is_some());

        let remote = h.remote.records.lock().unwrap()[0].clone();
        assert!(remote.notes.ends_with(&format!("[cid:{}]", stored.correlation_id)));
    }

    #[tokio::test]
    async fn retried_push_does_not_duplicate_remote_record() {
        let h = harness(at(9, 0)).await;
        let record = local_punch(&h, PunchType::Checkin, (8, 50));
        h.ctx.log.put(&record).await.unwrap();

        // First submit reached the server but the ack was lost.
        let submission = submission_for(&record, true);
        h.remote.submit_punch(&submission).await.unwrap();
        assert_eq!(h.remote.count(), 1);

        let summary = Reconciler::new(h.ctx.clone()).push_once().await.unwrap();
        assert_eq!(summary, PushSummary { synced: 0, deduplicated: 1, failed: 0 });
        assert_eq!(h.remote.count(), 1);
        assert_eq!(h.remote.submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.ctx.log.get(&record.correlation_id).await.unwrap().unwrap().sync_state,
            SyncState::Synced
        );
    }

    #[tokio::test]
    async fn late_push_finds_record_filed_under_receipt_month() {
        /// Files every punch under its receipt date and loses the first ack.
        struct ReceiptDated {
            inner: FakeRemote,
            lose_ack: AtomicBool,
        }

        #[async_trait::async_trait]
        impl RemoteAttendanceClient for ReceiptDated {
            async fn submit_punch(&self, punch: &PunchSubmission) -> SyncResult<RemoteRecord> {
                let stored = self.inner.submit_punch(punch).await?;
                for record in self.inner.records.lock().unwrap().iter_mut() {
                    if record.id == stored.id {
                        record.date = "2026-04-02".to_string();
                    }
                }
                if self.lose_ack.swap(false, Ordering::SeqCst) {
                    return Err(SyncError::NetworkUnreachable("connection reset".into()));
                }
                Ok(stored)
            }
            async fn fetch_month(&self, month: MonthKey) -> SyncResult<Vec<RemoteRecord>> {
                self.inner.fetch_month(month).await
            }
            async fn is_reachable(&self) -> bool {
                true
            }
        }

        let checkout_at = NaiveDate::from_ymd_opt(2026, 3, 31)
            .unwrap()
            .and_hms_opt(19, 30, 0)
            .unwrap();
        let mut h = harness(checkout_at).await;
        h.clock.set(checkout_at + chrono::Duration::days(2));
        let remote = Arc::new(ReceiptDated {
            inner: FakeRemote::default(),
            lose_ack: AtomicBool::new(true),
        });
        h.ctx.remote = remote.clone();

        let record = AttendanceRecord::new_local_punch(
            &h.ctx.user,
            PunchType::Checkout,
            checkout_at,
            OFFICE,
            "manual".into(),
        );
        h.ctx.log.put(&record).await.unwrap();

        let reconciler = Reconciler::new(h.ctx.clone());
        let first = reconciler.push_once().await.unwrap();
        assert_eq!(first, PushSummary::default());

        let second = reconciler.push_once().await.unwrap();
        assert_eq!(second, PushSummary { synced: 0, deduplicated: 1, failed: 0 });
        assert_eq!(remote.inner.count(), 1);
        assert_eq!(remote.inner.submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.ctx.log.get(&record.correlation_id).await.unwrap().unwrap().sync_state,
            SyncState::Synced
        );
    }

    #[tokio::test]
    async fn offline_push_keeps_records_pending() {
        let h = harness(at(9, 0)).await;
        let record = local_punch(&h, PunchType::Checkin, (8, 50));
        h.ctx.log.put(&record).await.unwrap();
        h.remote.set_online(false);

        let summary = Reconciler::new(h.ctx.clone()).push_once().await.unwrap();
        assert_eq!(summary, PushSummary::default());
        let stored = h.ctx.log.get(&record.correlation_id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Pending);

        h.remote.set_online(true);
        let summary = Reconciler::new(h.ctx.clone()).push_once().await.unwrap();
        assert_eq!(summary.synced, 1);
    }

    #[tokio::test]
    async fn rejected_record_is_retried_next_cycle() {
        struct Rejecting(FakeRemote);

        #[async_trait::async_trait]
        impl RemoteAttendanceClient for Rejecting {
            async fn submit_punch(&self, _: &PunchSubmission) -> SyncResult<RemoteRecord> {
                Err(SyncError::RemoteRejected("group closed (409)".into()))
            }
            async fn fetch_month(&self, month: MonthKey) -> SyncResult<Vec<RemoteRecord>> {
                self.0.fetch_month(month).await
            }
            async fn is_reachable(&self) -> bool {
                true
            }
        }

        let mut h = harness(at(9, 0)).await;
        h.ctx.remote = Arc::new(Rejecting(FakeRemote::default()));
        let record = local_punch(&h, PunchType::Checkin, (8, 50));
        h.ctx.log.put(&record).await.unwrap();

        let reconciler = Reconciler::new(h.ctx.clone());
        let summary = reconciler.push_once().await.unwrap();
        assert_eq!(summary.failed, 1);

        let stored = h.ctx.log.get(&record.correlation_id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Error);
        assert_eq!(stored.sync_error.as_deref(), Some("group closed (409)"));

        let settings = h.ctx.load_settings().await.unwrap();
        assert_eq!(settings.last_sync_error.as_deref(), Some("group closed (409)"));

        // Requeued and tried again, never dropped.
        let batch = reconciler.prepare_push().await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn pull_ingests_corrections_idempotently() {
        let h = harness(at(11, 0)).await;
        h.remote
            .insert(FakeRemote::correction("2026-03-02", "2026-03-02T10:30:00"));

        let reconciler = Reconciler::new(h.ctx.clone()).with_pull_min_interval(Duration::ZERO);
        let month = MonthKey::of(at(0, 0).date());

        let first = reconciler.pull_once(month).await.unwrap();
        assert_eq!(first.ingested, 1);
        let second = reconciler.pull_once(month).await.unwrap();
        assert_eq!(second.ingested, 1);

        let records = h.ctx.log.list_for_month(month).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id, "server_1");
        assert_eq!(records[0].status, PunchStatus::Correction);
        assert_eq!(records[0].location, None);

        let summary = h.ctx.day_summary(at(0, 0).date()).await.unwrap();
        assert!(summary.has_checkin());
    }

    #[tokio::test]
    async fn pull_matches_local_twin_instead_of_copying() {
        let h = harness(at(9, 0)).await;
        let record = local_punch(&h, PunchType::Checkin, (8, 50));
        h.ctx.log.put(&record).await.unwrap();
        h.remote.submit_punch(&submission_for(&record, true)).await.unwrap();

        let summary = Reconciler::new(h.ctx.clone())
            .pull_once(MonthKey::of(record.date))
            .await
            .unwrap();
        assert_eq!(summary.matched_local, 1);
        assert_eq!(summary.ingested, 0);

        let records = h.ctx.log.list_for_date(record.date).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sync_state, SyncState::Synced);
        assert_eq!(records[0].server_id, Some(1));
    }

    #[tokio::test]
    async fn pull_is_throttled_per_month() {
        let h = harness(at(9, 0)).await;
        let reconciler = Reconciler::new(h.ctx.clone());
        let month = MonthKey::of(at(0, 0).date());

        reconciler.pull_once(month).await.unwrap();
        reconciler.pull_once(month).await.unwrap();
        assert_eq!(h.remote.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pull_recovers_from_poisoned_throttle_lock() {
        let h = harness(at(9, 0)).await;
        let reconciler = Reconciler::new(h.ctx.clone());
        let month = MonthKey::of(at(0, 0).date());

        std::thread::scope(|s| {
            let poisoned = s
                .spawn(|| {
                    let _held = reconciler.last_pull.lock().unwrap();
                    panic!("poison the throttle lock");
                })
                .join();
            assert!(poisoned.is_err());
        });
        assert!(reconciler.last_pull.is_poisoned());

        assert!(reconciler.try_begin_pull(month).is_some());
    }

    #[test]
    fn inflight_guard_releases_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = InflightGuard::try_acquire(&flag).unwrap();
        assert!(InflightGuard::try_acquire(&flag).is_none());
        drop(guard);
        assert!(InflightGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn submission_can_skip_notes_tag() {
        let user = crate::database::models::UserIdentity {
            user_id: "1".into(),
            username: "mei".into(),
        };
        let record =
            AttendanceRecord::new_local_punch(&user, PunchType::Checkout, at(19, 0), OFFICE, "out".into());
        let plain = submission_for(&record, false);
        assert_eq!(plain.notes, "out");
        assert_eq!(plain.correlation_id.as_deref(), Some(record.correlation_id.as_str()));
        assert_eq!(plain.client_time.as_deref(), Some("2026-03-02T19:00:00"));
    }
}
