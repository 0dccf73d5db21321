//! Shared fixtures for engine and sync tests.

use crate::database::models::{GeoPoint, UserIdentity};
use crate::database::{self, PunchLog, SettingsStore};
use crate::engine::context::EngineContext;
use crate::error::{SyncError, SyncResult};
use crate::location::StaticLocation;
use crate::sync::remote::{PunchSubmission, RemoteAttendanceClient, RemoteRecord};
use crate::utils::time::{ManualClock, MonthKey};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const OFFICE: GeoPoint = GeoPoint {
    lat: 31.2304,
    lon: 121.4737,
};

/// About 1.1 km north of the office.
pub const CAFE: GeoPoint = GeoPoint {
    lat: 31.2404,
    lon: 121.4737,
};

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn at(h: u32, m: u32) -> NaiveDateTime {
    day().and_hms_opt(h, m, 0).unwrap()
}

/// In-memory stand-in for the attendance server.
#[derive(Default)]
pub struct FakeRemote {
    pub records: Mutex<Vec<RemoteRecord>>,
    next_id: AtomicI64,
    offline: AtomicBool,
    pub submit_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn insert(&self, mut record: RemoteRecord) -> RemoteRecord {
        record.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.records.lock().unwrap().push(record.clone());
        record
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn correction(date: &str, approved_at: &str) -> RemoteRecord {
        RemoteRecord {
            id: 0,
            date: date.to_string(),
            punched_at: approved_at.to_string(),
            client_time: None,
            punch_type: Some("checkin".to_string()),
            status: "correction".to_string(),
            lat: None,
            lon: None,
            notes: "approved correction".to_string(),
            correlation_id: None,
        }
    }
}

#[async_trait]
impl RemoteAttendanceClient for FakeRemote {
    async fn submit_punch(&self, punch: &PunchSubmission) -> SyncResult<RemoteRecord> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::NetworkUnreachable("connection refused".to_string()));
        }
        let client_time = punch.client_time.clone().unwrap_or_default();
        Ok(self.insert(RemoteRecord {
            id: 0,
            date: client_time.chars().take(10).collect(),
            punched_at: client_time.clone(),
            client_time: punch.client_time.clone(),
            punch_type: punch.punch_type.clone(),
            status: punch.status.clone(),
            lat: punch.lat,
            lon: punch.lon,
            notes: punch.notes.clone(),
            correlation_id: punch.correlation_id.clone(),
        }))
    }

    async fn fetch_month(&self, month: MonthKey) -> SyncResult<Vec<RemoteRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::NetworkUnreachable("connection refused".to_string()));
        }
        let prefix = month.to_string();
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.date.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn is_reachable(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub ctx: EngineContext,
    pub clock: Arc<ManualClock>,
    pub location: Arc<StaticLocation>,
    pub remote: Arc<FakeRemote>,
}

/// Context for user `mei` with the office as anchor (100 m), auto punch on,
/// and the device standing at the office.
pub async fn harness(now: NaiveDateTime) -> Harness {
    let pool = database::memory_pool().await;
    let user = UserIdentity {
        user_id: "42".to_string(),
        username: "mei".to_string(),
    };
    let clock = Arc::new(ManualClock::new(now));
    let location = Arc::new(StaticLocation::at(OFFICE));
    let remote = Arc::new(FakeRemote::default());

    let ctx = EngineContext {
        log: PunchLog::new(pool.clone(), user.username.clone()),
        settings: SettingsStore::new(pool),
        user,
        remote: remote.clone(),
        location: location.clone(),
        clock: clock.clone(),
    };

    let mut settings = ctx.load_settings().await.unwrap();
    settings.anchor = Some(OFFICE);
    settings.radius_m = 100.0;
    settings.auto_punch_enabled = true;
    ctx.save_settings(&settings).await.unwrap();

    Harness {
        ctx,
        clock,
        location,
        remote,
    }
}
