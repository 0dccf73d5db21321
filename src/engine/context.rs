use crate::database::models::{UserIdentity, UserSettings};
use crate::database::{PunchLog, SettingsStore};
use crate::engine::decider::DaySummary;
use crate::location::LocationSource;
use crate::sync::remote::RemoteAttendanceClient;
use crate::utils::time::Clock;
use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::Notify;

/// Everything the engine needs, handed over at construction time.
#[derive(Clone)]
pub struct EngineContext {
    pub user: UserIdentity,
    pub log: PunchLog,
    pub settings: SettingsStore,
    pub remote: Arc<dyn RemoteAttendanceClient>,
    pub location: Arc<dyn LocationSource>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub async fn load_settings(&self) -> Result<UserSettings> {
        self.settings.get(self.username()).await
    }

    pub async fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        self.settings.put(self.username(), settings).await
    }

    /// Fold the log for `date`. Never cached.
    pub async fn day_summary(&self, date: NaiveDate) -> Result<DaySummary> {
        let records = self.log.list_for_date(date).await?;
        Ok(DaySummary::fold(date, &records))
    }
}

/// Fire-and-forget request for a push cycle.
///
/// Repeated fires before the loop wakes collapse into one.
#[derive(Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.notify.notify_one();
    }

    pub async fn fired(&self) {
        self.notify.notified().await;
    }
}
