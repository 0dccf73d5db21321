use crate::database::models::{GeoPoint, PunchType, RetryBudget, UserSettings};
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{Row, SqlitePool};

/// Per-user settings and automatic-punch retry counters.
#[derive(Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
}

impl SettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load and validate settings. A user with no saved row gets the defaults.
    pub async fn get(&self, username: &str) -> Result<UserSettings> {
        let row_opt = sqlx::query(
            "SELECT anchor_lat, anchor_lon, radius_m, auto_punch_enabled, punch_deadline,
                    last_sync_error, last_sync_error_at, last_checkin_reminder,
                    last_checkout_reminder, last_correction_reminder
             FROM user_settings WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row_opt else {
            return Ok(UserSettings::default());
        };

        let anchor_lat: Option<f64> = row.get("anchor_lat");
        let anchor_lon: Option<f64> = row.get("anchor_lon");

        let settings = UserSettings {
            anchor: anchor_lat
                .zip(anchor_lon)
                .map(|(lat, lon)| GeoPoint::new(lat, lon)),
            radius_m: row.get("radius_m"),
            auto_punch_enabled: row.get("auto_punch_enabled"),
            punch_deadline: row.get("punch_deadline"),
            last_sync_error: row.get("last_sync_error"),
            last_sync_error_at: row.get("last_sync_error_at"),
            last_checkin_reminder: row.get("last_checkin_reminder"),
            last_checkout_reminder: row.get("last_checkout_reminder"),
            last_correction_reminder: row.get("last_correction_reminder"),
        };

        settings
            .validate()
            .map_err(|e| anyhow::anyhow!("Stored settings for {} are invalid: {}", username, e))?;

        Ok(settings)
    }

    pub async fn put(&self, username: &str, settings: &UserSettings) -> Result<()> {
        settings.validate()?;

        sqlx::query(
            "INSERT OR REPLACE INTO user_settings
                (username, anchor_lat, anchor_lon, radius_m, auto_punch_enabled, punch_deadline,
                 last_sync_error, last_sync_error_at, last_checkin_reminder,
                 last_checkout_reminder, last_correction_reminder, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
        )
        .bind(username)
        .bind(settings.anchor.map(|a| a.lat))
        .bind(settings.anchor.map(|a| a.lon))
        .bind(settings.radius_m)
        .bind(settings.auto_punch_enabled)
        .bind(settings.punch_deadline)
        .bind(&settings.last_sync_error)
        .bind(settings.last_sync_error_at)
        .bind(settings.last_checkin_reminder)
        .bind(settings.last_checkout_reminder)
        .bind(settings.last_correction_reminder)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_sync_error(
        &self,
        username: &str,
        message: &str,
        at: NaiveDateTime,
    ) -> Result<()> {
        let mut settings = self.get(username).await?;
        settings.last_sync_error = Some(message.chars().take(200).collect());
        settings.last_sync_error_at = Some(at);
        self.put(username, &settings).await
    }

    pub async fn retry_budget(
        &self,
        username: &str,
        date: NaiveDate,
        punch_type: PunchType,
    ) -> Result<RetryBudget> {
        let row_opt = sqlx::query(
            "SELECT attempts, last_attempt_at FROM auto_retry
             WHERE username = ? AND date = ? AND punch_type = ?",
        )
        .bind(username)
        .bind(date)
        .bind(punch_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row_opt {
            Some(row) => {
                let attempts: i64 = row.get("attempts");
                Ok(RetryBudget {
                    attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
                    last_attempt_at: row.get("last_attempt_at"),
                })
            }
            None => Ok(RetryBudget::default()),
        }
    }

    /// Consume one automatic attempt slot and return the updated budget.
    pub async fn record_attempt(
        &self,
        username: &str,
        date: NaiveDate,
        punch_type: PunchType,
        at: NaiveDateTime,
    ) -> Result<RetryBudget> {
        sqlx::query(
            "INSERT INTO auto_retry (username, date, punch_type, attempts, last_attempt_at)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(username, date, punch_type) DO UPDATE SET
                 attempts = auto_retry.attempts + 1,
                 last_attempt_at = excluded.last_attempt_at",
        )
        .bind(username)
        .bind(date)
        .bind(punch_type.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        self.retry_budget(username, date, punch_type).await
    }
}
