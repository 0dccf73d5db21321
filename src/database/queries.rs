use crate::database::models::{AttendanceRecord, GeoPoint, PunchStatus, PunchType, SyncState};
use crate::utils::time::MonthKey;
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const RECORD_COLUMNS: &str = "correlation_id, user_id, username, punch_type, status, timestamp, date, \
     lat, lon, notes, sync_state, sync_error, sync_error_at, server_id, origin";

/// Append-only store of punch attempts for one local user.
///
/// Rows are keyed by correlation id: client-generated for local punches, `server_<id>`
/// for records pulled from the remote store. Records are never deleted here.
#[derive(Clone)]
pub struct PunchLog {
    pool: SqlitePool,
    username: String,
}

impl PunchLog {
    pub fn new(pool: SqlitePool, username: impl Into<String>) -> Self {
        Self {
            pool,
            username: username.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Insert or replace the record stored under its correlation id.
    ///
    /// Last write wins for content, but a `synced` row never goes back to `pending`.
    pub async fn put(&self, record: &AttendanceRecord) -> Result<()> {
        let punch_type = record.punch_type.map(|t| t.as_str()).unwrap_or("");
        let (lat, lon) = match record.location {
            Some(point) => (Some(point.lat), Some(point.lon)),
            None => (None, None),
        };

        sqlx::query(
            "INSERT INTO attendance_records (correlation_id, user_id, username, punch_type, status, timestamp, date,
                 lat, lon, notes, sync_state, sync_error, sync_error_at, server_id, origin)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(correlation_id) DO UPDATE SET
                 user_id = excluded.user_id,
                 username = excluded.username,
                 punch_type = excluded.punch_type,
                 status = excluded.status,
                 timestamp = excluded.timestamp,
                 date = excluded.date,
                 lat = excluded.lat,
                 lon = excluded.lon,
                 notes = excluded.notes,
                 sync_state = CASE WHEN attendance_records.sync_state = 'synced'
                                   THEN 'synced' ELSE excluded.sync_state END,
                 sync_error = excluded.sync_error,
                 sync_error_at = excluded.sync_error_at,
                 server_id = COALESCE(excluded.server_id, attendance_records.server_id),
                 origin = excluded.origin,
                 updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&record.correlation_id)
        .bind(&record.user_id)
        .bind(&record.username)
        .bind(punch_type)
        .bind(record.status.as_str())
        .bind(record.timestamp)
        .bind(record.date)
        .bind(lat)
        .bind(lon)
        .bind(&record.notes)
        .bind(record.sync_state.as_str())
        .bind(&record.sync_error)
        .bind(record.sync_error_at)
        .bind(record.server_id)
        .bind(record.origin.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, correlation_id: &str) -> Result<Option<AttendanceRecord>> {
        let row_opt = sqlx::query(&format!(
            "SELECT {} FROM attendance_records WHERE correlation_id = ?",
            RECORD_COLUMNS
        ))
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        match row_opt {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Oldest-first batch of records still waiting for the remote store.
    pub async fn get_unsynced(&self, limit: usize) -> Result<Vec<AttendanceRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attendance_records
             WHERE username = ? AND sync_state = 'pending'
             ORDER BY timestamp ASC
             LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(&self.username)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Move every `error` record back to `pending` for the next push cycle.
    /// The last error message is kept for diagnostics.
    pub async fn requeue_errors(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE attendance_records
             SET sync_state = 'pending', updated_at = CURRENT_TIMESTAMP
             WHERE username = ? AND sync_state = 'error'",
        )
        .bind(&self.username)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Returns `false` when the record is unknown or already synced.
    pub async fn mark_synced(&self, correlation_id: &str, server_id: Option<i64>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE attendance_records
             SET sync_state = 'synced', server_id = COALESCE(?, server_id),
                 sync_error = NULL, sync_error_at = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE correlation_id = ? AND sync_state IN ('pending', 'error')",
        )
        .bind(server_id)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns `false` when the record is unknown or already synced.
    pub async fn mark_sync_error(
        &self,
        correlation_id: &str,
        message: &str,
        at: NaiveDateTime,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE attendance_records
             SET sync_state = 'error', sync_error = ?, sync_error_at = ?, updated_at = CURRENT_TIMESTAMP
             WHERE correlation_id = ? AND sync_state IN ('pending', 'error')",
        )
        .bind(message)
        .bind(at)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        self.list_between(date, date).await
    }

    pub async fn list_for_month(&self, month: MonthKey) -> Result<Vec<AttendanceRecord>> {
        self.list_between(month.first_day(), month.last_day()).await
    }

    pub async fn count_unsynced(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM attendance_records
             WHERE username = ? AND sync_state IN ('pending', 'error')",
        )
        .bind(&self.username)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("n"))
    }

    async fn list_between(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attendance_records
             WHERE username = ? AND date >= ? AND date <= ?
             ORDER BY date ASC, timestamp ASC",
            RECORD_COLUMNS
        ))
        .bind(&self.username)
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<AttendanceRecord> {
    let punch_type: String = row.get("punch_type");
    let status: String = row.get("status");
    let sync_state: String = row.get("sync_state");
    let origin: String = row.get("origin");
    let lat: Option<f64> = row.get("lat");
    let lon: Option<f64> = row.get("lon");

    Ok(AttendanceRecord {
        correlation_id: row.get("correlation_id"),
        user_id: row.get("user_id"),
        username: row.get("username"),
        punch_type: PunchType::parse_lenient(&punch_type),
        status: PunchStatus::parse(&status),
        timestamp: row.get("timestamp"),
        date: row.get("date"),
        location: lat.zip(lon).map(|(lat, lon)| GeoPoint::new(lat, lon)),
        notes: row.get("notes"),
        sync_state: sync_state.parse()?,
        sync_error: row.get("sync_error"),
        sync_error_at: row.get("sync_error_at"),
        server_id: row.get("server_id"),
        origin: origin.parse()?,
    })
}
