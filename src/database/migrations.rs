use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    create_attendance_records_table(pool).await?;
    create_user_settings_table(pool).await?;
    create_auto_retry_table(pool).await?;

    info!("Database migrations completed successfully");
    Ok(())
}

async fn create_attendance_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_records (
            correlation_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            username TEXT NOT NULL,
            punch_type TEXT NOT NULL DEFAULT '' CHECK (punch_type IN ('', 'checkin', 'checkout')),
            status TEXT NOT NULL,
            timestamp DATETIME NOT NULL,
            date DATE NOT NULL,
            lat REAL,
            lon REAL,
            notes TEXT NOT NULL DEFAULT '',
            sync_state TEXT NOT NULL DEFAULT 'pending' CHECK (sync_state IN ('pending', 'synced', 'error')),
            sync_error TEXT,
            sync_error_at DATETIME,
            server_id INTEGER,
            origin TEXT NOT NULL DEFAULT 'local' CHECK (origin IN ('local', 'remote')),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attendance_user_date ON attendance_records (username, date)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sync_state ON attendance_records (sync_state, timestamp)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_settings (
            username TEXT PRIMARY KEY,
            anchor_lat REAL,
            anchor_lon REAL,
            radius_m REAL NOT NULL DEFAULT 100,
            auto_punch_enabled BOOLEAN NOT NULL DEFAULT FALSE,
            punch_deadline TEXT NOT NULL DEFAULT '10:00:00',
            last_sync_error TEXT,
            last_sync_error_at DATETIME,
            last_checkin_reminder DATE,
            last_checkout_reminder DATE,
            last_correction_reminder DATE,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_auto_retry_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS auto_retry (
            username TEXT NOT NULL,
            date DATE NOT NULL,
            punch_type TEXT NOT NULL CHECK (punch_type IN ('checkin', 'checkout')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at DATETIME,
            PRIMARY KEY (username, date, punch_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
