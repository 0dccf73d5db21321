use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of keys for records ingested from the remote store.
pub const SERVER_KEY_PREFIX: &str = "server_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunchType {
    Checkin,
    Checkout,
}

impl PunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchType::Checkin => "checkin",
            PunchType::Checkout => "checkout",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PunchType::Checkin => "check-in",
            PunchType::Checkout => "check-out",
        }
    }

    /// Lenient parse used for stored and remote values. Unknown or empty input
    /// is a legacy punch with no declared type.
    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "checkin" | "in" | "start" => Some(PunchType::Checkin),
            "checkout" | "out" | "end" => Some(PunchType::Checkout),
            _ => None,
        }
    }
}

impl fmt::Display for PunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PunchType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_lenient(s).ok_or_else(|| anyhow::anyhow!("Invalid punch type: {}", s))
    }
}

/// Outcome tag of a punch. Only `Success` and `Correction` count toward the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunchStatus {
    Success,
    Correction,
    Other(String),
}

impl PunchStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PunchStatus::Success => "success",
            PunchStatus::Correction => "correction",
            PunchStatus::Other(tag) => tag.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "success" => PunchStatus::Success,
            "correction" => PunchStatus::Correction,
            other => PunchStatus::Other(other.to_string()),
        }
    }

    pub fn is_effective(&self) -> bool {
        matches!(self, PunchStatus::Success | PunchStatus::Correction)
    }
}

impl fmt::Display for PunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Pending,
    Synced,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
            SyncState::Error => "error",
        }
    }
}

impl FromStr for SyncState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncState::Pending),
            "synced" => Ok(SyncState::Synced),
            "error" => Ok(SyncState::Error),
            _ => Err(anyhow::anyhow!("Invalid sync state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrigin {
    Local,
    Remote,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Local => "local",
            RecordOrigin::Remote => "remote",
        }
    }
}

impl FromStr for RecordOrigin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(RecordOrigin::Local),
            "remote" => Ok(RecordOrigin::Remote),
            _ => Err(anyhow::anyhow!("Invalid record origin: {}", s)),
        }
    }
}

/// Decimal-degree coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub correlation_id: String,
    pub user_id: String,
    pub username: String,
    /// `None` for legacy punches that never declared a type.
    pub punch_type: Option<PunchType>,
    pub status: PunchStatus,
    /// Client wall-clock time of the attempt.
    pub timestamp: NaiveDateTime,
    /// Attendance day. Usually `timestamp.date()`, but server corrections carry the
    /// day they backfill.
    pub date: NaiveDate,
    pub location: Option<GeoPoint>,
    pub notes: String,
    pub sync_state: SyncState,
    pub sync_error: Option<String>,
    pub sync_error_at: Option<NaiveDateTime>,
    pub server_id: Option<i64>,
    pub origin: RecordOrigin,
}

impl AttendanceRecord {
    /// A fresh, successful, not yet synced punch made on this device.
    pub fn new_local_punch(
        user: &UserIdentity,
        punch_type: PunchType,
        timestamp: NaiveDateTime,
        location: GeoPoint,
        notes: String,
    ) -> Self {
        Self {
            correlation_id: new_correlation_id(),
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            punch_type: Some(punch_type),
            status: PunchStatus::Success,
            timestamp,
            date: timestamp.date(),
            location: Some(location),
            notes,
            sync_state: SyncState::Pending,
            sync_error: None,
            sync_error_at: None,
            server_id: None,
            origin: RecordOrigin::Local,
        }
    }

    pub fn is_effective(&self) -> bool {
        self.status.is_effective()
    }

    /// Type used for day aggregation; legacy untyped punches count as check-ins.
    pub fn effective_type(&self) -> PunchType {
        self.punch_type.unwrap_or(PunchType::Checkin)
    }
}

pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Deterministic local key for a record pulled from the remote store.
pub fn server_key(server_id: i64) -> String {
    format!("{}{}", SERVER_KEY_PREFIX, server_id)
}

/// Per `(date, punch_type)` automatic attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryBudget {
    pub attempts: u32,
    pub last_attempt_at: Option<NaiveDateTime>,
}

/// Typed per-user settings blob.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSettings {
    pub anchor: Option<GeoPoint>,
    pub radius_m: f64,
    pub auto_punch_enabled: bool,
    /// After this time without a check-in the user is nudged to request a correction.
    pub punch_deadline: NaiveTime,
    pub last_sync_error: Option<String>,
    pub last_sync_error_at: Option<NaiveDateTime>,
    pub last_checkin_reminder: Option<NaiveDate>,
    pub last_checkout_reminder: Option<NaiveDate>,
    pub last_correction_reminder: Option<NaiveDate>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            anchor: None,
            radius_m: 100.0,
            auto_punch_enabled: false,
            punch_deadline: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            last_sync_error: None,
            last_sync_error_at: None,
            last_checkin_reminder: None,
            last_checkout_reminder: None,
            last_correction_reminder: None,
        }
    }
}

impl UserSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(anyhow::anyhow!(
                "Geofence radius must be a positive number of meters, got {}",
                self.radius_m
            ));
        }
        if let Some(anchor) = self.anchor {
            if !anchor.is_valid() {
                return Err(anyhow::anyhow!(
                    "Anchor coordinate is out of range: {}, {}",
                    anchor.lat,
                    anchor.lon
                ));
            }
        }
        Ok(())
    }
}
