//! Error taxonomy for punching and synchronization.

use crate::database::models::PunchType;
use chrono::NaiveDateTime;
use thiserror::Error;

/// Why a punch attempt did not produce a record.
#[derive(Debug, Error)]
pub enum PunchError {
    /// Informational: nothing to punch right now.
    #[error("{reason}")]
    NoActionNeeded { reason: String },

    #[error("{} is not allowed at this time of day", .punch_type.label())]
    OutsideTimeWindow { punch_type: PunchType },

    #[error("punch time cannot be earlier than the last punch today ({latest})")]
    TimeTravelRejected { latest: NaiveDateTime },

    #[error("not within the punch area ({distance_m:.0} m away)")]
    OutOfRange { distance_m: f64 },

    #[error("location is not available yet")]
    LocationUnavailable {
        /// One-time hint shown after the first fix times out.
        hint: Option<String>,
    },

    #[error("set a punch location before punching")]
    NotConfigured,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PunchError {
    pub fn no_action(reason: impl Into<String>) -> Self {
        PunchError::NoActionNeeded {
            reason: reason.into(),
        }
    }

    /// Validation failures end the current attempt and are shown to manual callers.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PunchError::OutsideTimeWindow { .. }
                | PunchError::TimeTravelRejected { .. }
                | PunchError::OutOfRange { .. }
        )
    }

    /// User-facing message for manual punches.
    pub fn user_message(&self) -> String {
        match self {
            PunchError::OutOfRange { distance_m } => format!(
                "Not within the punch area ({:.0} m away). Move closer and try again.",
                distance_m
            ),
            PunchError::LocationUnavailable { hint: Some(hint) } => {
                format!("Getting your location, please try again shortly.\n\n{}", hint)
            }
            PunchError::LocationUnavailable { hint: None } => {
                "Getting your location, please try again shortly.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Synchronization failures. None of them drop local data.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote store is unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("remote store rejected the request: {0}")]
    RemoteRejected(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_status() || err.is_decode() {
            SyncError::RemoteRejected(err.to_string())
        } else {
            SyncError::NetworkUnreachable(err.to_string())
        }
    }
}

pub type PunchResult<T> = std::result::Result<T, PunchError>;
pub type SyncResult<T> = std::result::Result<T, SyncError>;
