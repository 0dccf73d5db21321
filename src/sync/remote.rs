//! Remote attendance store: interface and HTTP client.

use crate::error::{SyncError, SyncResult};
use crate::utils::time::MonthKey;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CID_TAG_OPEN: &str = "[cid:";

/// Outgoing punch payload. `correlation_id` is sent as a field; servers that
/// ignore it still see the id tagged in `notes`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PunchSubmission {
    pub group_id: Option<i64>,
    pub status: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub notes: String,
    pub client_time: Option<String>,
    pub punch_type: Option<String>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteRecord {
    pub id: i64,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub punched_at: String,
    #[serde(default)]
    pub client_time: Option<String>,
    #[serde(default)]
    pub punch_type: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl RemoteRecord {
    /// Correlation id from the native field, falling back to the notes tag.
    pub fn correlation_id(&self) -> Option<String> {
        self.correlation_id
            .as_deref()
            .map(str::trim)
            .filter(|cid| !cid.is_empty())
            .or_else(|| extract_cid_tag(&self.notes))
            .map(str::to_string)
    }
}

#[async_trait]
pub trait RemoteAttendanceClient: Send + Sync {
    async fn submit_punch(&self, punch: &PunchSubmission) -> SyncResult<RemoteRecord>;

    async fn fetch_month(&self, month: MonthKey) -> SyncResult<Vec<RemoteRecord>>;

    /// Cheap liveness probe. Never errors.
    async fn is_reachable(&self) -> bool;
}

pub fn cid_tag(correlation_id: &str) -> String {
    format!("{}{}]", CID_TAG_OPEN, correlation_id)
}

/// Append the cid tag to `notes` unless it is already there.
pub fn tag_notes(notes: &str, correlation_id: &str) -> String {
    let tag = cid_tag(correlation_id);
    if notes.contains(&tag) {
        notes.to_string()
    } else {
        format!("{} {}", notes, tag).trim().to_string()
    }
}

pub fn extract_cid_tag(notes: &str) -> Option<&str> {
    let start = notes.find(CID_TAG_OPEN)? + CID_TAG_OPEN.len();
    let len = notes[start..].find(']')?;
    let cid = notes[start..start + len].trim();
    (!cid.is_empty()).then_some(cid)
}

#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl HttpRemoteClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            token: token.filter(|t| !t.trim().is_empty()),
            client: reqwest::Client::builder().timeout(timeout).build()?,
            probe_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn ensure_configured(&self) -> SyncResult<()> {
        if self.base_url.is_empty() {
            return Err(SyncError::NetworkUnreachable(
                "no server URL configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAttendanceClient for HttpRemoteClient {
    async fn submit_punch(&self, punch: &PunchSubmission) -> SyncResult<RemoteRecord> {
        self.ensure_configured()?;

        let response = self
            .authorize(self.client.post(self.url("/attendance/punch")))
            .json(punch)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::RemoteRejected(parse_api_error(status, &body)));
        }

        Ok(response.json::<RemoteRecord>().await?)
    }

    async fn fetch_month(&self, month: MonthKey) -> SyncResult<Vec<RemoteRecord>> {
        self.ensure_configured()?;

        let response = self
            .authorize(self.client.get(self.url("/attendance/month")))
            .query(&[("month", month.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::RemoteRejected(parse_api_error(status, &body)));
        }

        Ok(response.json::<Vec<RemoteRecord>>().await?)
    }

    async fn is_reachable(&self) -> bool {
        if self.base_url.is_empty() {
            return false;
        }
        match self
            .client
            .get(self.url("/health"))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!("Health probe failed: {}", e);
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    detail: Option<serde_json::Value>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        match payload.detail {
            Some(serde_json::Value::String(detail)) => {
                return format!("{} ({})", detail.trim(), status.as_u16());
            }
            Some(other) => return format!("{} ({})", other, status.as_u16()),
            None => {}
        }
    }

    format!("HTTP {}", status.as_u16())
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Err(anyhow::anyhow!(
            "Server URL must include http:// or https://: {}",
            raw
        ))
    }
}
