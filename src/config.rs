use crate::runtime::RuntimeOptions;
use anyhow::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub username: String,
    pub user_id: String,
    pub server_url: String,
    pub api_token: Option<String>,
    pub http_timeout: Duration,
    pub probe_timeout: Duration,
    pub auto_punch_interval: Duration,
    pub sync_interval: Duration,
    pub net_monitor_interval: Duration,
    pub location_max_age: Duration,
    pub first_fix_timeout: Duration,
    pub push_batch_size: usize,
    pub pull_min_interval: Duration,
    pub embed_cid_tag: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let username = env::var("KINTAI_USERNAME")
            .map_err(|_| anyhow::anyhow!("KINTAI_USERNAME environment variable is required"))?;
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(anyhow::anyhow!("KINTAI_USERNAME must not be empty"));
        }

        let user_id = env::var("KINTAI_USER_ID").unwrap_or_else(|_| username.clone());

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:attendance.db".to_string());

        let server_url = env::var("SERVER_URL").unwrap_or_default();
        let api_token = env::var("API_TOKEN").ok().filter(|t| !t.trim().is_empty());

        Ok(Config {
            database_url,
            username,
            user_id,
            server_url,
            api_token,
            http_timeout: secs_var("HTTP_TIMEOUT_SECS", 6)?,
            probe_timeout: secs_var("PROBE_TIMEOUT_SECS", 3)?,
            auto_punch_interval: secs_var("AUTO_PUNCH_INTERVAL_SECS", 60)?,
            sync_interval: secs_var("SYNC_INTERVAL_SECS", 20)?,
            net_monitor_interval: secs_var("NET_MONITOR_INTERVAL_SECS", 12)?,
            location_max_age: secs_var("LOCATION_MAX_AGE_SECS", 120)?,
            first_fix_timeout: secs_var("FIRST_FIX_TIMEOUT_SECS", 8)?,
            push_batch_size: parse_var("PUSH_BATCH_SIZE", 80)?,
            pull_min_interval: secs_var("PULL_MIN_INTERVAL_SECS", 25)?,
            embed_cid_tag: parse_var("EMBED_CID_TAG", true)?,
        })
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            auto_interval: self.auto_punch_interval,
            sync_interval: self.sync_interval,
            monitor_interval: self.net_monitor_interval,
            fix_max_age: self.location_max_age,
            first_fix_timeout: self.first_fix_timeout,
            push_batch: self.push_batch_size,
            pull_min_interval: self.pull_min_interval,
            embed_cid_tag: self.embed_cid_tag,
            ..RuntimeOptions::default()
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", name, raw, e)),
        _ => Ok(default),
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    let secs: u64 = parse_var(name, default)?;
    if secs == 0 {
        return Err(anyhow::anyhow!("{} must be greater than zero", name));
    }
    Ok(Duration::from_secs(secs))
}
