//! Location fixes consumed by the punch engine.
//!
//! The engine never talks to a GPS driver; something outside feeds fixes in.

use crate::database::models::GeoPoint;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub point: GeoPoint,
    pub age_seconds: u64,
}

#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Last known device location, if any.
    fn current_fix(&self) -> Option<LocationFix>;

    /// Ask for a fresh fix and wait up to `timeout` for it.
    async fn request_fix(&self, timeout: Duration) -> Option<LocationFix> {
        let _ = timeout;
        self.current_fix()
    }
}

/// Location cell updated by a device feed and read by the engine.
#[derive(Debug)]
pub struct SharedLocation {
    tx: watch::Sender<Option<(GeoPoint, Instant)>>,
}

impl Default for SharedLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLocation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish a new fix. Invalid coordinates are dropped.
    pub fn update(&self, point: GeoPoint) -> bool {
        if !point.is_valid() {
            tracing::warn!(lat = point.lat, lon = point.lon, "Ignoring invalid location fix");
            return false;
        }
        self.tx.send_replace(Some((point, Instant::now())));
        true
    }
}

#[async_trait]
impl LocationSource for SharedLocation {
    fn current_fix(&self) -> Option<LocationFix> {
        let (point, seen_at) = (*self.tx.borrow())?;
        Some(LocationFix {
            point,
            age_seconds: seen_at.elapsed().as_secs(),
        })
    }

    async fn request_fix(&self, timeout: Duration) -> Option<LocationFix> {
        // A fresh subscriber has already seen the current value.
        let mut rx = self.tx.subscribe();
        match tokio::time::timeout(timeout, rx.changed()).await {
            Ok(Ok(())) => self.current_fix(),
            _ => None,
        }
    }
}

/// Fixed fix, e.g. coordinates passed on the command line.
#[derive(Debug, Default)]
pub struct StaticLocation {
    fix: Mutex<Option<LocationFix>>,
}

impl StaticLocation {
    pub fn new(fix: Option<LocationFix>) -> Self {
        Self {
            fix: Mutex::new(fix),
        }
    }

    pub fn at(point: GeoPoint) -> Self {
        Self::new(Some(LocationFix {
            point,
            age_seconds: 0,
        }))
    }

    pub fn set(&self, fix: Option<LocationFix>) {
        if let Ok(mut guard) = self.fix.lock() {
            *guard = fix;
        }
    }
}

#[async_trait]
impl LocationSource for StaticLocation {
    fn current_fix(&self) -> Option<LocationFix> {
        self.fix.lock().ok().and_then(|guard| *guard)
    }
}

/// Parse `"lat, lon"` as typed by users or fed by a device bridge.
pub fn parse_location_text(text: &str) -> Option<GeoPoint> {
    let mut parts = text.split(',').map(str::trim);
    let lat: f64 = parts.next()?.parse().ok()?;
    let lon: f64 = parts.next()?.parse().ok()?;
    let point = GeoPoint::new(lat, lon);
    point.is_valid().then_some(point)
}
