//! Great-circle distance and geofence test.

use crate::database::models::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in meters. Non-finite input propagates as NaN; callers
/// validate coordinates first.
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c * 1000.0
}

pub fn in_range(distance_m: f64, radius_m: f64) -> bool {
    distance_m <= radius_m
}
