use crate::database::models::GeoPoint;
use crate::utils::time::parse_time_string;
use anyhow::Result;
use chrono::NaiveTime;

pub fn validate_coordinate(lat: f64, lon: f64) -> Result<GeoPoint> {
    let point = GeoPoint::new(lat, lon);
    if !point.is_valid() {
        return Err(anyhow::anyhow!(
            "Coordinates out of range: latitude must be within ±90 and longitude within ±180"
        ));
    }
    Ok(point)
}

pub fn validate_radius(radius_m: f64) -> Result<f64> {
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(anyhow::anyhow!("Radius must be a positive number of meters"));
    }

    if radius_m > 10_000.0 {
        return Err(anyhow::anyhow!(
            "Radius over 10 km does not make a useful geofence"
        ));
    }

    Ok(radius_m)
}

pub fn validate_deadline(time_str: &str) -> Result<NaiveTime> {
    parse_time_string(time_str)
}

pub fn parse_toggle(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(anyhow::anyhow!("Expected on or off, got {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_settings_input() {
        assert!(validate_coordinate(91.0, 0.0).is_err());
        assert!(validate_coordinate(31.2, 121.5).is_ok());
        assert!(validate_radius(0.0).is_err());
        assert!(validate_radius(f64::INFINITY).is_err());
        assert!(validate_radius(20_000.0).is_err());
        assert_eq!(validate_radius(150.0).unwrap(), 150.0);
        assert_eq!(
            validate_deadline("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert!(parse_toggle("ON").unwrap());
        assert!(!parse_toggle("off").unwrap());
        assert!(parse_toggle("maybe").is_err());
    }
}
