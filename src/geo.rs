//! Great-circle distance between position fixes.

use crate::types::Position;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two positions.
pub fn distance_m(from: &Position, to: &Position) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlat = (to.latitude - from.latitude).to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        let p = Position::new(51.5, -0.12);
        assert_eq!(distance_m(&p, &p), 0.0);
    }

    #[test]
    fn test_thousandth_degree_on_equator() {
        // 0.001° of longitude on the equator is R * 0.001 * π / 180.
        let d = distance_m(&Position::new(0.0, 0.0), &Position::new(0.0, 0.001));
        let expected = EARTH_RADIUS_M * 0.001_f64.to_radians();
        assert!((d - expected).abs() < 1e-6, "got {d}, expected {expected}");
        assert!((d - 111.19).abs() < 0.01);
    }

    #[test]
    fn test_symmetric() {
        let a = Position::new(48.8566, 2.3522);
        let b = Position::new(51.5074, -0.1278);
        assert!((distance_m(&a, &b) - distance_m(&b, &a)).abs() < 1e-9);
        // Paris to London, roughly 344 km.
        assert!((distance_m(&a, &b) / 1000.0 - 343.5).abs() < 2.0);
    }
}
