//! Great-circle helpers shared by the store and the ranking code.

use ::geo::{Distance, HaversineMeasure, Point};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for every distance in the engine.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Zero on either axis is the "no coordinates" marker of the upstream
    /// registry, so such points are never searched from or averaged.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat != 0.0
            && self.lng != 0.0
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<GeoPoint> for Point<f64> {
    fn from(p: GeoPoint) -> Self {
        Self::new(p.lng, p.lat)
    }
}

/// Haversine distance in kilometres between two points, on a sphere of
/// radius [`EARTH_RADIUS_KM`].
#[must_use]
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    HaversineMeasure::new(EARTH_RADIUS_KM).distance(Point::from(a), Point::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        let p = GeoPoint::new(-33.0472, -71.6127);
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_known_distance() {
        // Santiago centre to Valparaíso centre is roughly 100 km.
        let santiago = GeoPoint::new(-33.4489, -70.6693);
        let valparaiso = GeoPoint::new(-33.0472, -71.6127);
        let d = haversine_km(santiago, valparaiso);
        assert!((95.0..105.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = GeoPoint::new(-38.7359, -72.5904);
        let b = GeoPoint::new(-23.6509, -70.3975);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = haversine_km(GeoPoint::new(-33.0, -71.0), GeoPoint::new(-34.0, -71.0));
        assert!((d - 111.19).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_point_conversion_is_lng_lat() {
        let p = Point::from(GeoPoint::new(-33.0472, -71.6127));
        assert!((p.x() + 71.6127).abs() < f64::EPSILON);
        assert!((p.y() + 33.0472).abs() < f64::EPSILON);
    }

    #[test]
    fn test_usable_points() {
        assert!(GeoPoint::new(-33.04, -71.37).is_usable());
        assert!(!GeoPoint::new(0.0, 0.0).is_usable());
        assert!(!GeoPoint::new(-33.04, 0.0).is_usable());
        assert!(!GeoPoint::new(f64::NAN, -71.0).is_usable());
        assert!(!GeoPoint::new(-95.0, -71.0).is_usable());
    }
}
