use thiserror::Error;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const LAT_LIMIT: f64 = 90.0;
pub const LNG_LIMIT: f64 = 180.0;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinateError {
    #[error("coordinates are not finite")]
    NotFinite,
    #[error("coordinates out of range: lat={lat}, lng={lng}")]
    OutOfRange { lat: f64, lng: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckedCoordinates {
    pub lat: f64,
    pub lng: f64,
    pub swapped: bool,
}

/// Validate a lat/lng pair, repairing an obvious transposition.
///
/// A pair is repaired only when exactly one value is outside its own range
/// and swapping yields a fully valid pair. Anything else out of range is
/// rejected rather than guessed at.
pub fn check_coordinates(lat: f64, lng: f64) -> Result<CheckedCoordinates, CoordinateError> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(CoordinateError::NotFinite);
    }

    let lat_ok = lat.abs() <= LAT_LIMIT;
    let lng_ok = lng.abs() <= LNG_LIMIT;

    if lat_ok && lng_ok {
        return Ok(CheckedCoordinates {
            lat,
            lng,
            swapped: false,
        });
    }

    let exactly_one_bad = lat_ok != lng_ok;
    let swap_valid = lng.abs() <= LAT_LIMIT && lat.abs() <= LNG_LIMIT;
    if exactly_one_bad && swap_valid {
        return Ok(CheckedCoordinates {
            lat: lng,
            lng: lat,
            swapped: true,
        });
    }

    Err(CoordinateError::OutOfRange { lat, lng })
}

/// Great-circle distance in meters between two lat/lng points.
pub fn haversine_meters(a_lat: f64, a_lng: f64, b_lat: f64, b_lng: f64) -> f64 {
    let d_lat = (b_lat - a_lat).to_radians();
    let d_lng = (b_lng - a_lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a_lat.to_radians().cos() * b_lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Axis-aligned box that fully contains the circle of `radius_m` around a
/// point. Used as an index-friendly prefilter; callers re-check with
/// [`haversine_meters`]. Degenerates to the full longitude span near the
/// poles or across the antimeridian.
pub fn bounding_box(lat: f64, lng: f64, radius_m: f64) -> BoundingBox {
    let d_lat = (radius_m / EARTH_RADIUS_M).to_degrees();
    let min_lat = (lat - d_lat).max(-LAT_LIMIT);
    let max_lat = (lat + d_lat).min(LAT_LIMIT);

    let cos_lat = lat.to_radians().cos();
    if cos_lat < 1e-6 {
        return BoundingBox {
            min_lat,
            max_lat,
            min_lng: -LNG_LIMIT,
            max_lng: LNG_LIMIT,
        };
    }

    let d_lng = d_lat / cos_lat;
    let min_lng = lng - d_lng;
    let max_lng = lng + d_lng;
    if min_lng < -LNG_LIMIT || max_lng > LNG_LIMIT {
        // Wraps the antimeridian; widen instead of splitting the range.
        return BoundingBox {
            min_lat,
            max_lat,
            min_lng: -LNG_LIMIT,
            max_lng: LNG_LIMIT,
        };
    }

    BoundingBox {
        min_lat,
        max_lat,
        min_lng,
        max_lng,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_pair_passes_untouched() {
        let c = check_coordinates(42.6, -8.1).unwrap();
        assert_eq!(c.lat, 42.6);
        assert_eq!(c.lng, -8.1);
        assert!(!c.swapped);
    }

    #[test]
    fn transposed_pair_is_swapped_back() {
        // lat out of range, the swap yields a valid pair
        let c = check_coordinates(95.0, 40.4).unwrap();
        assert_eq!(c.lat, 40.4);
        assert_eq!(c.lng, 95.0);
        assert!(c.swapped);
    }

    #[test]
    fn double_invalid_pair_is_rejected() {
        assert!(matches!(
            check_coordinates(200.0, 400.0),
            Err(CoordinateError::OutOfRange { .. })
        ));
    }

    #[test]
    fn unrepairable_single_invalid_is_rejected() {
        // lng out of range and still out of range as a lat
        assert!(check_coordinates(40.0, 200.0).is_err());
    }

    #[test]
    fn non_finite_is_rejected() {
        assert_eq!(
            check_coordinates(f64::NAN, 10.0),
            Err(CoordinateError::NotFinite)
        );
        assert_eq!(
            check_coordinates(10.0, f64::INFINITY),
            Err(CoordinateError::NotFinite)
        );
    }

    #[test]
    fn boundary_values_are_valid() {
        assert!(check_coordinates(90.0, 180.0).is_ok());
        assert!(check_coordinates(-90.0, -180.0).is_ok());
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert!(haversine_meters(42.88, -8.54, 42.88, -8.54) < 1e-6);
    }

    #[test]
    fn haversine_known_distance() {
        // One degree of latitude is ~111.2 km
        let d = haversine_meters(42.0, -8.0, 43.0, -8.0);
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn haversine_small_offset() {
        // ~0.00225 deg of latitude is ~250 m
        let d = haversine_meters(42.88, -8.54, 42.88 + 250.0 / 111_195.0, -8.54);
        assert!((d - 250.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn bounding_box_contains_circle_edge() {
        let b = bounding_box(42.88, -8.54, 500.0);
        for bearing in 0..8 {
            let theta = f64::from(bearing) * std::f64::consts::FRAC_PI_4;
            let lat = 42.88 + (500.0 / 111_195.0) * theta.cos();
            let lng = -8.54 + (500.0 / 111_195.0) * theta.sin() / 42.88_f64.to_radians().cos();
            assert!(b.contains(lat, lng), "bearing {bearing} escaped the box");
        }
    }

    #[test]
    fn bounding_box_clamps_at_pole() {
        let b = bounding_box(89.9999, 0.0, 10_000.0);
        assert_eq!(b.min_lng, -180.0);
        assert_eq!(b.max_lng, 180.0);
        assert_eq!(b.max_lat, 90.0);
    }
}
