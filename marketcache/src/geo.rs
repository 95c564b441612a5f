//! Great-circle geometry and geohash area buckets

use crate::error::{CacheError, Result};
use geohash::{Coord, decode, encode};
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geohash length of the area buckets used for invalidation (cells of
/// roughly 4.9 km x 4.9 km at the equator).
pub const AREA_BUCKET_PRECISION: usize = 5;

/// Coordinate (latitude, longitude) in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CacheError::InvalidValue(format!(
                "Latitude must be between -90 and 90, got: {}",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CacheError::InvalidValue(format!(
                "Longitude must be between -180 and 180, got: {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance to `other` in kilometres
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine distance in kilometres on a sphere of radius 6371 km
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Geohash bucket containing `coord`
pub fn area_bucket(coord: Coordinate) -> Result<String> {
    encode(
        Coord {
            x: coord.longitude,
            y: coord.latitude,
        },
        AREA_BUCKET_PRECISION,
    )
    .map_err(|e| CacheError::InvalidValue(format!("cannot geohash {:?}: {}", coord, e)))
}

/// Whether any point of `bucket` can lie within `radius_km` of `center`.
///
/// Conservative: compares the distance to the cell center against the radius
/// plus the cell's half-diagonal, so it never rejects a cell that overlaps.
pub fn bucket_may_intersect(bucket: &str, center: Coordinate, radius_km: f64) -> Result<bool> {
    let (cell_center, lon_err, lat_err) = decode(bucket)
        .map_err(|e| CacheError::InvalidValue(format!("bad geohash '{}': {}", bucket, e)))?;

    let corners = [
        (cell_center.y + lat_err, cell_center.x + lon_err),
        (cell_center.y + lat_err, cell_center.x - lon_err),
        (cell_center.y - lat_err, cell_center.x + lon_err),
        (cell_center.y - lat_err, cell_center.x - lon_err),
    ];
    let half_diagonal = corners
        .iter()
        .map(|&(lat, lon)| haversine_km(cell_center.y, cell_center.x, lat, lon))
        .fold(0.0, f64::max);

    let to_center = haversine_km(center.latitude, center.longitude, cell_center.y, cell_center.x);
    Ok(to_center <= radius_km + half_diagonal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_york_to_los_angeles() {
        let d = haversine_km(40.7128, -74.0060, 34.0522, -118.2437);
        assert!((d - 3936.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_zero_distance_and_symmetry() {
        assert_eq!(haversine_km(14.5995, 120.9842, 14.5995, 120.9842), 0.0);
        let ab = haversine_km(14.5995, 120.9842, 14.60, 120.98);
        let ba = haversine_km(14.60, 120.98, 14.5995, 120.9842);
        assert!((ab - ba).abs() < 1e-9);
        assert!(ab < 1.0);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(91.0, 0.0).is_err());
        assert!(Coordinate::new(0.0, -181.0).is_err());
        assert!(Coordinate::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn test_area_bucket_is_stable() {
        let manila = Coordinate::new(14.5995, 120.9842).unwrap();
        let a = area_bucket(manila).unwrap();
        let b = area_bucket(Coordinate::new(14.5996, 120.9843).unwrap()).unwrap();
        assert_eq!(a.len(), AREA_BUCKET_PRECISION);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bucket_intersection() {
        let manila = Coordinate::new(14.5995, 120.9842).unwrap();
        let bucket = area_bucket(manila).unwrap();
        assert!(bucket_may_intersect(&bucket, manila, 0.0).unwrap());

        let tokyo = Coordinate::new(35.6762, 139.6503).unwrap();
        assert!(!bucket_may_intersect(&bucket, tokyo, 100.0).unwrap());
        assert!(bucket_may_intersect(&bucket, tokyo, 5000.0).unwrap());
    }

    #[test]
    fn test_bad_bucket() {
        assert!(bucket_may_intersect("not-a-hash!", Coordinate::new(0.0, 0.0).unwrap(), 1.0).is_err());
    }
}
