use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Decimal places kept by [`Coordinates::grid_key`].
pub const GRID_PRECISION: u32 = 2;

/// Rejected coordinate input.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum GeoError {
    /// Latitude or longitude outside the valid range, or not finite.
    #[error("coordinates out of range: {lat}, {lng}")]
    OutOfRange {
        /// Offending latitude.
        lat: f64,
        /// Offending longitude.
        lng: f64,
    },
}

/// WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude, -90..=90.
    pub lat: f64,
    /// Longitude, -180..=180.
    pub lng: f64,
}

impl Coordinates {
    /// Validates and builds a coordinate pair.
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        if valid {
            Ok(Self { lat, lng })
        } else {
            Err(GeoError::OutOfRange { lat, lng })
        }
    }

    /// Haversine distance in miles.
    #[must_use]
    pub fn distance_miles(&self, other: &Self) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_MILES * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Coordinates scaled by `10^precision` and rounded to integers.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn rounded(&self, precision: u32) -> (i64, i64) {
        let scale = 10_f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
        ((self.lat * scale).round() as i64, (self.lng * scale).round() as i64)
    }

    /// Coarse cell grouping nearby coordinates.
    #[must_use]
    pub fn grid_key(&self) -> GridKey {
        let (lat, lng) = self.rounded(GRID_PRECISION);
        GridKey { lat, lng }
    }
}

/// Cell of the coarse spatial grid (hundredths of a degree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridKey {
    /// Scaled latitude.
    pub lat: i64,
    /// Scaled longitude.
    pub lng: i64,
}

impl GridKey {
    /// This cell and its eight neighbours.
    #[must_use]
    pub fn neighbourhood(&self) -> Vec<Self> {
        let mut cells = Vec::with_capacity(9);
        for d_lat in -1..=1 {
            for d_lng in -1..=1 {
                cells.push(Self {
                    lat: self.lat + d_lat,
                    lng: self.lng + d_lng,
                });
            }
        }
        cells
    }
}

impl fmt::Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.lat, self.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range() {
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -180.5).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
        assert!(Coordinates::new(38.5976, -80.4549).is_ok());
    }

    #[test]
    fn distance_matches_known_pair() {
        // Charleston, WV -> Morgantown, WV is roughly 130 miles.
        let charleston = Coordinates::new(38.3498, -81.6326).unwrap();
        let morgantown = Coordinates::new(39.6295, -79.9559).unwrap();
        let d = charleston.distance_miles(&morgantown);
        assert!((120.0..140.0).contains(&d), "distance was {d}");
        assert!(charleston.distance_miles(&charleston).abs() < 1e-9);
    }

    #[test]
    fn nearby_points_share_a_cell() {
        let a = Coordinates::new(38.5976, -80.4549).unwrap();
        let b = Coordinates::new(38.6001, -80.4512).unwrap();
        assert_eq!(a.grid_key(), b.grid_key());
        assert_eq!(a.grid_key().to_string(), "3860_-8045");
    }

    #[test]
    fn neighbourhood_has_nine_cells() {
        let key = GridKey { lat: 10, lng: -5 };
        let cells = key.neighbourhood();
        assert_eq!(cells.len(), 9);
        assert!(cells.contains(&key));
        assert!(cells.contains(&GridKey { lat: 11, lng: -6 }));
    }
}
