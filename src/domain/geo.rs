//! Geofencing for the global feed.
//!
//! The feed pre-filters candidates with a bounding box computed by an
//! equirectangular approximation. There is no exact great-circle recheck and no
//! antimeridian wraparound: a video just across ±180° longitude from the
//! requester is not returned.

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Floor for `|cos(latitude)|` so the longitude span stays finite at the poles.
const MIN_COS_LATITUDE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Returns `None` unless `lat` is within [-90, 90] and `lon` within [-180, 180].
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self { lat, lon })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_max: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lon_min: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: Coordinates) -> bool {
        point.lat >= self.lat_min
            && point.lat <= self.lat_max
            && point.lon >= self.lon_min
            && point.lon <= self.lon_max
    }
}

/// Bounding box, in degrees, around `center` for a search radius in kilometres.
pub fn bounding_box(center: Coordinates, radius_km: f64) -> BoundingBox {
    let angular = (radius_km / EARTH_RADIUS_KM).to_degrees();
    let cos_lat = center.lat.to_radians().cos().abs().max(MIN_COS_LATITUDE);
    let lon_delta = angular / cos_lat;

    BoundingBox {
        lat_max: center.lat + angular,
        lat_min: center.lat - angular,
        lon_max: center.lon + lon_delta,
        lon_min: center.lon - lon_delta,
    }
}
