use serde::{Deserialize, Serialize};

/// Mean Earth radius (IUGG), in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeofenceVerdict {
    pub distance_m: f64,
    pub radius_m: f64,
    pub within: bool,
}

impl GeofenceVerdict {
    /// User-facing summary, distances truncated to whole metres.
    pub fn message(&self) -> String {
        if self.within {
            format!("Location Verified ({}m)", self.distance_m as i64)
        } else {
            format!(
                "Too far from office ({}m > {}m)",
                self.distance_m as i64, self.radius_m as i64
            )
        }
    }
}

/// Great-circle distance in metres (haversine).
pub fn haversine_distance(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Whether `device` lies within `radius_m` of `target`. The boundary counts as inside.
pub fn check(device: Coordinates, target: Coordinates, radius_m: f64) -> GeofenceVerdict {
    let distance_m = haversine_distance(device, target);
    GeofenceVerdict {
        distance_m,
        radius_m,
        within: distance_m <= radius_m,
    }
}
