use crate::models::{BoundingBox, Property};

/// Earth's mean radius in miles
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Miles per degree of latitude
const MILES_PER_DEGREE: f64 = 69.0;

/// Calculate the Haversine distance between two points in miles
///
/// # Arguments
/// * `lat1` - Latitude of first point in degrees
/// * `lon1` - Longitude of first point in degrees
/// * `lat2` - Latitude of second point in degrees
/// * `lon2` - Longitude of second point in degrees
///
/// # Returns
/// Distance in miles. The haversine term is clamped to [0, 1] so identical
/// and antipodal points stay finite.
#[inline]
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_MILES * c
}

/// Distance between two properties in miles.
///
/// `None` means the distance is unknown because either side lacks
/// coordinates; callers fall back to ZIP/city matching.
pub fn property_distance(a: &Property, b: &Property) -> Option<f64> {
    let (lat1, lon1) = a.coordinates()?;
    let (lat2, lon2) = b.coordinates()?;
    Some(haversine_miles(lat1, lon1, lat2, lon2))
}

/// Calculate a bounding box around a center point
///
/// Cheap rectangular pre-filter for radius queries; every point within
/// `radius_miles` lies inside the box.
pub fn calculate_bounding_box(lat: f64, lon: f64, radius_miles: f64) -> BoundingBox {
    let lat_delta = radius_miles / MILES_PER_DEGREE;

    // 1 degree longitude shrinks with latitude
    let lon_delta = radius_miles / (MILES_PER_DEGREE * lat.to_radians().cos().abs().max(1e-6));

    BoundingBox {
        min_lat: lat - lat_delta,
        max_lat: lat + lat_delta,
        min_lon: lon - lon_delta,
        max_lon: lon + lon_delta,
    }
}

/// Check if a point is within a bounding box
#[inline]
pub fn is_within_bounding_box(lat: f64, lon: f64, bbox: &BoundingBox) -> bool {
    lat >= bbox.min_lat && lat <= bbox.max_lat && lon >= bbox.min_lon && lon <= bbox.max_lon
}
