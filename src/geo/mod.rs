use crate::models::delivery::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    2.0 * EARTH_RADIUS_KM * haversine.sqrt().asin()
}

/// Distance shown to drivers, rounded to one decimal.
pub fn display_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    (haversine_km(a, b) * 10.0).round() / 10.0
}
