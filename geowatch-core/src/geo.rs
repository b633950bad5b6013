//! Geographic helpers

use crate::EARTH_RADIUS_KM;

/// Whether a coordinate pair is finite and within WGS84 range
pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Great-circle distance in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Arithmetic mean of a set of points. Good enough for the small regions
/// this is used on; it does not handle the antimeridian.
pub fn mean_point<I>(points: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (mut lat_sum, mut lon_sum, mut n) = (0.0, 0.0, 0usize);
    for (lat, lon) in points {
        lat_sum += lat;
        lon_sum += lon;
        n += 1;
    }
    (n > 0).then(|| (lat_sum / n as f64, lon_sum / n as f64))
}
