// src/distance.rs

use crate::geo::GeoPoint;

/* ---------------- CONSTANTES ---------------- */

// Average radius of the Earth in kilometers (spherical model).
pub const EARTH_RADIUS_KM: f64 = 6371.0;
// Conversion factor kilometers → miles.
pub const KM_TO_MILES: f64 = 0.621371;

/* ---------------- NUMERIC UTILS -------------- */

// Rounding of a floating-point number to N decimal places (max 10).
// Intentional limit to avoid excessively large exponents.
pub fn round(value: f64, decimals: u32) -> f64 {
    let precision = decimals.min(10);
    let factor = 10_f64.powi(precision as i32);
    (value * factor).round() / factor
}

pub fn km_to_miles(km: f64) -> f64 {
    km * KM_TO_MILES
}

/* ---------------- GEO DISTANCE--------------- */

/// Great circle distance in kilometers (haversine).
///
/// Total over valid points: `h` is clamped to `[0, 1]` so near-antipodal
/// pairs never feed a negative value into the square root, and coincident
/// points give exactly `0.0`.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude().to_radians();
    let lon1 = a.longitude().to_radians();
    let lat2 = b.latitude().to_radians();
    let lon2 = b.longitude().to_radians();

    // Angular differences.
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/* ---------------- UNIT SPHERE --------------- */

// Position on the unit sphere. Straight-line (chord) distance between two
// such vectors grows monotonically with great circle distance, with no
// seam at the antimeridian and no singularity at the poles.
pub fn unit_vector(p: &GeoPoint) -> [f64; 3] {
    let lat = p.latitude().to_radians();
    let lon = p.longitude().to_radians();
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

pub fn chord_length(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

// Chord on the unit sphere spanned by an arc of `km` on the Earth.
pub fn km_to_chord(km: f64) -> f64 {
    let angle = (km / EARTH_RADIUS_KM).min(std::f64::consts::PI);
    2.0 * (angle / 2.0).sin()
}

/* ---------------- TEST ---------------- */
