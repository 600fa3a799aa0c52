//! Illumination geometry
//!
//! Coordinate system: +X East, +Y North, +Z Up. Azimuth is measured
//! clockwise from north, elevation above the horizon.

use crate::types::LightVector;

/// Convert sun azimuth/elevation angles (degrees) into a unit light vector
///
/// Pure function; any finite input yields a unit vector by construction,
/// the explicit renormalization only mops up rounding.
pub fn light_direction(azimuth_deg: f64, elevation_deg: f64) -> LightVector {
    let az = azimuth_deg.to_radians();
    let el = elevation_deg.to_radians();

    let z = el.sin();
    let horizontal = el.cos();
    let x = horizontal * az.sin(); // East
    let y = horizontal * az.cos(); // North

    let norm = (x * x + y * y + z * z).sqrt();
    [x / norm, y / norm, z / norm]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn norm(v: LightVector) -> f64 {
        (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
    }

    #[test]
    fn light_vector_is_unit_for_many_angles() {
        for az in (-360..=720).step_by(37) {
            for el in (-90..=90).step_by(13) {
                let v = light_direction(az as f64, el as f64);
                assert!((norm(v) - 1.0).abs() < 1e-9, "az={} el={}", az, el);
            }
        }
    }

    #[test]
    fn zenith_sun_points_straight_up() {
        let v = light_direction(0.0, 90.0);
        assert_relative_eq!(v[2], 1.0, epsilon = 1e-6);
        assert!(v[0].abs() < 1e-6 && v[1].abs() < 1e-6);
    }

    #[test]
    fn north_azimuth_at_horizon_points_north() {
        let v = light_direction(0.0, 0.0);
        assert_relative_eq!(v[1], 1.0, epsilon = 1e-6);
        assert!(v[0].abs() < 1e-6 && v[2].abs() < 1e-6);
    }

    #[test]
    fn east_azimuth_has_positive_x() {
        let v = light_direction(90.0, 45.0);
        assert!(v[0] > 0.5);
        assert!(v[1].abs() < 1e-6);
    }
}
