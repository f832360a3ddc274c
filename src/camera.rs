use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Orbit camera described by two angles and a distance from the origin.
///
/// `azimuth` rotates around the vertical axis and `polar` tilts the view
/// from the pole. The camera always looks back at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphericalCamera {
    #[serde(alias = "alpha")]
    pub azimuth: f32,
    #[serde(alias = "beta")]
    pub polar: f32,
    pub radius: f32,
}

impl SphericalCamera {
    pub const fn new(azimuth: f32, polar: f32, radius: f32) -> Self {
        Self {
            azimuth,
            polar,
            radius,
        }
    }

    /// Derives the view basis and position for the current angles.
    pub fn basis(&self) -> CameraBasis {
        update_camera(self.azimuth, self.polar, self.radius)
    }
}

impl Default for SphericalCamera {
    fn default() -> Self {
        Self::new(0.0, -FRAC_PI_4, 15.0)
    }
}

/// View basis handed to the shader through the uniform block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBasis {
    pub direction: Vec3,
    pub up: Vec3,
    pub right: Vec3,
    pub position: Vec3,
}

/// Builds the camera basis for the given spherical angles.
///
/// `up` is the view direction formula evaluated a quarter turn further in
/// polar angle, and `right = direction × up`. When `sin(beta)` is zero the
/// view looks straight down the pole; the basis is still produced but the
/// horizontal orientation only depends on `alpha` there.
pub fn update_camera(alpha: f32, beta: f32, radius: f32) -> CameraBasis {
    let direction = Vec3::new(
        -alpha.cos() * beta.sin(),
        -beta.cos(),
        -alpha.sin() * beta.sin(),
    );
    let beta_up = beta + FRAC_PI_2;
    let up = Vec3::new(
        alpha.cos() * beta_up.sin(),
        beta_up.cos(),
        alpha.sin() * beta_up.sin(),
    );
    let right = direction.cross(up);
    CameraBasis {
        direction,
        up,
        right,
        position: -direction * radius,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn assert_vec_eq(actual: Vec3, expected: Vec3) {
        assert!(
            actual.abs_diff_eq(expected, 1e-4),
            "expected {expected:?}, got {actual:?}"
        );
    }

    fn assert_orthonormal(basis: &CameraBasis) {
        for v in [basis.direction, basis.up, basis.right] {
            assert!((v.length() - 1.0).abs() < EPS, "{v:?} is not unit length");
        }
        assert!(basis.direction.dot(basis.up).abs() < EPS);
        assert!(basis.direction.dot(basis.right).abs() < EPS);
        assert!(basis.up.dot(basis.right).abs() < EPS);
    }

    #[test]
    fn default_camera_matches_reference_values() {
        let basis = SphericalCamera::default().basis();
        let h = std::f32::consts::FRAC_1_SQRT_2;
        assert_vec_eq(basis.direction, Vec3::new(h, -h, 0.0));
        assert_vec_eq(basis.up, Vec3::new(h, h, 0.0));
        assert_vec_eq(basis.right, Vec3::Z);
        assert_vec_eq(basis.position, Vec3::new(-10.6066, 10.6066, 0.0));
    }

    #[test]
    fn basis_is_orthonormal_for_assorted_angles() {
        let angles = [
            (0.0, -FRAC_PI_4),
            (0.3, 1.1),
            (-2.0, 2.5),
            (FRAC_PI_2, -0.7),
            (3.0, -2.9),
        ];
        for (alpha, beta) in angles {
            assert_orthonormal(&update_camera(alpha, beta, 1.0));
        }
    }

    #[test]
    fn basis_is_right_handed() {
        let basis = update_camera(0.8, -1.2, 4.0);
        assert!(basis.right.cross(basis.direction).dot(basis.up) > 0.0);
    }

    #[test]
    fn position_sits_at_radius_opposite_direction() {
        let basis = update_camera(1.3, 0.4, 7.5);
        assert_vec_eq(basis.position, -basis.direction * 7.5);
        assert!((basis.position.length() - 7.5).abs() < 1e-4);
    }

    #[test]
    fn polar_singularity_still_yields_a_basis() {
        let basis = update_camera(0.0, 0.0, 15.0);
        assert_vec_eq(basis.direction, Vec3::new(0.0, -1.0, 0.0));
        assert_vec_eq(basis.up, Vec3::new(1.0, 0.0, 0.0));
        assert_vec_eq(basis.right, Vec3::new(0.0, 0.0, 1.0));
        assert_orthonormal(&basis);
    }

    #[test]
    fn deserializes_angle_aliases() {
        let camera: SphericalCamera =
            serde_json::from_str(r#"{"alpha": 0.5, "beta": -1.0, "radius": 3.0}"#).unwrap();
        assert_eq!(camera, SphericalCamera::new(0.5, -1.0, 3.0));
    }
}
