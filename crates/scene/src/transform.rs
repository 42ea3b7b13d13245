//! Position, rotation and scale of a scene object.
//!
//! The demo scene bakes transforms into vertex data at load time, so the
//! renderer never sees a `Transform`; it only sees world-space vertices.
//!
//! # Example
//!
//! ```
//! use deferred_scene::Transform;
//! use glam::Vec3;
//!
//! let transform = Transform::new()
//!     .with_position(Vec3::new(1.0, 0.0, 0.0))
//!     .with_scale(Vec3::splat(2.0));
//! let p = transform.transform_point(Vec3::new(0.5, 0.0, 0.0));
//! assert!((p - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
//! ```

use glam::{Mat3, Mat4, Quat, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Inverse transpose of the upper 3x3, or identity when not invertible.
    pub fn normal_matrix(&self) -> Mat3 {
        const EPSILON: f32 = 1e-6;
        let model = Mat3::from_mat4(self.matrix());
        if model.determinant().abs() < EPSILON {
            Mat3::IDENTITY
        } else {
            model.inverse().transpose()
        }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.matrix().transform_point3(point)
    }

    pub fn transform_normal(&self, normal: Vec3) -> Vec3 {
        (self.normal_matrix() * normal).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < EPSILON
    }

    #[test]
    fn test_transform_default() {
        let t = Transform::default();
        assert_eq!(t.matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_normal_matrix_with_scale() {
        let t = Transform::new().with_scale(Vec3::new(2.0, 1.0, 1.0));
        let n = t.transform_normal(Vec3::X);
        assert!(approx_eq_vec3(n, Vec3::X));
    }

    #[test]
    fn test_normal_matrix_non_invertible() {
        let t = Transform::new().with_scale(Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(t.normal_matrix(), Mat3::IDENTITY);
    }

    #[test]
    fn test_rotated_point() {
        let t = Transform::new()
            .with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2))
            .with_position(Vec3::new(0.0, 1.0, 0.0));
        let p = t.transform_point(Vec3::X);
        assert!(approx_eq_vec3(p, Vec3::new(0.0, 1.0, -1.0)));
    }
}
