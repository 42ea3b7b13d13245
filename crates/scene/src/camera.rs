//! Perspective camera and orbit controller.

use glam::{Mat4, Quat, Vec3};

/// A perspective camera.
#[derive(Clone, Debug)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Camera rotation
    pub rotation: Quat,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation: Quat::IDENTITY,
            fov_y: 45.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 500.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_perspective(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        self.fov_y = fov_y;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
    }

    /// Updates the aspect ratio from a surface size. Zero sizes are ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        let target = self.position + self.forward();
        Mat4::look_at_rh(self.position, target, Vec3::Y)
    }

    /// Projection matrix with the Vulkan Y-flip applied.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Rotates the camera to face `target`.
    pub fn look_at(&mut self, target: Vec3) {
        let to_target = target - self.position;
        if to_target.length_squared() <= f32::EPSILON {
            return;
        }
        let view = Mat4::look_at_rh(self.position, target, Vec3::Y);
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        self.rotation = rotation;
    }
}

/// Orbits a camera around a target point on a horizontal circle.
#[derive(Clone, Debug)]
pub struct OrbitController {
    pub target: Vec3,
    pub distance: f32,
    pub height: f32,
    /// Current azimuth in radians.
    pub angle: f32,
    /// Angular speed in radians per second.
    pub speed: f32,
    pub paused: bool,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 12.0,
            height: 5.0,
            angle: 0.0,
            speed: 0.25,
            paused: false,
        }
    }
}

impl OrbitController {
    /// Frames a bounding sphere so the whole scene stays in view.
    pub fn framing(center: Vec3, radius: f32) -> Self {
        let radius = radius.max(1.0);
        Self {
            target: center,
            distance: radius * 2.2,
            height: radius * 0.9,
            ..Self::default()
        }
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Advances the orbit by `dt` seconds and places the camera.
    pub fn update(&mut self, camera: &mut Camera, dt: f32) {
        if !self.paused {
            self.angle = (self.angle + self.speed * dt) % std::f32::consts::TAU;
        }
        camera.position = self.eye();
        camera.look_at(self.target);
    }

    pub fn eye(&self) -> Vec3 {
        self.target
            + Vec3::new(
                self.angle.sin() * self.distance,
                self.height,
                self.angle.cos() * self.distance,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    #[test]
    fn test_look_at_faces_target() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(3.0, 2.0, 4.0);
        camera.look_at(Vec3::ZERO);
        let expected = (Vec3::ZERO - camera.position).normalize();
        assert!((camera.forward() - expected).length() < EPSILON);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::new();
        assert!(camera.projection_matrix().y_axis.y < 0.0);
    }

    #[test]
    fn test_set_viewport_ignores_zero() {
        let mut camera = Camera::new();
        camera.set_viewport(800, 400);
        assert!((camera.aspect - 2.0).abs() < EPSILON);
        camera.set_viewport(0, 400);
        assert!((camera.aspect - 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_orbit_keeps_distance() {
        let mut orbit = OrbitController::default();
        let mut camera = Camera::new();
        orbit.update(&mut camera, 1.5);
        let offset = camera.position - orbit.target;
        let horizontal = Vec3::new(offset.x, 0.0, offset.z).length();
        assert!((horizontal - orbit.distance).abs() < EPSILON);
        assert!((offset.y - orbit.height).abs() < EPSILON);
    }

    #[test]
    fn test_paused_orbit_does_not_move() {
        let mut orbit = OrbitController::default();
        orbit.toggle_pause();
        let mut camera = Camera::new();
        orbit.update(&mut camera, 10.0);
        assert_eq!(orbit.angle, 0.0);
    }
}
