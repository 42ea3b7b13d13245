//! Directional light.

use glam::Vec3;

/// A directional light (sun-like).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels, normalized
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Strength of the irradiance-map ambient term
    pub ambient: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            color: Vec3::new(1.0, 0.96, 0.9),
            intensity: 3.0,
            ambient: 0.35,
        }
    }
}

impl DirectionalLight {
    pub fn with_direction(mut self, direction: Vec3) -> Self {
        self.direction = direction.normalize_or(Vec3::NEG_Y);
        self
    }

    /// Color premultiplied by intensity.
    pub fn radiance(&self) -> Vec3 {
        self.color * self.intensity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_is_normalized() {
        let light = DirectionalLight::default().with_direction(Vec3::new(0.0, -4.0, 0.0));
        assert!((light.direction.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_direction_falls_back() {
        let light = DirectionalLight::default().with_direction(Vec3::ZERO);
        assert_eq!(light.direction, Vec3::NEG_Y);
    }
}
