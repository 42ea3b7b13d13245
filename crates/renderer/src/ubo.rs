//! Uniform and push-constant layouts shared with the shaders.
//!
//! These structures must match the HLSL declarations in `shaders/` exactly.
//! All of them are `#[repr(C)]` and `Pod` so they can be written as bytes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use deferred_core::ToneMapOperator;
use deferred_scene::{Camera, DirectionalLight, Material};

/// Per-frame camera data (set 0, binding 0).
///
/// # Memory Layout
///
/// - Offset 0: view
/// - Offset 64: projection
/// - Offset 128: view-projection
/// - Offset 192: inverse view-projection, used to rebuild world positions
///   from depth
/// - Offset 256: camera position (w = 1)
/// - Total size: 272 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CameraUbo {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inverse_view_projection: Mat4,
    pub position: Vec4,
}

impl CameraUbo {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view: Mat4, projection: Mat4, position: Vec3) -> Self {
        let view_projection = projection * view;
        Self {
            view,
            projection,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            position: position.extend(1.0),
        }
    }

    pub fn from_camera(camera: &Camera) -> Self {
        Self::new(
            camera.view_matrix(),
            camera.projection_matrix(),
            camera.position,
        )
    }
}

/// Per-draw push constants for the depth and G-buffer passes.
///
/// Vertices are pulled from the storage buffer at `vertex_address`; the
/// material fields index the bindless texture array.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawPush {
    pub vertex_address: u64,
    pub albedo: u32,
    pub normal: u32,
    pub params: u32,
    pub _pad: u32,
}

impl DrawPush {
    pub fn new(vertex_address: u64, material: &Material) -> Self {
        Self {
            vertex_address,
            albedo: material.albedo,
            normal: material.normal,
            params: material.params,
            _pad: 0,
        }
    }
}

/// Lighting pass push constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct LightPush {
    /// Direction the light travels in (xyz), ambient factor (w)
    pub direction: Vec4,
    /// Color times intensity (xyz)
    pub radiance: Vec4,
}

impl LightPush {
    pub fn from_light(light: &DirectionalLight) -> Self {
        Self {
            direction: light.direction.extend(light.ambient),
            radiance: light.radiance().extend(0.0),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ToneMapPush {
    pub exposure: f32,
    pub operator: u32,
    pub _pad: [u32; 2],
}

impl ToneMapPush {
    pub fn new(exposure: f32, operator: ToneMapOperator) -> Self {
        Self {
            exposure,
            operator: operator.shader_index(),
            _pad: [0; 2],
        }
    }
}

/// Push constants for the sky and irradiance compute shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EnvironmentPush {
    /// Direction towards the sun
    pub sun_direction: [f32; 3],
    /// Face size of the cube being written
    pub face_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_ubo_size() {
        // 4 Mat4 (4 * 64) + Vec4 (16)
        assert_eq!(CameraUbo::SIZE, 272);
        assert_eq!(std::mem::align_of::<CameraUbo>(), 16);
    }

    #[test]
    fn test_push_sizes_fit_minimum_limit() {
        assert_eq!(std::mem::size_of::<DrawPush>(), 24);
        assert_eq!(std::mem::size_of::<LightPush>(), 32);
        assert_eq!(std::mem::size_of::<ToneMapPush>(), 16);
        assert_eq!(std::mem::size_of::<EnvironmentPush>(), 16);
        // Vulkan guarantees 128 bytes of push constants.
        assert!(std::mem::size_of::<LightPush>() <= 128);
    }

    #[test]
    fn test_inverse_view_projection_round_trips() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(45.0_f32.to_radians(), 16.0 / 9.0, 0.1, 500.0);
        let ubo = CameraUbo::new(view, projection, Vec3::new(0.0, 2.0, 5.0));

        let point = Vec3::new(0.5, 0.25, -1.0);
        let clip = ubo.view_projection * point.extend(1.0);
        let back = ubo.inverse_view_projection * clip;
        assert!((back.truncate() / back.w - point).length() < 1e-4);
        assert_eq!(ubo.position.w, 1.0);
    }

    #[test]
    fn test_draw_push_copies_material_indices() {
        let material = Material {
            albedo: 3,
            normal: 4,
            params: 5,
        };
        let push = DrawPush::new(0xdead_0000, &material);
        assert_eq!((push.albedo, push.normal, push.params), (3, 4, 5));
        assert_eq!(push.vertex_address, 0xdead_0000);
    }

    #[test]
    fn test_tone_map_push_operator_index() {
        let push = ToneMapPush::new(2.0, ToneMapOperator::Reinhard);
        assert_eq!(push.operator, 1);
        assert_eq!(bytemuck::bytes_of(&push).len(), 16);
    }
}
