//! Scene geometry handed to the renderer at load time.
//!
//! All primitives share one vertex array and one index array. Vertices are
//! already in world space and laid out for vertex pulling (`GpuVertex` is
//! read from a storage buffer in the shaders, so its layout is part of the
//! shader contract).

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};
use tracing::debug;

use crate::transform::Transform;

/// Vertex as read by the geometry shaders.
///
/// UVs are split across the padding slots to keep the struct at 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub uv_x: f32,
    pub normal: [f32; 3],
    pub uv_y: f32,
}

impl GpuVertex {
    pub fn new(position: Vec3, normal: Vec3, uv: [f32; 2]) -> Self {
        Self {
            position: position.to_array(),
            uv_x: uv[0],
            normal: normal.to_array(),
            uv_y: uv[1],
        }
    }
}

/// A draw range within the shared index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Primitive {
    pub first_index: u32,
    pub index_count: u32,
    pub material: u32,
}

/// Indices into the scene's texture list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Material {
    pub albedo: u32,
    pub normal: u32,
    /// Packed roughness (R) and metallic (G)
    pub params: u32,
}

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub srgb: bool,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn solid(name: &str, rgba: [u8; 4], srgb: bool) -> Self {
        Self {
            name: name.to_string(),
            width: 1,
            height: 1,
            srgb,
            pixels: rgba.to_vec(),
        }
    }

    /// Two-color checkerboard with square cells of `cell` pixels.
    pub fn checker(name: &str, size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let even = ((x / cell) + (y / cell)) % 2 == 0;
                pixels.extend_from_slice(if even { &a } else { &b });
            }
        }
        Self {
            name: name.to_string(),
            width: size,
            height: size,
            srgb: true,
            pixels,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self { min: first, max: first }, |aabb, p| Self {
            min: aabb.min.min(p),
            max: aabb.max.max(p),
        }))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Radius of the bounding sphere around [`Aabb::center`].
    pub fn radius(&self) -> f32 {
        (self.max - self.min).length() * 0.5
    }
}

/// Everything the renderer uploads for a scene.
#[derive(Clone, Debug)]
pub struct SceneGeometry {
    pub vertices: Vec<GpuVertex>,
    pub indices: Vec<u32>,
    pub primitives: Vec<Primitive>,
    pub materials: Vec<Material>,
    pub textures: Vec<TextureData>,
    pub bounds: Aabb,
}

/// Accumulates primitives into shared vertex and index arrays.
#[derive(Default)]
struct GeometryBuilder {
    vertices: Vec<GpuVertex>,
    indices: Vec<u32>,
    primitives: Vec<Primitive>,
}

impl GeometryBuilder {
    /// Adds a quad facing `normal`, spanning `half_extent` along each tangent.
    fn quad(&mut self, transform: &Transform, normal: Vec3, half_extent: f32, uv_scale: f32) {
        let v_axis = if normal.y.abs() > 0.5 {
            Vec3::new(0.0, 0.0, -normal.y.signum())
        } else {
            Vec3::Y
        };
        // u x v == normal keeps the winding counter-clockwise seen from outside.
        let u_axis = v_axis.cross(normal);
        let center = normal * half_extent;
        let corners = [
            (-1.0, -1.0, [0.0, uv_scale]),
            (1.0, -1.0, [uv_scale, uv_scale]),
            (1.0, 1.0, [uv_scale, 0.0]),
            (-1.0, 1.0, [0.0, 0.0]),
        ];

        let base = self.vertices.len() as u32;
        let world_normal = transform.transform_normal(normal);
        for (su, sv, uv) in corners {
            let local = center + (u_axis * su + v_axis * sv) * half_extent;
            self.vertices.push(GpuVertex::new(
                transform.transform_point(local),
                world_normal,
                uv,
            ));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn begin(&self) -> u32 {
        self.indices.len() as u32
    }

    fn finish(&mut self, first_index: u32, material: u32) {
        self.primitives.push(Primitive {
            first_index,
            index_count: self.indices.len() as u32 - first_index,
            material,
        });
    }

    fn cube(&mut self, transform: &Transform, material: u32) {
        let first = self.begin();
        for normal in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
            self.quad(transform, normal, 0.5, 1.0);
        }
        self.finish(first, material);
    }

    /// Ground plane at y = 0.
    fn ground(&mut self, size: f32, material: u32) {
        let first = self.begin();
        // Shift the quad down so its face sits at y = 0.
        let transform = Transform::new().with_position(Vec3::new(0.0, -size * 0.5, 0.0));
        self.quad(&transform, Vec3::Y, size * 0.5, size / 4.0);
        self.finish(first, material);
    }
}

impl SceneGeometry {
    /// Ground plane with a 4x4 grid of rotated cubes.
    pub fn demo() -> Self {
        let textures = vec![
            TextureData::checker("ground albedo", 64, 8, [200, 200, 200, 255], [90, 90, 96, 255]),
            TextureData::solid("flat normal", [128, 128, 255, 255], false),
            TextureData::solid("ground params", [230, 0, 0, 255], false),
            TextureData::solid("orange albedo", [230, 120, 40, 255], true),
            TextureData::solid("blue albedo", [50, 100, 220, 255], true),
            TextureData::solid("cube params", [90, 200, 0, 255], false),
        ];
        let materials = vec![
            Material {
                albedo: 0,
                normal: 1,
                params: 2,
            },
            Material {
                albedo: 3,
                normal: 1,
                params: 5,
            },
            Material {
                albedo: 4,
                normal: 1,
                params: 2,
            },
        ];

        let mut builder = GeometryBuilder::default();
        builder.ground(20.0, 0);

        const GRID: i32 = 4;
        const SPACING: f32 = 3.0;
        for row in 0..GRID {
            for col in 0..GRID {
                let x = (col as f32 - (GRID - 1) as f32 * 0.5) * SPACING;
                let z = (row as f32 - (GRID - 1) as f32 * 0.5) * SPACING;
                let scale = 0.8 + 0.15 * ((row + col) % 3) as f32;
                let transform = Transform::new()
                    .with_position(Vec3::new(x, scale * 0.5, z))
                    .with_rotation(Quat::from_rotation_y((row * GRID + col) as f32 * 0.35))
                    .with_scale(Vec3::splat(scale));
                builder.cube(&transform, 1 + ((row + col) % 2) as u32);
            }
        }

        let GeometryBuilder {
            vertices,
            indices,
            primitives,
        } = builder;
        let bounds = Aabb::from_points(vertices.iter().map(|v| Vec3::from_array(v.position)))
            .unwrap_or(Aabb {
                min: Vec3::ZERO,
                max: Vec3::ZERO,
            });

        debug!(
            "Demo scene: {} vertices, {} indices, {} primitives, {} textures",
            vertices.len(),
            indices.len(),
            primitives.len(),
            textures.len()
        );

        Self {
            vertices,
            indices,
            primitives,
            materials,
            textures,
            bounds,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_vertex_layout() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 32);
        assert_eq!(std::mem::offset_of!(GpuVertex, normal), 16);
    }

    #[test]
    fn test_demo_scene_is_consistent() {
        let scene = SceneGeometry::demo();
        assert_eq!(scene.primitives.len(), 17);
        assert_eq!(scene.indices.len() % 3, 0);

        let vertex_count = scene.vertices.len() as u32;
        assert!(scene.indices.iter().all(|&i| i < vertex_count));

        for primitive in &scene.primitives {
            assert!(primitive.first_index + primitive.index_count <= scene.indices.len() as u32);
            let material = scene.materials[primitive.material as usize];
            for texture in [material.albedo, material.normal, material.params] {
                assert!((texture as usize) < scene.textures.len());
            }
        }
    }

    #[test]
    fn test_texture_sizes_match_pixels() {
        for texture in SceneGeometry::demo().textures {
            assert_eq!(
                texture.pixels.len(),
                (texture.width * texture.height * 4) as usize,
                "{}",
                texture.name
            );
        }
    }

    #[test]
    fn test_quad_winding_matches_normal() {
        let scene = SceneGeometry::demo();
        for tri in scene.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| scene.vertices[i as usize]);
            let pa = Vec3::from_array(a.position);
            let pb = Vec3::from_array(b.position);
            let pc = Vec3::from_array(c.position);
            let face = (pb - pa).cross(pc - pa);
            assert!(face.dot(Vec3::from_array(a.normal)) > 0.0);
        }
    }

    #[test]
    fn test_ground_top_at_zero() {
        let scene = SceneGeometry::demo();
        assert!(scene.bounds.min.y.abs() < 1e-4);
        assert!(scene.bounds.max.y > 0.5);
        assert!(scene.bounds.radius() > 10.0);
    }

    #[test]
    fn test_aabb_from_empty() {
        assert!(Aabb::from_points(std::iter::empty()).is_none());
    }
}
