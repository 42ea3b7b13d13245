//! Scene inputs for the deferred renderer.
//!
//! - Perspective camera and orbit controller
//! - Directional light
//! - Procedural demo geometry laid out for vertex pulling

pub mod camera;
pub mod geometry;
pub mod light;
pub mod transform;

pub use camera::{Camera, OrbitController};
pub use geometry::{Aabb, GpuVertex, Material, Primitive, SceneGeometry, TextureData};
pub use light::DirectionalLight;
pub use transform::Transform;
