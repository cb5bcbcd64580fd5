//! Scene content drawn by the renderer
//!
//! A flat list of objects and one point light. Meshes and textures are uploaded
//! through the renderer, which hands back the handles stored here.

pub mod animation;
pub mod camera;
pub mod mesh;

pub use animation::{AnimationClock, CameraAnimation, CameraKeyframe};
pub use camera::Camera;
pub use mesh::{Mesh, Vertex};

use crate::foundation::math::{Mat4, Vec3, Vec4};

/// Index of a mesh uploaded through the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub usize);

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub mesh: MeshHandle,
    pub transform: Mat4,
    /// Bindless texture index; `None` draws untextured
    pub texture: Option<u32>,
}

impl SceneObject {
    pub fn new(mesh: MeshHandle, position: Vec3, scale: f32) -> Self {
        Self {
            mesh,
            transform: Mat4::new_translation(&position) * Mat4::new_scaling(scale),
            texture: None,
        }
    }

    pub fn with_texture(mut self, texture: u32) -> Self {
        self.texture = Some(texture);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl PointLight {
    /// Colour in xyz, intensity in w
    pub fn color_intensity(&self) -> Vec4 {
        Vec4::new(self.color.x, self.color.y, self.color.z, self.intensity)
    }
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 4.0, 2.0),
            color: Vec3::new(1.0, 1.0, 1.0),
            intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
    pub light: PointLight,
}

impl Scene {
    pub fn new(light: PointLight) -> Self {
        Self {
            objects: Vec::new(),
            light,
        }
    }

    pub fn add(&mut self, object: SceneObject) {
        self.objects.push(object);
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut [SceneObject] {
        &mut self.objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_transform_places_origin() {
        let object = SceneObject::new(MeshHandle(0), Vec3::new(1.0, 2.0, 3.0), 2.0);
        let origin = object.transform * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_eq!(origin, Vec4::new(1.0, 2.0, 3.0, 1.0));
        let corner = object.transform * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!(corner.x, 3.0);
    }

    #[test]
    fn test_light_packs_intensity_in_w() {
        let light = PointLight {
            intensity: 3.5,
            ..PointLight::default()
        };
        assert_eq!(light.color_intensity().w, 3.5);
    }
}
