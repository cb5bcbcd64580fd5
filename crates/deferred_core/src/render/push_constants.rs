//! Per-draw constant blocks shared with the shaders
//!
//! Layouts are byte-exact; the GLSL `push_constant` blocks declare the same fields in
//! the same order.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_cols_array, Mat4, Vec2, Vec3, Vec4};
use crate::render::occlusion::OcclusionParams;

/// G-buffer draw: view-space position and normal
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GeometryPush {
    pub model_view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
}

impl GeometryPush {
    pub fn new(view: &Mat4, model: &Mat4, projection: &Mat4) -> Self {
        let model_view = view * model;
        Self {
            model_view: to_cols_array(&model_view),
            projection: to_cols_array(projection),
            normal: to_cols_array(&normal_matrix(&model_view)),
        }
    }
}

/// Occlusion pass tunables
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct OcclusionPush {
    pub projection: [[f32; 4]; 4],
    pub noise_scale: [f32; 2],
    pub radius: f32,
    pub bias: f32,
    pub kernel_size: i32,
}

impl OcclusionPush {
    pub fn new(params: &OcclusionParams, noise_scale: [f32; 2]) -> Self {
        Self {
            projection: to_cols_array(&params.projection),
            noise_scale,
            radius: params.radius,
            bias: params.bias,
            kernel_size: params.kernel_size as i32,
        }
    }
}

/// Lighting draw for one scene object
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingPush {
    pub transform: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    pub light_position: [f32; 4],
    /// rgb colour, w intensity
    pub light_color: [f32; 4],
    pub screen_size: [f32; 2],
    /// Index into the bindless texture array, `-1` when untextured
    pub texture_index: i32,
    /// 0 lit, 1 occlusion only, 2 normals, 3 depth
    pub debug_mode: i32,
}

/// Inputs for a [`LightingPush`]
#[derive(Debug, Clone, Copy)]
pub struct LightingDraw<'a> {
    pub view_projection: &'a Mat4,
    pub model: &'a Mat4,
    pub light_position: Vec3,
    pub light_color: Vec4,
    pub screen_size: Vec2,
    pub texture_index: Option<u32>,
    pub debug_mode: i32,
}

impl LightingPush {
    pub fn new(draw: &LightingDraw<'_>) -> Self {
        let transform = draw.view_projection * draw.model;
        Self {
            transform: to_cols_array(&transform),
            model: to_cols_array(draw.model),
            normal: to_cols_array(&normal_matrix(draw.model)),
            light_position: [draw.light_position.x, draw.light_position.y, draw.light_position.z, 1.0],
            light_color: draw.light_color.into(),
            screen_size: draw.screen_size.into(),
            texture_index: draw.texture_index.map_or(-1, |index| index as i32),
            debug_mode: draw.debug_mode,
        }
    }
}

/// Particle draw: world to clip transform
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ParticlePush {
    pub transform: [[f32; 4]; 4],
}

impl ParticlePush {
    pub fn new(view_projection: &Mat4) -> Self {
        Self {
            transform: to_cols_array(view_projection),
        }
    }
}

/// Inverse-transpose of the upper 3x3, embedded in a 4x4
///
/// Falls back to the matrix itself when it is not invertible.
pub fn normal_matrix(model: &Mat4) -> Mat4 {
    let upper = model.fixed_view::<3, 3>(0, 0).into_owned();
    let normal = upper.try_inverse().map_or(upper, |inverse| inverse.transpose());
    normal.to_homogeneous()
}

/// Size of a push block as declared in a pipeline layout range
pub fn push_size<T: Pod>() -> u32 {
    std::mem::size_of::<T>() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_block_sizes_match_shaders() {
        assert_eq!(push_size::<GeometryPush>(), 192);
        assert_eq!(push_size::<OcclusionPush>(), 84);
        assert_eq!(push_size::<LightingPush>(), 240);
        assert_eq!(push_size::<ParticlePush>(), 64);
    }

    #[test]
    fn test_lighting_field_offsets() {
        assert_eq!(std::mem::offset_of!(LightingPush, light_position), 192);
        assert_eq!(std::mem::offset_of!(LightingPush, screen_size), 224);
        assert_eq!(std::mem::offset_of!(LightingPush, texture_index), 232);
        assert_eq!(std::mem::offset_of!(LightingPush, debug_mode), 236);
    }

    #[test]
    fn test_untextured_index_is_negative() {
        let identity = Mat4::identity();
        let draw = LightingDraw {
            view_projection: &identity,
            model: &identity,
            light_position: Vec3::new(1.0, 2.0, 3.0),
            light_color: Vec4::new(1.0, 1.0, 1.0, 2.0),
            screen_size: Vec2::new(1280.0, 720.0),
            texture_index: None,
            debug_mode: 1,
        };
        let push = LightingPush::new(&draw);
        assert_eq!(push.texture_index, -1);
        assert_eq!(push.light_position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(push.screen_size, [1280.0, 720.0]);
        assert_eq!(LightingPush::new(&LightingDraw { texture_index: Some(4), ..draw }).texture_index, 4);
    }

    #[test]
    fn test_normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 1.0, 1.0));
        let normal = normal_matrix(&model);
        assert_relative_eq!(normal[(0, 0)], 0.5, epsilon = 1e-6);
        assert_relative_eq!(normal[(3, 3)], 1.0);
    }

    #[test]
    fn test_occlusion_push_from_params() {
        let params = OcclusionParams {
            projection: Mat4::identity(),
            radius: 0.5,
            bias: 0.025,
            kernel_size: 64,
        };
        let push = OcclusionPush::new(&params, [320.0, 180.0]);
        assert_eq!(push.kernel_size, 64);
        assert_eq!(push.noise_scale, [320.0, 180.0]);
    }
}
