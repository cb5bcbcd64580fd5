//! # Camera
//!
//! Position + orientation camera producing a right-handed view matrix (looking down
//! -Z in view space) and a Vulkan-style projection: depth in `[0, 1]` and clip-space
//! Y pointing down.

use crate::foundation::math::{Mat4, Quat, Vec3};

/// Perspective projection for Vulkan clip space
///
/// View-space points with negative z are in front of the camera. Near maps to depth 0,
/// far to depth 1, and +Y in view space maps to the top of the screen.
pub fn vulkan_perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y * 0.5).tan();
    let mut m = Mat4::zeros();
    m[(0, 0)] = f / aspect;
    m[(1, 1)] = -f;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = near * far / (near - far);
    m[(3, 2)] = -1.0;
    m
}

/// 3D perspective camera
#[derive(Debug, Clone)]
pub struct Camera {
    /// World-space position
    pub position: Vec3,
    /// World-space orientation; identity looks down -Z with +Y up
    pub orientation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width / height
    pub aspect: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl Camera {
    /// Perspective camera at `position` with identity orientation
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            orientation: Quat::identity(),
            fov_y: fov_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Update the aspect ratio after a resize
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    /// World-to-view transform
    pub fn view_matrix(&self) -> Mat4 {
        let rotation = self.orientation.inverse().to_homogeneous();
        rotation * Mat4::new_translation(&-self.position)
    }

    /// View-to-clip transform
    pub fn projection_matrix(&self) -> Mat4 {
        vulkan_perspective(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Combined `projection * view`
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_near_and_far_map_to_unit_depth() {
        let p = vulkan_perspective(1.0, 1.0, 0.1, 100.0);
        let near = p * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = p * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_up_maps_to_top_of_screen() {
        let p = vulkan_perspective(1.0, 1.0, 0.1, 100.0);
        let clip = p * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_view_matrix_moves_camera_to_origin() {
        let camera = Camera::perspective(Vec3::new(1.0, 2.0, 3.0), 60.0, 1.5, 0.1, 50.0);
        let eye = camera.view_matrix() * Vec4::new(1.0, 2.0, 3.0, 1.0);
        assert_relative_eq!(eye.xyz().norm(), 0.0, epsilon = 1e-6);
    }
}
