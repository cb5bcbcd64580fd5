//! CPU evaluation of the AO and blur passes.
//!
//! Mirrors `ssao.frag` and `ssao_blur.frag` texel for texel (nearest sampling, clamp
//! to edge, repeat for the noise tile) so frame plans can be checked without a GPU.

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::frame::{PassKind, PassPlan};
use crate::render::occlusion::kernel::{OcclusionKernel, NOISE_DIM};
use crate::render::occlusion::FULLY_LIT;

/// One G-buffer texel: view-space position and normal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryTexel {
    /// View-space position; `w == 0` marks background
    pub position: [f32; 4],
    /// View-space normal, `w` unused
    pub normal: [f32; 4],
}

impl GeometryTexel {
    /// Cleared (background) texel
    pub const BACKGROUND: Self = Self {
        position: [0.0; 4],
        normal: [0.0; 4],
    };

    /// Texel covered by geometry
    pub fn surface(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: [position.x, position.y, position.z, 1.0],
            normal: [normal.x, normal.y, normal.z, 0.0],
        }
    }

    fn is_background(&self) -> bool {
        self.position[3] == 0.0
    }
}

/// CPU-side copy of the position + normal attachments
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryImage {
    width: u32,
    height: u32,
    texels: Vec<GeometryTexel>,
}

impl GeometryImage {
    /// Image of the given size filled with background; both sides must be non-zero
    pub fn new(width: u32, height: u32) -> VulkanResult<Self> {
        require_area(width, height)?;
        Ok(Self {
            width,
            height,
            texels: vec![GeometryTexel::BACKGROUND; (width * height) as usize],
        })
    }

    /// Width in texels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Overwrite one texel
    pub fn set(&mut self, x: u32, y: u32, texel: GeometryTexel) {
        let index = self.index(x, y);
        self.texels[index] = texel;
    }

    /// Texel at `(x, y)`
    pub fn get(&self, x: u32, y: u32) -> GeometryTexel {
        self.texels[self.index(x, y)]
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn sample(&self, u: f32, v: f32) -> GeometryTexel {
        let x = ((u * self.width as f32).floor().max(0.0) as u32).min(self.width - 1);
        let y = ((v * self.height as f32).floor().max(0.0) as u32).min(self.height - 1);
        self.get(x, y)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }
}

/// Single-channel occlusion attachment contents
#[derive(Debug, Clone, PartialEq)]
pub struct OcclusionImage {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl OcclusionImage {
    /// Image where every texel equals `value`, the effect of a clear-only pass
    pub fn filled(width: u32, height: u32, value: f32) -> VulkanResult<Self> {
        require_area(width, height)?;
        Ok(Self::fill(width, height, value))
    }

    // Sizes come from an existing image, so they are already non-zero
    fn fill(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            values: vec![value; (width * height) as usize],
        }
    }

    /// Value at `(x, y)`
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    /// All values, row-major
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Values as stored in an `R8_UNORM` attachment
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_unorm8(&self) -> Vec<u8> {
        self.values
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn clamped(&self, x: i64, y: i64) -> f32 {
        let x = x.clamp(0, i64::from(self.width) - 1);
        let y = y.clamp(0, i64::from(self.height) - 1);
        self.get(x as u32, y as u32)
    }
}

fn require_area(width: u32, height: u32) -> VulkanResult<()> {
    if width == 0 || height == 0 {
        return Err(VulkanError::InvalidOperation {
            reason: format!("reference image needs a non-zero size, got {}x{}", width, height),
        });
    }
    Ok(())
}

/// Per-draw AO constants, the CPU twin of the occlusion push block
#[derive(Debug, Clone, Copy)]
pub struct OcclusionParams {
    /// Projection used to map view-space samples to screen
    pub projection: Mat4,
    /// Sample radius
    pub radius: f32,
    /// Depth bias
    pub bias: f32,
    /// Samples evaluated per texel
    pub kernel_size: usize,
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Tangent frame whose z axis is `normal`, rotated by the noise vector
fn tangent_frame(normal: Vec3, noise: Vec3) -> (Vec3, Vec3) {
    let projected = noise - normal * noise.dot(&normal);
    let tangent = if projected.norm_squared() > 1e-8 {
        projected.normalize()
    } else {
        // Noise parallel to the normal (or zero); any perpendicular will do
        let helper = if normal.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
        (helper - normal * helper.dot(&normal)).normalize()
    };
    (tangent, normal.cross(&tangent))
}

/// Evaluate the AO pass over `geometry`
#[allow(clippy::cast_precision_loss)]
pub fn evaluate_occlusion(
    geometry: &GeometryImage,
    kernel: &OcclusionKernel,
    params: &OcclusionParams,
) -> OcclusionImage {
    let (width, height) = (geometry.width(), geometry.height());
    let kernel_size = params.kernel_size.min(kernel.kernel().len()).max(1);
    let mut out = OcclusionImage::fill(width, height, FULLY_LIT);

    for y in 0..height {
        for x in 0..width {
            let texel = geometry.get(x, y);
            if texel.is_background() {
                continue;
            }
            let frag_pos = Vec3::new(texel.position[0], texel.position[1], texel.position[2]);
            let normal = Vec3::new(texel.normal[0], texel.normal[1], texel.normal[2]);
            if normal.norm_squared() < 1e-8 {
                continue;
            }
            let normal = normal.normalize();
            let noise = kernel.noise_tile()[(y as usize % NOISE_DIM) * NOISE_DIM + x as usize % NOISE_DIM];
            let (tangent, bitangent) =
                tangent_frame(normal, Vec3::new(noise.rotation[0], noise.rotation[1], 0.0));

            let mut occlusion = 0.0;
            for sample in &kernel.kernel()[..kernel_size] {
                let [sx, sy, sz, _] = sample.offset;
                let sample_pos = frag_pos + (tangent * sx + bitangent * sy + normal * sz) * params.radius;

                let clip = params.projection * Vec4::new(sample_pos.x, sample_pos.y, sample_pos.z, 1.0);
                if clip.w.abs() < 1e-8 {
                    continue;
                }
                let u = (clip.x / clip.w).mul_add(0.5, 0.5);
                let v = (clip.y / clip.w).mul_add(0.5, 0.5);

                let occluder = geometry.sample(u, v);
                if occluder.is_background() {
                    continue;
                }
                let sample_depth = occluder.position[2];
                let distance = (frag_pos.z - sample_depth).abs();
                let range_check = if distance < 1e-6 {
                    1.0
                } else {
                    smoothstep(0.0, 1.0, params.radius / distance)
                };
                if sample_depth >= sample_pos.z + params.bias {
                    occlusion += range_check;
                }
            }
            out.values[(y * width + x) as usize] = 1.0 - occlusion / kernel_size as f32;
        }
    }
    out
}

/// 4x4 box blur matching the blur pass (offsets -2..=1, clamp to edge)
pub fn blur(raw: &OcclusionImage) -> OcclusionImage {
    let mut out = OcclusionImage::fill(raw.width, raw.height, FULLY_LIT);
    for y in 0..raw.height {
        for x in 0..raw.width {
            let mut sum = 0.0;
            for dy in -2..2 {
                for dx in -2..2 {
                    sum += raw.clamped(i64::from(x) + dx, i64::from(y) + dy);
                }
            }
            out.values[(y * raw.width + x) as usize] = sum / 16.0;
        }
    }
    out
}

/// Run the occlusion-producing passes of `plan` and return the blurred-AO attachment
/// the lighting pass would read.
pub fn run_plan(
    plan: &PassPlan,
    geometry: &GeometryImage,
    kernel: &OcclusionKernel,
    params: &OcclusionParams,
) -> OcclusionImage {
    let (width, height) = (geometry.width(), geometry.height());
    let mut raw = OcclusionImage::fill(width, height, FULLY_LIT);
    let mut blurred = OcclusionImage::fill(width, height, FULLY_LIT);

    for step in plan.steps() {
        match step.kind {
            PassKind::Geometry | PassKind::Lighting => {}
            PassKind::Occlusion => raw = evaluate_occlusion(geometry, kernel, params),
            PassKind::Blur => {
                blurred = if step.draws {
                    blur(&raw)
                } else {
                    OcclusionImage::fill(width, height, step.kind.clear_value())
                };
            }
        }
    }
    blurred
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::vulkan_perspective;

    /// Floor plane with a box standing on it, seen from slightly above
    fn crease_scene(width: u32, height: u32) -> GeometryImage {
        let mut image = GeometryImage::new(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                let fx = x as f32 / width as f32 - 0.5;
                let fy = y as f32 / height as f32;
                let texel = if fx < 0.0 {
                    // Floor receding away from the camera
                    GeometryTexel::surface(Vec3::new(fx * 4.0, -1.0, -3.0 - fy * 2.0), Vec3::y())
                } else {
                    // Wall facing the camera
                    GeometryTexel::surface(Vec3::new(fx * 4.0, fy - 1.0, -3.0), Vec3::z())
                };
                image.set(x, y, texel);
            }
        }
        image
    }

    fn params(width: u32, height: u32) -> OcclusionParams {
        OcclusionParams {
            projection: vulkan_perspective(50f32.to_radians(), width as f32 / height as f32, 0.1, 100.0),
            radius: 0.5,
            bias: 0.025,
            kernel_size: 64,
        }
    }

    #[test]
    fn test_occlusion_stays_in_unit_range() {
        let geometry = crease_scene(32, 24);
        let kernel = OcclusionKernel::new(Some(11));
        let raw = evaluate_occlusion(&geometry, &kernel, &params(32, 24));
        assert!(raw.values().iter().all(|v| (0.0..=1.0).contains(v)));
        let blurred = blur(&raw);
        assert!(blurred.values().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_background_is_fully_lit() {
        let geometry = GeometryImage::new(8, 8).unwrap();
        let kernel = OcclusionKernel::new(Some(5));
        let raw = evaluate_occlusion(&geometry, &kernel, &params(8, 8));
        assert!(raw.values().iter().all(|&v| v == FULLY_LIT));
    }

    #[test]
    fn test_pass_sequence_is_idempotent_for_fixed_seed() {
        let geometry = crease_scene(40, 30);
        let plan = PassPlan::for_frame(true);

        let first = run_plan(&plan, &geometry, &OcclusionKernel::new(Some(1234)), &params(40, 30));
        let second = run_plan(&plan, &geometry, &OcclusionKernel::new(Some(1234)), &params(40, 30));

        assert_eq!(first, second);
        assert_eq!(first.to_unorm8(), second.to_unorm8());
    }

    #[test]
    fn test_disabled_occlusion_leaves_blur_target_fully_lit() {
        let geometry = crease_scene(24, 16);
        let plan = PassPlan::for_frame(false);

        let with_one_kernel = run_plan(&plan, &geometry, &OcclusionKernel::new(Some(1)), &params(24, 16));
        let with_other_kernel = run_plan(&plan, &geometry, &OcclusionKernel::new(Some(2)), &params(24, 16));

        assert!(with_one_kernel.values().iter().all(|&v| v == FULLY_LIT));
        assert_eq!(with_one_kernel, with_other_kernel);
        assert!(with_one_kernel.to_unorm8().iter().all(|&b| b == 255));
    }

    #[test]
    fn test_blur_of_constant_is_constant() {
        let raw = OcclusionImage::filled(9, 7, 0.25).unwrap();
        let blurred = blur(&raw);
        assert!(blurred.values().iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_tangent_frame_is_orthonormal_even_for_degenerate_noise() {
        let normal = Vec3::z();
        for noise in [Vec3::zeros(), Vec3::new(0.3, -0.7, 0.0)] {
            let (t, b) = tangent_frame(normal, noise);
            assert!(t.dot(&normal).abs() < 1e-5);
            assert!(b.dot(&normal).abs() < 1e-5);
            assert!((t.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_sized_images_are_rejected() {
        for (width, height) in [(0, 4), (4, 0), (0, 0)] {
            assert!(matches!(
                GeometryImage::new(width, height),
                Err(VulkanError::InvalidOperation { .. })
            ));
            assert!(OcclusionImage::filled(width, height, FULLY_LIT).is_err());
        }

        // Smallest valid image still samples and blurs without leaving its bounds
        let single = GeometryImage::new(1, 1).unwrap();
        assert_eq!(single.sample(2.0, -1.0), GeometryTexel::BACKGROUND);
        let blurred = blur(&OcclusionImage::filled(1, 1, 0.5).unwrap());
        assert_eq!(blurred.values(), &[0.5]);
    }
}
