//! Hemisphere sample kernel and 4x4 rotation noise tile.
//!
//! Generated once from a single RNG stream; the outputs are read-only for the lifetime
//! of the renderer. A fixed seed reproduces them exactly.

use bytemuck::{Pod, Zeroable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::foundation::math::{lerp, Vec3};

/// Number of kernel samples
pub const KERNEL_SIZE: usize = 64;

/// Edge length of the square noise tile
pub const NOISE_DIM: usize = 4;

/// One kernel sample as stored in the uniform buffer (std140 array element)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct KernelSample {
    /// Tangent-space offset, `w` unused
    pub offset: [f32; 4],
}

/// One noise texel (`R32G32B32A32_SFLOAT`)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct NoiseTexel {
    /// Rotation vector around the tangent-space normal; `z` and `w` are zero
    pub rotation: [f32; 4],
}

/// Distance scale applied to sample `index`: `lerp(0.1, 1.0, (index / 64)^2)`
#[allow(clippy::cast_precision_loss)]
pub fn kernel_scale(index: usize) -> f32 {
    let t = index as f32 / KERNEL_SIZE as f32;
    lerp(0.1, 1.0, t * t)
}

/// The generated kernel and noise tile
#[derive(Debug, Clone, PartialEq)]
pub struct OcclusionKernel {
    samples: [KernelSample; KERNEL_SIZE],
    noise: [NoiseTexel; NOISE_DIM * NOISE_DIM],
}

impl OcclusionKernel {
    /// Generate from `seed`, or from OS entropy when `None`
    pub fn new(seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::generate(&mut rng)
    }

    /// Generate from an existing RNG stream
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let mut samples = [KernelSample::zeroed(); KERNEL_SIZE];
        for (i, sample) in samples.iter_mut().enumerate() {
            let direction = loop {
                let candidate = Vec3::new(
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(0.0..=1.0),
                );
                // Normalizing a near-zero vector would blow up
                if candidate.norm_squared() > 1e-6 {
                    break candidate.normalize();
                }
            };
            let v = direction * rng.gen_range(0.0..=1.0) * kernel_scale(i);
            sample.offset = [v.x, v.y, v.z, 0.0];
        }

        let mut noise = [NoiseTexel::zeroed(); NOISE_DIM * NOISE_DIM];
        for texel in &mut noise {
            texel.rotation = [rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0), 0.0, 0.0];
        }

        log::debug!("[SSAO] Generated {} kernel samples and {}x{} noise", KERNEL_SIZE, NOISE_DIM, NOISE_DIM);
        Self { samples, noise }
    }

    /// The 64 hemisphere samples
    pub fn kernel(&self) -> &[KernelSample; KERNEL_SIZE] {
        &self.samples
    }

    /// The 4x4 noise tile, row-major
    pub fn noise_tile(&self) -> &[NoiseTexel; NOISE_DIM * NOISE_DIM] {
        &self.noise
    }

    /// Kernel bytes for the uniform buffer upload
    pub fn kernel_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Noise bytes for the texture upload
    pub fn noise_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.noise)
    }
}

/// Noise texture tiling factor: the 4x4 tile repeats once per 4x4 pixel block
#[allow(clippy::cast_precision_loss)]
pub fn noise_scale(width: u32, height: u32) -> [f32; 2] {
    [width as f32 / NOISE_DIM as f32, height as f32 / NOISE_DIM as f32]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_lie_in_unit_hemisphere() {
        let kernel = OcclusionKernel::new(Some(7));
        for sample in kernel.kernel() {
            let [x, y, z, w] = sample.offset;
            assert!(z >= 0.0, "sample below the surface: {z}");
            assert!((x * x + y * y + z * z).sqrt() <= 1.0 + 1e-6);
            assert_eq!(w, 0.0);
        }
    }

    #[test]
    fn test_scale_is_monotonic_in_index() {
        let scales: Vec<f32> = (0..KERNEL_SIZE).map(kernel_scale).collect();
        assert!((scales[0] - 0.1).abs() < 1e-6);
        assert!(scales.windows(2).all(|pair| pair[1] >= pair[0]));
        assert!(*scales.last().unwrap() <= 1.0);
    }

    #[test]
    fn test_sample_length_bounded_by_scale() {
        let kernel = OcclusionKernel::new(Some(99));
        for (i, sample) in kernel.kernel().iter().enumerate() {
            let [x, y, z, _] = sample.offset;
            assert!((x * x + y * y + z * z).sqrt() <= kernel_scale(i) + 1e-6);
        }
    }

    #[test]
    fn test_noise_rotates_about_normal_only() {
        let kernel = OcclusionKernel::new(Some(3));
        assert_eq!(kernel.noise_tile().len(), 16);
        for texel in kernel.noise_tile() {
            assert_eq!(texel.rotation[2], 0.0);
            assert!(texel.rotation[0].abs() <= 1.0 && texel.rotation[1].abs() <= 1.0);
        }
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        assert_eq!(OcclusionKernel::new(Some(42)), OcclusionKernel::new(Some(42)));
        assert_ne!(OcclusionKernel::new(Some(42)), OcclusionKernel::new(Some(43)));
    }

    #[test]
    fn test_upload_sizes() {
        let kernel = OcclusionKernel::new(Some(1));
        assert_eq!(kernel.kernel_bytes().len(), KERNEL_SIZE * 16);
        assert_eq!(kernel.noise_bytes().len(), NOISE_DIM * NOISE_DIM * 16);
    }

    #[test]
    fn test_noise_scale_tiles_per_block() {
        assert_eq!(noise_scale(1280, 720), [320.0, 180.0]);
    }
}
