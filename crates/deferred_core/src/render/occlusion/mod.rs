//! Screen-space ambient occlusion: sample kernel, rotation noise and a CPU reference
//! of the AO and blur passes.

pub mod kernel;
pub mod reference;

pub use kernel::{OcclusionKernel, KERNEL_SIZE, NOISE_DIM};
pub use reference::{GeometryImage, GeometryTexel, OcclusionImage, OcclusionParams};

/// Occlusion value meaning "nothing blocks ambient light"
pub const FULLY_LIT: f32 = 1.0;
