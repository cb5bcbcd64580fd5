//! # Renderer Configuration
//!
//! One immutable [`RendererConfig`] is built at startup (defaults, or a `.ron`/`.toml`
//! file through [`Config`]) and handed by reference to every component that needs it.
//! Nothing in the renderer mutates it afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use crate::config::{Config, ConfigError};
use crate::core::toggles::{CameraMode, DebugView};
use crate::render::occlusion::kernel::KERNEL_SIZE;
use crate::render::particles::PARTICLE_WORKGROUP_SIZE;

/// Every shader stage the pipeline set loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// G-buffer vertex stage
    GeometryVertex,
    /// G-buffer fragment stage
    GeometryFragment,
    /// Shared full-screen triangle vertex stage
    FullscreenVertex,
    /// Ambient occlusion fragment stage
    OcclusionFragment,
    /// Occlusion blur fragment stage
    BlurFragment,
    /// Lighting vertex stage
    LightingVertex,
    /// Lighting fragment stage
    LightingFragment,
    /// Particle draw vertex stage
    ParticleVertex,
    /// Particle draw fragment stage
    ParticleFragment,
    /// Particle update compute stage
    ParticleCompute,
}

impl ShaderStage {
    /// All stages, in pipeline creation order
    pub const ALL: [Self; 10] = [
        Self::GeometryVertex,
        Self::GeometryFragment,
        Self::FullscreenVertex,
        Self::OcclusionFragment,
        Self::BlurFragment,
        Self::LightingVertex,
        Self::LightingFragment,
        Self::ParticleVertex,
        Self::ParticleFragment,
        Self::ParticleCompute,
    ];
}

/// # Shader Configuration
///
/// SPIR-V file names per stage plus the directory they live in. `build.rs` writes
/// compiled shaders to `target/shaders/`, which is the default directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Directory holding the compiled `.spv` files
    pub directory: PathBuf,
    /// G-buffer vertex shader
    pub geometry_vertex: String,
    /// G-buffer fragment shader
    pub geometry_fragment: String,
    /// Full-screen triangle vertex shader shared by the AO and blur passes
    pub fullscreen_vertex: String,
    /// AO fragment shader
    pub occlusion_fragment: String,
    /// Blur fragment shader
    pub blur_fragment: String,
    /// Lighting vertex shader
    pub lighting_vertex: String,
    /// Lighting fragment shader
    pub lighting_fragment: String,
    /// Particle vertex shader
    pub particle_vertex: String,
    /// Particle fragment shader
    pub particle_fragment: String,
    /// Particle compute shader
    pub particle_compute: String,
}

impl ShaderConfig {
    /// File name configured for `stage`
    pub fn file_name(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::GeometryVertex => &self.geometry_vertex,
            ShaderStage::GeometryFragment => &self.geometry_fragment,
            ShaderStage::FullscreenVertex => &self.fullscreen_vertex,
            ShaderStage::OcclusionFragment => &self.occlusion_fragment,
            ShaderStage::BlurFragment => &self.blur_fragment,
            ShaderStage::LightingVertex => &self.lighting_vertex,
            ShaderStage::LightingFragment => &self.lighting_fragment,
            ShaderStage::ParticleVertex => &self.particle_vertex,
            ShaderStage::ParticleFragment => &self.particle_fragment,
            ShaderStage::ParticleCompute => &self.particle_compute,
        }
    }

    /// Full path of the SPIR-V file for `stage`
    pub fn path(&self, stage: ShaderStage) -> PathBuf {
        self.directory.join(self.file_name(stage))
    }

    /// Replace the directory with the first candidate that actually holds the
    /// geometry vertex shader.
    ///
    /// Useful when the binary runs from the workspace root or from inside a member crate.
    pub fn with_directory_resolution(mut self) -> Self {
        let candidates = [
            self.directory.clone(),
            PathBuf::from("target/shaders"),
            PathBuf::from("../target/shaders"),
            PathBuf::from("../../target/shaders"),
            PathBuf::from("shaders"),
        ];
        if let Some(found) = candidates
            .into_iter()
            .find(|dir| dir.join(&self.geometry_vertex).exists())
        {
            self.directory = found;
        }
        self
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("target/shaders"),
            geometry_vertex: "gbuffer_vert.spv".to_string(),
            geometry_fragment: "gbuffer_frag.spv".to_string(),
            fullscreen_vertex: "fullscreen_vert.spv".to_string(),
            occlusion_fragment: "ssao_frag.spv".to_string(),
            blur_fragment: "ssao_blur_frag.spv".to_string(),
            lighting_vertex: "lighting_vert.spv".to_string(),
            lighting_fragment: "lighting_frag.spv".to_string(),
            particle_vertex: "particle_vert.spv".to_string(),
            particle_fragment: "particle_frag.spv".to_string(),
            particle_compute: "particle_comp.spv".to_string(),
        }
    }
}

/// Initial window parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "SSAO Viewer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Screen-space ambient occlusion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionConfig {
    /// Whether AO starts enabled
    pub enabled: bool,
    /// Sample hemisphere radius in view-space units
    pub radius: f32,
    /// Depth bias against self-occlusion acne
    pub bias: f32,
    /// Number of kernel samples the shader evaluates (at most the generated 64)
    pub kernel_size: u32,
    /// Fixed RNG seed for kernel and noise; `None` draws from OS entropy
    pub seed: Option<u64>,
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: 0.5,
            bias: 0.025,
            kernel_size: KERNEL_SIZE as u32,
            seed: None,
        }
    }
}

/// Compute particle parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    /// Number of simulated particles
    pub count: u32,
    /// Local workgroup size of the compute shader, must match `local_size_x`
    pub workgroup_size: u32,
    /// World-space emitter origin
    pub emitter_origin: [f32; 3],
    /// Fixed RNG seed for initial particle state
    pub seed: Option<u64>,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            count: 8192,
            workgroup_size: PARTICLE_WORKGROUP_SIZE,
            emitter_origin: [0.0, -1.5, 0.0],
            seed: None,
        }
    }
}

/// # Renderer Configuration
///
/// Immutable startup configuration for the deferred renderer and its window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Window parameters
    pub window: WindowConfig,
    /// Shader locations
    pub shaders: ShaderConfig,
    /// AO parameters
    pub occlusion: OcclusionConfig,
    /// Particle parameters
    pub particles: ParticleConfig,
    /// Capacity of the bindless sampled-image array
    pub texture_capacity: u32,
    /// Debug view the lighting pass starts in
    pub debug_view: DebugView,
    /// Camera mode the viewer starts in
    pub camera_mode: CameraMode,
}

impl Config for RendererConfig {}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "SSAO Viewer".to_string(),
            enable_validation: None,
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            shaders: ShaderConfig::default(),
            occlusion: OcclusionConfig::default(),
            particles: ParticleConfig::default(),
            texture_capacity: 256,
            debug_view: DebugView::Lit,
            camera_mode: CameraMode::Animated,
        }
    }
}

impl RendererConfig {
    /// Load from `path` (or defaults when it does not exist) and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::load_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Reject configurations the renderer cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::Invalid(reason.to_string()));

        if self.application_name.is_empty() {
            return invalid("application name cannot be empty");
        }
        if self.window.width == 0 || self.window.height == 0 {
            return invalid("window size must be non-zero");
        }
        if self.occlusion.kernel_size == 0 || self.occlusion.kernel_size as usize > KERNEL_SIZE {
            return Err(ConfigError::Invalid(format!(
                "occlusion kernel size must be in 1..={KERNEL_SIZE}, got {}",
                self.occlusion.kernel_size
            )));
        }
        if self.occlusion.radius <= 0.0 {
            return invalid("occlusion radius must be positive");
        }
        if self.occlusion.bias < 0.0 {
            return invalid("occlusion bias must not be negative");
        }
        if self.particles.count == 0 {
            return invalid("particle count must be non-zero");
        }
        if self.particles.workgroup_size != PARTICLE_WORKGROUP_SIZE {
            return Err(ConfigError::Invalid(format!(
                "particle workgroup size must match the compute shader ({PARTICLE_WORKGROUP_SIZE}), got {}",
                self.particles.workgroup_size
            )));
        }
        if self.texture_capacity == 0 {
            return invalid("texture capacity must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.occlusion.kernel_size, 64);
        assert_eq!(config.texture_capacity, 256);
    }

    #[test]
    fn test_rejects_oversized_kernel() {
        let mut config = RendererConfig::default();
        config.occlusion.kernel_size = 65;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_workgroup_other_than_shader_local_size() {
        for size in [0, 64, 512] {
            let mut config = RendererConfig::default();
            config.particles.workgroup_size = size;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "size {size}");
        }

        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        let groups = crate::render::particles::dispatch_group_count(config.particles.count, PARTICLE_WORKGROUP_SIZE);
        assert!(groups * PARTICLE_WORKGROUP_SIZE >= config.particles.count);
    }

    #[test]
    fn test_shader_paths_join_directory() {
        let shaders = ShaderConfig {
            directory: PathBuf::from("out"),
            ..ShaderConfig::default()
        };
        assert_eq!(
            shaders.path(ShaderStage::OcclusionFragment),
            PathBuf::from("out").join("ssao_frag.spv")
        );
        for stage in ShaderStage::ALL {
            assert!(shaders.file_name(stage).ends_with(".spv"));
        }
    }

    #[test]
    fn test_ron_round_trip_keeps_partial_files_valid() {
        let parsed: RendererConfig = ron::from_str("(occlusion: (enabled: false))").unwrap();
        assert!(!parsed.occlusion.enabled);
        assert_eq!(parsed.occlusion.radius, 0.5);
        assert_eq!(parsed.particles.workgroup_size, 256);
    }
}
