//! Startup configuration and runtime toggles

pub mod config;
pub mod toggles;

pub use config::{
    OcclusionConfig, ParticleConfig, RendererConfig, ShaderConfig, ShaderStage, WindowConfig,
};
pub use toggles::{CameraMode, DebugView, RuntimeToggles, ToggleAction};
