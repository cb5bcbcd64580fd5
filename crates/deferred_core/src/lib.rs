//! # Deferred Core
//!
//! Multi-pass deferred renderer on Vulkan: a G-buffer pass, screen-space ambient
//! occlusion with a blur, a lighting pass that composites onto the swapchain, and a
//! compute particle simulation whose output the lighting pass draws.
//!
//! ## Layout
//!
//! - `core` / `config`: startup configuration and runtime toggles
//! - `events`: surface change channel from the window to the renderer
//! - `render::frame`: frame slots, pass ordering and cross-queue dependencies
//! - `render::attachments`: offscreen attachment sets rebuilt on resize
//! - `render::occlusion`: AO kernel and noise plus a CPU reference of the AO passes
//! - `render::backends::vulkan`: the device-facing renderer
//! - `scene`: meshes, objects, light and camera animation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deferred_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RendererConfig::load("resources/config/viewer.ron")?;
//!     let (sender, receiver) = surface_channel();
//!     let mut window = Window::new(&config.window, sender)?;
//!     let mut renderer = DeferredRenderer::new(&mut window, &config, receiver)?;
//!
//!     let cube = renderer.upload_mesh(&Mesh::cube(1.0))?;
//!     let mut scene = Scene::new(PointLight::default());
//!     scene.add(SceneObject::new(cube, Vec3::zeros(), 1.0));
//!
//!     let camera = Camera::perspective(Vec3::new(0.0, 0.0, 4.0), 60.0, 16.0 / 9.0, 0.1, 100.0);
//!     let toggles = RuntimeToggles::new(true, DebugView::Lit, CameraMode::Manual);
//!     while !window.should_close() {
//!         window.pump_events();
//!         renderer.render(&FrameInput { scene: &scene, camera: &camera, toggles: &toggles, delta_time: 0.016 })?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod events;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for applications built on the renderer
pub mod prelude {
    pub use crate::config::{Config, ConfigError};
    pub use crate::core::{CameraMode, DebugView, RendererConfig, RuntimeToggles, ToggleAction};
    pub use crate::events::surface_channel;
    pub use crate::foundation::math::{Mat4, Quat, Vec3};
    pub use crate::foundation::time::Timer;
    pub use crate::render::backends::vulkan::{
        DeferredRenderer, FrameInput, FrameOutcome, Key, KeyPress, VulkanError, Window,
    };
    pub use crate::scene::{AnimationClock, Camera, CameraAnimation, Mesh, PointLight, Scene, SceneObject};
}
