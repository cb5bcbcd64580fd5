//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules, with the
//! particle bridge and the deferred renderer on top.

/// Vulkan initialization types (context, window)
pub mod initialization;

/// Buffers, images, textures and descriptors
pub mod resources;

/// Shaders, pipelines, render passes and command recording
pub mod rendering;

/// Sync objects, swapchain and attachment state
pub mod state;

/// GPU side of the particle simulation
pub mod particles;

/// Deferred renderer orchestrating one frame end to end
pub mod renderer;

pub use renderer::{DeferredRenderer, FrameInput, FrameOutcome, FrameToken};

pub use initialization::context::{PhysicalDeviceInfo, QueueFamilies, VulkanContext, VulkanError, VulkanResult};
pub use initialization::window::{Key, KeyPress, Window, WindowError};

pub use resources::{Buffer, ResourceDescriptorTable, Texture, UniformBuffer};
pub use state::{SurfaceStatus, SwapchainManager};
