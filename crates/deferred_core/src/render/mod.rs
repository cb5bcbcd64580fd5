//! Rendering: device-independent frame logic plus the Vulkan backend
//!
//! `frame`, `attachments`, `occlusion`, `particles` and `surface` hold the parts that
//! can be exercised without a GPU. `backends::vulkan` turns them into API calls.

pub mod attachments;
pub mod backends;
pub mod frame;
pub mod occlusion;
pub mod particles;
pub mod push_constants;
pub mod surface;

pub use backends::vulkan::{DeferredRenderer, FrameInput, FrameOutcome, VulkanError, VulkanResult};
