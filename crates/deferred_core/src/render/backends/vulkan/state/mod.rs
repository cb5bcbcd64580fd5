//! Per-frame and per-surface state: sync objects, swapchain and attachments

pub mod attachments;
pub mod swapchain;
pub mod swapchain_manager;
pub mod sync;

pub use attachments::{attachment_inputs, pass_begin, OffscreenAttachments, PassBegin, VulkanAttachmentAllocator};
pub use swapchain::Swapchain;
pub use swapchain_manager::{AcquireResult, AcquiredImage, SurfaceStatus, SwapchainManager};
pub use sync::{Fence, Semaphore, SlotSignals};
