//! Semaphores, fences and the per-slot signal bundle

use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::context::creation;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::frame::FrameFence;

pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(creation("create semaphore"))?
        };
        Ok(Self { device, semaphore })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None).map_err(creation("create fence"))? };
        Ok(Self { device, fence })
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl FrameFence for Fence {
    // Unbounded: a hung GPU is not recoverable here
    fn wait(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(VulkanError::Api)
        }
    }

    fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]).map_err(VulkanError::Api) }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// GPU-side signals owned by one frame slot
///
/// The slot's completion fence lives in the frame pacer.
pub struct SlotSignals {
    pub image_available: Semaphore,
    pub render_finished: Semaphore,
    pub compute_finished: Semaphore,
}

impl SlotSignals {
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            compute_finished: Semaphore::new(device.clone())?,
        })
    }
}
