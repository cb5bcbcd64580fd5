//! Resource descriptor table
//!
//! Every layout and set the passes bind lives here:
//!
//! - bindless set: binding 0 shared sampler, binding 1 partially bound sampled-image pool
//! - compute set per frame slot: binding 0 frame uniform, 1 previous particles, 2 current particles
//! - occlusion input: position, normal, noise, kernel
//! - blur input: raw occlusion
//! - lighting occlusion: blurred occlusion
//!
//! The three attachment-bound sets are rewritten after every attachment rebuild. The
//! bindless and compute sets are written once.

use ash::{vk, Device};

use crate::render::backends::vulkan::resources::descriptor_set::{
    merge_pool_sizes, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter,
};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::frame::FRAME_SLOT_COUNT;

/// Index allocator for the bindless image pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlots {
    capacity: u32,
    next: u32,
}

impl TextureSlots {
    pub fn new(capacity: u32) -> Self {
        Self { capacity, next: 0 }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn used(&self) -> u32 {
        self.next
    }

    /// Next free array element; indices are never reused
    pub fn allocate(&mut self) -> VulkanResult<u32> {
        if self.next >= self.capacity {
            return Err(VulkanError::InvalidOperation {
                reason: format!("bindless texture pool is full ({} slots)", self.capacity),
            });
        }
        let index = self.next;
        self.next += 1;
        Ok(index)
    }
}

/// Views and samplers read by the full-screen passes of one attachment generation
#[derive(Debug, Clone, Copy)]
pub struct AttachmentInputs {
    pub position: vk::ImageView,
    pub normal: vk::ImageView,
    pub raw_occlusion: vk::ImageView,
    pub blurred_occlusion: vk::ImageView,
    pub gbuffer_sampler: vk::Sampler,
    pub occlusion_sampler: vk::Sampler,
}

/// Long-lived inputs of the occlusion pass
#[derive(Debug, Clone, Copy)]
pub struct OcclusionInputs {
    pub noise_view: vk::ImageView,
    pub noise_sampler: vk::Sampler,
    pub kernel: vk::DescriptorBufferInfo,
}

/// Buffers bound by the compute set of one frame slot
#[derive(Debug, Clone, Copy)]
pub struct ComputeBindings {
    pub frame_uniform: vk::DescriptorBufferInfo,
    pub previous: vk::DescriptorBufferInfo,
    pub current: vk::DescriptorBufferInfo,
}

pub struct ResourceDescriptorTable {
    device: Device,
    bindless_set: vk::DescriptorSet,
    compute_sets: [vk::DescriptorSet; FRAME_SLOT_COUNT],
    occlusion_set: vk::DescriptorSet,
    blur_set: vk::DescriptorSet,
    lighting_set: vk::DescriptorSet,
    textures: TextureSlots,
    // Sets are freed with the pool, which goes before the layouts
    _pool: DescriptorPool,
    bindless_layout: DescriptorSetLayout,
    compute_layout: DescriptorSetLayout,
    occlusion_layout: DescriptorSetLayout,
    blur_layout: DescriptorSetLayout,
    lighting_layout: DescriptorSetLayout,
}

impl ResourceDescriptorTable {
    pub fn new(device: Device, texture_capacity: u32) -> VulkanResult<Self> {
        let fragment = vk::ShaderStageFlags::FRAGMENT;

        let bindless_layout = DescriptorSetLayoutBuilder::new()
            .add_sampler(0, fragment)
            .add_partially_bound_images(1, texture_capacity, fragment)
            .build(&device)?;
        let compute_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .add_storage_buffer(1, vk::ShaderStageFlags::COMPUTE)
            .add_storage_buffer(2, vk::ShaderStageFlags::COMPUTE)
            .build(&device)?;
        let occlusion_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, fragment)
            .add_combined_image_sampler(1, fragment)
            .add_combined_image_sampler(2, fragment)
            .add_uniform_buffer(3, fragment)
            .build(&device)?;
        let blur_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, fragment)
            .build(&device)?;
        let lighting_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, fragment)
            .build(&device)?;

        let slots = FRAME_SLOT_COUNT as u32;
        let pool_sizes = merge_pool_sizes(&[
            (bindless_layout.pool_sizes(), 1),
            (compute_layout.pool_sizes(), slots),
            (occlusion_layout.pool_sizes(), 1),
            (blur_layout.pool_sizes(), 1),
            (lighting_layout.pool_sizes(), 1),
        ]);
        let pool = DescriptorPool::new(device.clone(), 4 + slots, &pool_sizes)?;

        let mut layouts = vec![
            bindless_layout.handle(),
            occlusion_layout.handle(),
            blur_layout.handle(),
            lighting_layout.handle(),
        ];
        layouts.extend(std::iter::repeat(compute_layout.handle()).take(FRAME_SLOT_COUNT));
        let sets = pool.allocate(&layouts)?;

        let mut compute_sets = [vk::DescriptorSet::null(); FRAME_SLOT_COUNT];
        compute_sets.copy_from_slice(&sets[4..4 + FRAME_SLOT_COUNT]);

        log::debug!(
            "[DESCRIPTORS] Allocated {} sets, bindless capacity {}",
            sets.len(),
            texture_capacity
        );

        Ok(Self {
            device,
            bindless_set: sets[0],
            compute_sets,
            occlusion_set: sets[1],
            blur_set: sets[2],
            lighting_set: sets[3],
            textures: TextureSlots::new(texture_capacity),
            _pool: pool,
            bindless_layout,
            compute_layout,
            occlusion_layout,
            blur_layout,
            lighting_layout,
        })
    }

    /// Shared sampler used by every bindless texture
    pub fn write_shared_sampler(&self, sampler: vk::Sampler) {
        DescriptorSetWriter::new()
            .sampler(self.bindless_set, 0, sampler)
            .update(&self.device);
    }

    /// Places `view` in the bindless pool and returns the index draws push
    pub fn register_texture(&mut self, view: vk::ImageView) -> VulkanResult<u32> {
        let index = self.textures.allocate()?;
        DescriptorSetWriter::new()
            .sampled_image(self.bindless_set, 1, index, view)
            .update(&self.device);
        log::debug!("[DESCRIPTORS] Registered texture at bindless index {}", index);
        Ok(index)
    }

    pub fn write_compute(&self, slot: usize, bindings: &ComputeBindings) -> VulkanResult<()> {
        let set = self.compute_set(slot)?;
        DescriptorSetWriter::new()
            .buffer(set, 0, vk::DescriptorType::UNIFORM_BUFFER, bindings.frame_uniform)
            .buffer(set, 1, vk::DescriptorType::STORAGE_BUFFER, bindings.previous)
            .buffer(set, 2, vk::DescriptorType::STORAGE_BUFFER, bindings.current)
            .update(&self.device);
        Ok(())
    }

    /// Rewrites every set that references offscreen attachments
    pub fn write_attachment_inputs(&self, attachments: &AttachmentInputs, occlusion: &OcclusionInputs) {
        DescriptorSetWriter::new()
            .combined_image(self.occlusion_set, 0, attachments.position, attachments.gbuffer_sampler)
            .combined_image(self.occlusion_set, 1, attachments.normal, attachments.gbuffer_sampler)
            .combined_image(self.occlusion_set, 2, occlusion.noise_view, occlusion.noise_sampler)
            .buffer(self.occlusion_set, 3, vk::DescriptorType::UNIFORM_BUFFER, occlusion.kernel)
            .combined_image(self.blur_set, 0, attachments.raw_occlusion, attachments.occlusion_sampler)
            .combined_image(
                self.lighting_set,
                0,
                attachments.blurred_occlusion,
                attachments.occlusion_sampler,
            )
            .update(&self.device);
        log::debug!("[DESCRIPTORS] Attachment-bound sets rewritten");
    }

    pub fn bindless_set(&self) -> vk::DescriptorSet {
        self.bindless_set
    }

    pub fn compute_set(&self, slot: usize) -> VulkanResult<vk::DescriptorSet> {
        self.compute_sets
            .get(slot)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no compute set for frame slot {}", slot),
            })
    }

    pub fn occlusion_set(&self) -> vk::DescriptorSet {
        self.occlusion_set
    }

    pub fn blur_set(&self) -> vk::DescriptorSet {
        self.blur_set
    }

    pub fn lighting_set(&self) -> vk::DescriptorSet {
        self.lighting_set
    }

    pub fn bindless_layout(&self) -> vk::DescriptorSetLayout {
        self.bindless_layout.handle()
    }

    pub fn compute_layout(&self) -> vk::DescriptorSetLayout {
        self.compute_layout.handle()
    }

    pub fn occlusion_layout(&self) -> vk::DescriptorSetLayout {
        self.occlusion_layout.handle()
    }

    pub fn blur_layout(&self) -> vk::DescriptorSetLayout {
        self.blur_layout.handle()
    }

    pub fn lighting_layout(&self) -> vk::DescriptorSetLayout {
        self.lighting_layout.handle()
    }

    pub fn texture_slots(&self) -> &TextureSlots {
        &self.textures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_slots_are_sequential() {
        let mut slots = TextureSlots::new(3);
        assert_eq!(slots.allocate().ok(), Some(0));
        assert_eq!(slots.allocate().ok(), Some(1));
        assert_eq!(slots.used(), 2);
    }

    #[test]
    fn test_texture_slots_reject_overflow() {
        let mut slots = TextureSlots::new(1);
        assert!(slots.allocate().is_ok());
        assert!(matches!(
            slots.allocate(),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert_eq!(slots.used(), 1);
    }
}
