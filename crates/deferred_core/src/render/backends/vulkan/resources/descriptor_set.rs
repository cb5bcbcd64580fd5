//! Descriptor set layouts, pools and writes
//!
//! Thin RAII wrappers over layouts and pools plus a writer that keeps its image and
//! buffer infos alive until the update is issued.

use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::context::creation;
use crate::render::backends::vulkan::VulkanResult;

/// Builder for a descriptor set layout
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
    flags: Vec<vk::DescriptorBindingFlags>,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
        flags: vk::DescriptorBindingFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        self.flags.push(flags);
        self
    }

    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags, vk::DescriptorBindingFlags::empty())
    }

    pub fn add_storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags, vk::DescriptorBindingFlags::empty())
    }

    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
            vk::DescriptorBindingFlags::empty(),
        )
    }

    pub fn add_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::SAMPLER, 1, stage_flags, vk::DescriptorBindingFlags::empty())
    }

    /// Sampled-image array whose unwritten elements may stay unbound
    pub fn add_partially_bound_images(self, binding: u32, capacity: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(
            binding,
            vk::DescriptorType::SAMPLED_IMAGE,
            capacity,
            stage_flags,
            vk::DescriptorBindingFlags::PARTIALLY_BOUND,
        )
    }

    /// Pool sizes needed for `sets` allocations of this layout
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            let count = binding.descriptor_count * sets;
            match sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: count,
                }),
            }
        }
        sizes
    }

    pub fn build(&self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let mut binding_flags = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&self.flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&self.bindings)
            .push_next(&mut binding_flags);

        let layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(creation("create descriptor set layout"))?
        };

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            pool_sizes: self.pool_sizes(1),
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl DescriptorSetLayout {
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Descriptor counts consumed by one set of this layout
    pub fn pool_sizes(&self) -> &[vk::DescriptorPoolSize] {
        &self.pool_sizes
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Sums the pool sizes of several `(layout, set count)` pairs
pub fn merge_pool_sizes(requests: &[(&[vk::DescriptorPoolSize], u32)]) -> Vec<vk::DescriptorPoolSize> {
    let mut merged: Vec<vk::DescriptorPoolSize> = Vec::new();
    for (sizes, sets) in requests {
        for size in sizes.iter() {
            let count = size.descriptor_count * sets;
            match merged.iter_mut().find(|m| m.ty == size.ty) {
                Some(m) => m.descriptor_count += count,
                None => merged.push(vk::DescriptorPoolSize {
                    ty: size.ty,
                    descriptor_count: count,
                }),
            }
        }
    }
    merged
}

/// Descriptor pool sized up front for every set the renderer allocates
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    pub fn new(device: Device, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<Self> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(creation("create descriptor pool"))?
        };

        Ok(Self { pool, device })
    }

    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(creation("allocate descriptor sets"))
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

enum PendingInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

struct PendingWrite {
    set: vk::DescriptorSet,
    binding: u32,
    array_element: u32,
    ty: vk::DescriptorType,
    info: PendingInfo,
}

/// Collects descriptor writes and issues them in one update
#[derive(Default)]
pub struct DescriptorSetWriter {
    pending: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    ) -> Self {
        self.pending.push(PendingWrite {
            set,
            binding,
            array_element: 0,
            ty,
            info: PendingInfo::Buffer(info),
        });
        self
    }

    pub fn combined_image(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        self.pending.push(PendingWrite {
            set,
            binding,
            array_element: 0,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            info: PendingInfo::Image(vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }),
        });
        self
    }

    pub fn sampler(mut self, set: vk::DescriptorSet, binding: u32, sampler: vk::Sampler) -> Self {
        self.pending.push(PendingWrite {
            set,
            binding,
            array_element: 0,
            ty: vk::DescriptorType::SAMPLER,
            info: PendingInfo::Image(vk::DescriptorImageInfo {
                sampler,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            }),
        });
        self
    }

    pub fn sampled_image(mut self, set: vk::DescriptorSet, binding: u32, element: u32, view: vk::ImageView) -> Self {
        self.pending.push(PendingWrite {
            set,
            binding,
            array_element: element,
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            info: PendingInfo::Image(vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn update(self, device: &Device) {
        // Infos stay in `self.pending` for the duration of the call
        let writes: Vec<vk::WriteDescriptorSet> = self
            .pending
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(write.ty);
                match &write.info {
                    PendingInfo::Buffer(info) => builder.buffer_info(std::slice::from_ref(info)).build(),
                    PendingInfo::Image(info) => builder.image_info(std::slice::from_ref(info)).build(),
                }
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_group_by_type() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .add_uniform_buffer(2, vk::ShaderStageFlags::FRAGMENT);

        let sizes = builder.pool_sizes(3);
        assert_eq!(sizes.len(), 2);
        let samplers = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .map(|s| s.descriptor_count);
        assert_eq!(samplers, Some(6));
    }

    #[test]
    fn test_partially_bound_array_counts_capacity() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .add_partially_bound_images(1, 256, vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(builder.flags[1], vk::DescriptorBindingFlags::PARTIALLY_BOUND);
        let images = builder
            .pool_sizes(1)
            .into_iter()
            .find(|s| s.ty == vk::DescriptorType::SAMPLED_IMAGE)
            .map(|s| s.descriptor_count);
        assert_eq!(images, Some(256));
    }

    #[test]
    fn test_merge_pool_sizes_scales_by_set_count() {
        let compute = [
            vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 1 },
            vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_BUFFER, descriptor_count: 2 },
        ];
        let occlusion = [vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 1 }];

        let merged = merge_pool_sizes(&[(&compute, 2), (&occlusion, 1)]);
        let count = |ty| merged.iter().find(|s| s.ty == ty).map(|s| s.descriptor_count);
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(3));
        assert_eq!(count(vk::DescriptorType::STORAGE_BUFFER), Some(4));
    }
}
