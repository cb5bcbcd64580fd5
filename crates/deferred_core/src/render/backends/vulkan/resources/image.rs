//! Images, views and samplers
//!
//! An [`Image`] owns its memory and a single 2D view. [`ImageAllocator`] creates
//! attachments and depth targets; uploaded textures go through `sampled_from_pixels`.

use ash::{vk, Device};

use crate::render::attachments::AttachmentDesc;
use crate::render::backends::vulkan::initialization::context::{creation, find_memory_type};
use crate::render::backends::vulkan::rendering::commands::CommandPool;
use crate::render::backends::vulkan::resources::buffer::Buffer;
use crate::render::backends::vulkan::{VulkanContext, VulkanResult};

/// Device handle and memory properties, enough to create images outside the context
#[derive(Clone)]
pub struct ImageAllocator {
    device: Device,
    memory: vk::PhysicalDeviceMemoryProperties,
}

impl ImageAllocator {
    pub fn new(context: &VulkanContext) -> Self {
        Self {
            device: context.raw_device(),
            memory: context.memory_properties(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn create(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Image> {
        let device = &self.device;
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None).map_err(creation("create image"))? };

        // Partially built resources are released by `partial` on any early return
        let mut partial = PartialImage {
            device,
            image,
            memory: vk::DeviceMemory::null(),
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = find_memory_type(
            &self.memory,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        partial.memory = unsafe {
            device
                .allocate_memory(&alloc_info, None)
                .map_err(creation("allocate image memory"))?
        };
        unsafe {
            device
                .bind_image_memory(image, partial.memory, 0)
                .map_err(creation("bind image memory"))?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(creation("create image view"))?
        };

        let memory = partial.release();
        Ok(Image {
            device: device.clone(),
            image,
            memory,
            view,
            format,
            extent,
        })
    }

    /// Render target for `desc`; every target is also sampled by a later pass
    pub fn attachment(&self, desc: &AttachmentDesc, extent: vk::Extent2D) -> VulkanResult<Image> {
        if desc.depth {
            self.depth(desc.format, extent, vk::ImageUsageFlags::SAMPLED)
        } else {
            self.create(
                extent,
                desc.format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                vk::ImageAspectFlags::COLOR,
            )
        }
    }

    /// Depth target; the view only exposes the depth aspect
    pub fn depth(
        &self,
        format: vk::Format,
        extent: vk::Extent2D,
        extra_usage: vk::ImageUsageFlags,
    ) -> VulkanResult<Image> {
        self.create(
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | extra_usage,
            vk::ImageAspectFlags::DEPTH,
        )
    }
}

/// 2D image with dedicated memory and one view
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Image {
    /// Sampled colour image filled from tightly packed `pixels`
    pub fn sampled_from_pixels(
        context: &VulkanContext,
        pool: &CommandPool,
        queue: vk::Queue,
        extent: vk::Extent2D,
        format: vk::Format,
        pixels: &[u8],
    ) -> VulkanResult<Self> {
        let image = ImageAllocator::new(context).create(
            extent,
            format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
        )?;
        let staging = Buffer::staging(context, pixels)?;

        pool.submit_and_wait(queue, |recorder| {
            recorder.image_barrier(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                image.layout_barrier(
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
            );
            recorder.copy_buffer_to_image(staging.handle(), image.handle(), extent);
            recorder.image_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                image.layout_barrier(
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::SHADER_READ,
                ),
            );
            Ok(())
        })?;
        Ok(image)
    }

    fn layout_barrier(
        &self,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build()
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Cleanup guard for an image whose construction has not finished
struct PartialImage<'a> {
    device: &'a Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
}

impl PartialImage<'_> {
    fn release(mut self) -> vk::DeviceMemory {
        self.image = vk::Image::null();
        std::mem::replace(&mut self.memory, vk::DeviceMemory::null())
    }
}

impl Drop for PartialImage<'_> {
    fn drop(&mut self) {
        unsafe {
            if self.image != vk::Image::null() {
                self.device.destroy_image(self.image, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    pub fn new(
        device: Device,
        filter: vk::Filter,
        address_mode: vk::SamplerAddressMode,
    ) -> VulkanResult<Self> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(0.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);
        let sampler = unsafe { device.create_sampler(&info, None).map_err(creation("create sampler"))? };
        Ok(Self { device, sampler })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}
