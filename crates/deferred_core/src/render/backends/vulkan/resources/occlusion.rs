//! GPU copies of the occlusion kernel and rotation noise, plus the samplers the
//! full-screen passes read attachments with

use ash::vk;

use crate::render::backends::vulkan::rendering::commands::CommandPool;
use crate::render::backends::vulkan::resources::buffer::Buffer;
use crate::render::backends::vulkan::resources::descriptor_table::OcclusionInputs;
use crate::render::backends::vulkan::resources::image::{Image, Sampler};
use crate::render::backends::vulkan::{VulkanContext, VulkanResult};
use crate::render::occlusion::{OcclusionKernel, KERNEL_SIZE, NOISE_DIM};

/// Format of the rotation noise texture
pub const NOISE_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Read-only after construction; shared by every frame slot
pub struct OcclusionResources {
    kernel: Buffer,
    noise: Image,
    noise_sampler: Sampler,
    gbuffer_sampler: Sampler,
    occlusion_sampler: Sampler,
}

impl OcclusionResources {
    pub fn new(
        context: &VulkanContext,
        pool: &CommandPool,
        queue: vk::Queue,
        source: &OcclusionKernel,
    ) -> VulkanResult<Self> {
        let kernel = Buffer::device_local(
            context,
            pool,
            queue,
            source.kernel_bytes(),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        let noise = Image::sampled_from_pixels(
            context,
            pool,
            queue,
            vk::Extent2D {
                width: NOISE_DIM as u32,
                height: NOISE_DIM as u32,
            },
            NOISE_FORMAT,
            source.noise_bytes(),
        )?;

        let device = context.raw_device();
        let noise_sampler = Sampler::new(device.clone(), vk::Filter::NEAREST, vk::SamplerAddressMode::REPEAT)?;
        let gbuffer_sampler = Sampler::new(device.clone(), vk::Filter::NEAREST, vk::SamplerAddressMode::CLAMP_TO_EDGE)?;
        let occlusion_sampler = Sampler::new(device, vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_EDGE)?;

        log::info!(
            "Occlusion kernel uploaded: {} samples, {}x{} noise tile",
            KERNEL_SIZE,
            NOISE_DIM,
            NOISE_DIM
        );

        Ok(Self {
            kernel,
            noise,
            noise_sampler,
            gbuffer_sampler,
            occlusion_sampler,
        })
    }

    pub fn inputs(&self) -> OcclusionInputs {
        OcclusionInputs {
            noise_view: self.noise.view(),
            noise_sampler: self.noise_sampler.handle(),
            kernel: self.kernel.descriptor_info(),
        }
    }

    pub fn gbuffer_sampler(&self) -> vk::Sampler {
        self.gbuffer_sampler.handle()
    }

    pub fn occlusion_sampler(&self) -> vk::Sampler {
        self.occlusion_sampler.handle()
    }
}
