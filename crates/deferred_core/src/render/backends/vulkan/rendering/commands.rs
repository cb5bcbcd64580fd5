//! Command pools and typed command recording
//!
//! [`CommandRecorder`] wraps one primary command buffer for the duration of a
//! recording. Render passes are scoped by [`ActiveRenderPass`], which ends the pass
//! when dropped.

use ash::{vk, Device};
use bytemuck::Pod;

use crate::render::backends::vulkan::initialization::context::creation;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_create_info, None)
                .map_err(creation("create command pool"))?
        };

        Ok(Self { device, command_pool })
    }

    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(creation("allocate command buffers"))
        }
    }

    /// Record with `record`, submit to `queue` and wait for completion
    ///
    /// Used for one-off uploads at startup; never on the per-frame path.
    pub fn submit_and_wait(
        &self,
        queue: vk::Queue,
        record: impl FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    ) -> VulkanResult<()> {
        let command_buffer = self
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "driver returned no command buffer".to_string(),
            })?;

        let result = (|| {
            let mut recorder = CommandRecorder::begin(self.device.clone(), command_buffer, true)?;
            record(&mut recorder)?;
            let command_buffer = recorder.end()?;

            let buffers = [command_buffer];
            let submit = vk::SubmitInfo::builder().command_buffers(&buffers);
            unsafe {
                self.device
                    .queue_submit(queue, &[submit.build()], vk::Fence::null())
                    .map_err(VulkanError::Api)?;
                self.device.queue_wait_idle(queue).map_err(VulkanError::Api)
            }
        })();

        unsafe { self.device.free_command_buffers(self.command_pool, &[command_buffer]) };
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Recording state for one command buffer
pub struct CommandRecorder {
    device: Device,
    command_buffer: vk::CommandBuffer,
}

impl CommandRecorder {
    /// Reset and begin `command_buffer`
    pub fn begin(device: Device, command_buffer: vk::CommandBuffer, one_time: bool) -> VulkanResult<Self> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        Ok(Self { device, command_buffer })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Begin a render pass covering `extent`, with viewport and scissor set to match
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) -> ActiveRenderPass<'_> {
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device
                .cmd_begin_render_pass(self.command_buffer, &render_pass_begin, vk::SubpassContents::INLINE);
            self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(self.command_buffer, 0, &[render_area]);
        }

        ActiveRenderPass { recorder: self }
    }

    pub fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(self.command_buffer, bind_point, pipeline);
        }
    }

    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(self.command_buffer, bind_point, layout, first_set, sets, &[]);
        }
    }

    /// Push a `Pod` block at offset 0
    pub fn push_constants<T: Pod>(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &T) {
        unsafe {
            self.device
                .cmd_push_constants(self.command_buffer, layout, stages, 0, bytemuck::bytes_of(data));
        }
    }

    pub fn dispatch(&mut self, groups_x: u32) {
        unsafe {
            self.device.cmd_dispatch(self.command_buffer, groups_x, 1, 1);
        }
    }

    /// Global memory barrier between two pipeline stages
    pub fn memory_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    pub fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
        }
    }

    pub fn copy_buffer_to_image(&mut self, src: vk::Buffer, dst: vk::Image, extent: vk::Extent2D) {
        let region = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Finish recording
    pub fn end(self) -> VulkanResult<vk::CommandBuffer> {
        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }
        Ok(self.command_buffer)
    }
}

/// Render pass in progress; ended on drop
pub struct ActiveRenderPass<'a> {
    recorder: &'a mut CommandRecorder,
}

impl<'a> ActiveRenderPass<'a> {
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
    }

    pub fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet]) {
        self.recorder
            .bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, layout, first_set, sets);
    }

    pub fn push_constants<T: Pod>(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &T) {
        self.recorder.push_constants(layout, stages, data);
    }

    pub fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_vertex_buffers(self.recorder.command_buffer, 0, &[buffer], &[0]);
        }
    }

    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_index_buffer(self.recorder.command_buffer, buffer, 0, vk::IndexType::UINT32);
        }
    }

    pub fn draw(&mut self, vertex_count: u32) {
        unsafe {
            self.recorder
                .device
                .cmd_draw(self.recorder.command_buffer, vertex_count, 1, 0, 0);
        }
    }

    pub fn draw_indexed(&mut self, index_count: u32) {
        unsafe {
            self.recorder
                .device
                .cmd_draw_indexed(self.recorder.command_buffer, index_count, 1, 0, 0, 0);
        }
    }
}

impl<'a> Drop for ActiveRenderPass<'a> {
    fn drop(&mut self) {
        unsafe {
            self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}
