//! Compute particle simulation
//!
//! One storage buffer per frame slot. The dispatch for slot `s` reads the buffer
//! written by slot `s - 1` and writes buffer `s`; the particle draw for slot `s` binds
//! buffer `s` as its vertex stream.

use ash::vk;

use crate::core::ParticleConfig;
use crate::foundation::math::Vec3;
use crate::render::backends::vulkan::rendering::{ActiveRenderPass, CommandPool, CommandRecorder, ComputePipeline};
use crate::render::backends::vulkan::resources::{Buffer, ComputeBindings, ResourceDescriptorTable, UniformBuffer};
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};
use crate::render::frame::FRAME_SLOT_COUNT;
use crate::render::particles::{dispatch_group_count, ParticleEmitter, ParticleFrameUniform, ParticleSlots};

pub struct ParticleSimulationBridge {
    buffers: Vec<Buffer>,
    uniforms: Vec<UniformBuffer<ParticleFrameUniform>>,
    slots: ParticleSlots,
    emitter: ParticleEmitter,
    count: u32,
    groups: u32,
}

impl ParticleSimulationBridge {
    /// Upload the seeded particles into every slot's buffer and write the compute sets
    pub fn new(
        context: &VulkanContext,
        pool: &CommandPool,
        queue: vk::Queue,
        table: &ResourceDescriptorTable,
        config: &ParticleConfig,
    ) -> VulkanResult<Self> {
        let origin = Vec3::from(config.emitter_origin);
        let emitter = ParticleEmitter::new(origin);
        let particles = emitter.spawn(config.count, config.seed);
        let bytes: &[u8] = bytemuck::cast_slice(&particles);

        let buffers = (0..FRAME_SLOT_COUNT)
            .map(|_| {
                Buffer::device_local(
                    context,
                    pool,
                    queue,
                    bytes,
                    vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        let uniforms = (0..FRAME_SLOT_COUNT)
            .map(|_| UniformBuffer::new(context))
            .collect::<VulkanResult<Vec<_>>>()?;

        let bridge = Self {
            buffers,
            uniforms,
            slots: ParticleSlots::new(FRAME_SLOT_COUNT),
            emitter,
            count: config.count,
            groups: dispatch_group_count(config.count, config.workgroup_size),
        };
        for slot in 0..FRAME_SLOT_COUNT {
            table.write_compute(slot, &bridge.bindings(slot))?;
        }

        log::info!(
            "[PARTICLES] {} particles, {} workgroups of {}",
            bridge.count,
            bridge.groups,
            config.workgroup_size
        );
        Ok(bridge)
    }

    fn bindings(&self, slot: usize) -> ComputeBindings {
        ComputeBindings {
            frame_uniform: self.uniforms[slot].descriptor_info(),
            previous: self.buffers[self.slots.previous(slot)].descriptor_info(),
            current: self.buffers[self.slots.current(slot)].descriptor_info(),
        }
    }

    fn check_slot(&self, slot: usize) -> VulkanResult<()> {
        if slot < FRAME_SLOT_COUNT {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: format!("frame slot {} outside {} particle slots", slot, FRAME_SLOT_COUNT),
            })
        }
    }

    /// Write this frame's delta time and emitter origin into the slot's uniform
    pub fn update_uniform(&self, slot: usize, delta_time: f32) -> VulkanResult<()> {
        self.check_slot(slot)?;
        self.uniforms[slot].update(&ParticleFrameUniform::new(delta_time, self.emitter.origin()))
    }

    /// Record the update dispatch for `slot`
    pub fn dispatch(
        &self,
        recorder: &mut CommandRecorder,
        slot: usize,
        pipeline: &ComputePipeline,
        table: &ResourceDescriptorTable,
    ) -> VulkanResult<()> {
        self.check_slot(slot)?;
        // Earlier dispatches on this queue wrote the buffer read here
        recorder.memory_barrier(
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_WRITE,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        );
        recorder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline.handle());
        recorder.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            pipeline.layout(),
            0,
            &[table.compute_set(slot)?],
        );
        recorder.dispatch(self.groups);
        Ok(())
    }

    /// Bind the buffer `slot` just wrote and draw one point per particle
    pub fn draw(&self, pass: &mut ActiveRenderPass<'_>, slot: usize) -> VulkanResult<()> {
        self.check_slot(slot)?;
        pass.bind_vertex_buffer(self.buffers[self.slots.draw_buffer(slot)].handle());
        pass.draw(self.count);
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn workgroups(&self) -> u32 {
        self.groups
    }
}
