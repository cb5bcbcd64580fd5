//! Deferred frame orchestration
//!
//! Per frame: acquire a presentable image, dispatch the particle update on the compute
//! queue, record geometry → occlusion → blur → lighting on the graphics queue, submit
//! with the waits named by the dependency table and present. Resize recovery
//! rebuilds the surface, onscreen targets, offscreen attachments and the descriptor
//! sets bound to them.

use ash::{vk, Device};

use crate::core::{RendererConfig, RuntimeToggles, ShaderConfig};
use crate::events::SurfaceEventReceiver;
use crate::foundation::math::Vec2;
use crate::render::attachments::{select_depth_format, OffscreenAttachmentSet};
use crate::render::backends::vulkan::initialization::Window;
use crate::render::backends::vulkan::particles::ParticleSimulationBridge;
use crate::render::backends::vulkan::rendering::{CommandPool, CommandRecorder, GraphicsPipelineSet, PassHandles};
use crate::render::backends::vulkan::resources::{
    MeshBuffers, OcclusionResources, ResourceDescriptorTable, Sampler, Texture,
};
use crate::render::backends::vulkan::state::{
    attachment_inputs, pass_begin, OffscreenAttachments, SurfaceStatus, SwapchainManager,
    VulkanAttachmentAllocator,
};
use crate::render::backends::vulkan::resources::ImageAllocator;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};
use crate::render::frame::{DependencyTable, FrameCycle, PassKind, PassPlan, Signal, Stage, FRAME_SLOT_COUNT};
use crate::render::occlusion::{kernel::noise_scale, OcclusionKernel, OcclusionParams};
use crate::render::push_constants::{GeometryPush, LightingDraw, LightingPush, OcclusionPush, ParticlePush};
use crate::scene::{Camera, Mesh, MeshHandle, Scene};

/// Everything one frame reads
pub struct FrameInput<'a> {
    pub scene: &'a Scene,
    pub camera: &'a Camera,
    pub toggles: &'a RuntimeToggles,
    pub delta_time: f32,
}

/// Image acquired by [`DeferredRenderer::begin_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    pub image_index: u32,
    pub slot: usize,
}

/// What happened to a frame passed to [`DeferredRenderer::render`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented(SurfaceStatus),
    /// Surface stale or window minimized; nothing was recorded
    Skipped,
}

#[derive(Debug, Clone, Copy)]
struct OcclusionSettings {
    radius: f32,
    bias: f32,
    kernel_size: usize,
}

/// Field order is drop order: GPU objects go first, the context last
pub struct DeferredRenderer {
    pipelines: GraphicsPipelineSet,
    particles: ParticleSimulationBridge,
    textures: Vec<Texture>,
    meshes: Vec<MeshBuffers>,
    occlusion: OcclusionResources,
    descriptors: ResourceDescriptorTable,
    _texture_sampler: Sampler,
    attachments: OffscreenAttachments,
    swapchain: SwapchainManager,
    graphics_commands: Vec<vk::CommandBuffer>,
    compute_commands: Vec<vk::CommandBuffer>,
    graphics_pool: CommandPool,
    compute_pool: CommandPool,
    cycle: FrameCycle,
    dependencies: DependencyTable,
    events: SurfaceEventReceiver,
    framebuffer: vk::Extent2D,
    needs_recreate: bool,
    close_requested: bool,
    settings: OcclusionSettings,
    device: Device,
    context: VulkanContext,
}

impl DeferredRenderer {
    pub fn new(window: &mut Window, config: &RendererConfig, events: SurfaceEventReceiver) -> VulkanResult<Self> {
        config.validate()?;
        let context = VulkanContext::new(window, config)?;
        let device = context.raw_device();
        let families = context.families();

        let depth_format = select_depth_format(|format| context.supports_depth_attachment(format))?;
        log::info!("Depth format {:?}", depth_format);

        let (width, height) = window.get_framebuffer_size();
        let framebuffer = vk::Extent2D { width, height };
        let swapchain = SwapchainManager::new(&context, framebuffer, depth_format)?;

        let graphics_pool = CommandPool::new(device.clone(), families.graphics)?;
        let compute_pool = CommandPool::new(device.clone(), families.compute)?;
        let slots = FRAME_SLOT_COUNT as u32;
        let graphics_commands = graphics_pool.allocate_command_buffers(slots)?;
        let compute_commands = compute_pool.allocate_command_buffers(slots)?;

        let descriptors = ResourceDescriptorTable::new(device.clone(), config.texture_capacity)?;
        let texture_sampler = Sampler::new(device.clone(), vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT)?;
        descriptors.write_shared_sampler(texture_sampler.handle());

        let kernel = OcclusionKernel::new(config.occlusion.seed);
        let occlusion = OcclusionResources::new(&context, &graphics_pool, context.graphics_queue(), &kernel)?;

        let attachments = OffscreenAttachmentSet::new(
            VulkanAttachmentAllocator::new(ImageAllocator::new(&context)),
            depth_format,
            swapchain.extent(),
        )?;
        descriptors.write_attachment_inputs(
            &attachment_inputs(&attachments, occlusion.gbuffer_sampler(), occlusion.occlusion_sampler())?,
            &occlusion.inputs(),
        );

        let shaders: ShaderConfig = config.shaders.clone().with_directory_resolution();
        let passes = PassHandles {
            geometry: attachments.targets(PassKind::Geometry)?.pass.handle(),
            occlusion: attachments.targets(PassKind::Occlusion)?.pass.handle(),
            blur: attachments.targets(PassKind::Blur)?.pass.handle(),
            presentation: swapchain.presentation_pass(),
        };
        let pipelines = GraphicsPipelineSet::new(&device, &shaders, &passes, &descriptors)?;

        let particles = ParticleSimulationBridge::new(
            &context,
            &graphics_pool,
            context.graphics_queue(),
            &descriptors,
            &config.particles,
        )?;

        log::info!("[FRAME] Renderer ready with {} frame slots", FRAME_SLOT_COUNT);
        Ok(Self {
            pipelines,
            particles,
            textures: Vec::new(),
            meshes: Vec::new(),
            occlusion,
            descriptors,
            _texture_sampler: texture_sampler,
            attachments,
            swapchain,
            graphics_commands,
            compute_commands,
            graphics_pool,
            compute_pool,
            cycle: FrameCycle::new(),
            dependencies: DependencyTable::frame()?,
            events,
            framebuffer,
            needs_recreate: false,
            close_requested: false,
            settings: OcclusionSettings {
                radius: config.occlusion.radius,
                bias: config.occlusion.bias,
                kernel_size: config.occlusion.kernel_size as usize,
            },
            device,
            context,
        })
    }

    /// Upload `mesh` for use by scene objects
    pub fn upload_mesh(&mut self, mesh: &Mesh) -> VulkanResult<MeshHandle> {
        let buffers = MeshBuffers::upload(
            &self.context,
            &self.graphics_pool,
            self.context.graphics_queue(),
            &mesh.vertices,
            &mesh.indices,
        )?;
        self.meshes.push(buffers);
        Ok(MeshHandle(self.meshes.len() - 1))
    }

    /// Upload an RGBA8 texture into the bindless pool and return its index
    pub fn upload_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> VulkanResult<u32> {
        let texture = Texture::from_rgba8(
            &self.context,
            &self.graphics_pool,
            self.context.graphics_queue(),
            width,
            height,
            pixels,
        )?;
        let index = self.descriptors.register_texture(texture.view())?;
        self.textures.push(texture);
        Ok(index)
    }

    /// Acquire, record, submit and present one frame
    pub fn render(&mut self, input: &FrameInput<'_>) -> VulkanResult<FrameOutcome> {
        let Some(token) = self.begin_frame()? else {
            return Ok(FrameOutcome::Skipped);
        };
        self.record(token, input)?;
        self.end_frame(token, input.delta_time).map(FrameOutcome::Presented)
    }

    /// Acquire the next image and move to recording
    ///
    /// Returns `None` when the surface is stale or the window is minimized; recovery
    /// runs at the start of a later call.
    pub fn begin_frame(&mut self) -> VulkanResult<Option<FrameToken>> {
        let pending = self.events.drain();
        self.close_requested |= pending.close_requested;
        if let Some((width, height)) = pending.resized {
            self.framebuffer = vk::Extent2D { width, height };
            self.needs_recreate = true;
        }

        if self.needs_recreate && !self.recover()? {
            return Ok(None);
        }

        self.cycle.start_acquire()?;
        let Some(image) = self.swapchain.acquire(&mut self.cycle)? else {
            self.needs_recreate = true;
            return Ok(None);
        };
        if image.suboptimal {
            self.needs_recreate = true;
        }
        Ok(Some(FrameToken {
            image_index: image.index,
            slot: self.swapchain.current_slot(),
        }))
    }

    /// Rebuild everything sized to the surface; `false` while the window or surface has no area
    fn recover(&mut self) -> VulkanResult<bool> {
        if self.framebuffer.width == 0 || self.framebuffer.height == 0 {
            log::debug!("[FRAME] Window minimized, deferring surface recovery");
            return Ok(false);
        }

        if !self.swapchain.recreate(&self.context, self.framebuffer)? {
            return Ok(false);
        }
        let extent = self.swapchain.extent();
        self.attachments.resize(extent)?;
        self.descriptors.write_attachment_inputs(
            &attachment_inputs(
                &self.attachments,
                self.occlusion.gbuffer_sampler(),
                self.occlusion.occlusion_sampler(),
            )?,
            &self.occlusion.inputs(),
        );
        self.needs_recreate = false;

        log::info!("[FRAME] Recovered surface at {}x{}", extent.width, extent.height);
        Ok(true)
    }

    /// Record the graphics passes selected by the toggles
    pub fn record(&mut self, token: FrameToken, input: &FrameInput<'_>) -> VulkanResult<()> {
        let command_buffer = self.slot_buffer(&self.graphics_commands, token.slot)?;
        let mut recorder = CommandRecorder::begin(self.device.clone(), command_buffer, true)?;

        let plan = PassPlan::for_frame(input.toggles.occlusion_enabled);
        for step in plan.steps() {
            self.cycle.begin_pass(step.kind)?;
            match step.kind {
                PassKind::Geometry => self.record_geometry(&mut recorder, input)?,
                PassKind::Occlusion => self.record_occlusion(&mut recorder, input)?,
                PassKind::Blur => self.record_blur(&mut recorder, step.draws)?,
                PassKind::Lighting => self.record_lighting(&mut recorder, token, input)?,
            }
            self.cycle.end_pass()?;
        }

        recorder.end()?;
        Ok(())
    }

    fn record_geometry(&self, recorder: &mut CommandRecorder, input: &FrameInput<'_>) -> VulkanResult<()> {
        let begin = pass_begin(&self.attachments, PassKind::Geometry)?;
        let pipeline = &self.pipelines.geometry;
        let view = input.camera.view_matrix();
        let projection = input.camera.projection_matrix();

        let mut pass = recorder.begin_render_pass(begin.render_pass, begin.framebuffer, begin.extent, &begin.clear_values);
        pass.bind_pipeline(pipeline.handle());
        for object in input.scene.objects() {
            let mesh = self.mesh(object.mesh)?;
            pass.push_constants(
                pipeline.layout(),
                pipeline.push_stages(),
                &GeometryPush::new(&view, &object.transform, &projection),
            );
            pass.bind_vertex_buffer(mesh.vertices.handle());
            pass.bind_index_buffer(mesh.indices.handle());
            pass.draw_indexed(mesh.index_count);
        }
        Ok(())
    }

    fn record_occlusion(&self, recorder: &mut CommandRecorder, input: &FrameInput<'_>) -> VulkanResult<()> {
        let begin = pass_begin(&self.attachments, PassKind::Occlusion)?;
        let pipeline = &self.pipelines.occlusion;
        let params = OcclusionParams {
            projection: input.camera.projection_matrix(),
            radius: self.settings.radius,
            bias: self.settings.bias,
            kernel_size: self.settings.kernel_size,
        };
        let push = OcclusionPush::new(&params, noise_scale(begin.extent.width, begin.extent.height));

        let mut pass = recorder.begin_render_pass(begin.render_pass, begin.framebuffer, begin.extent, &begin.clear_values);
        pass.bind_pipeline(pipeline.handle());
        pass.bind_descriptor_sets(pipeline.layout(), 0, &[self.descriptors.occlusion_set()]);
        pass.push_constants(pipeline.layout(), pipeline.push_stages(), &push);
        pass.draw(3);
        Ok(())
    }

    /// With `draws` false the pass only clears the target to fully lit
    fn record_blur(&self, recorder: &mut CommandRecorder, draws: bool) -> VulkanResult<()> {
        let begin = pass_begin(&self.attachments, PassKind::Blur)?;
        let pipeline = &self.pipelines.blur;

        let mut pass = recorder.begin_render_pass(begin.render_pass, begin.framebuffer, begin.extent, &begin.clear_values);
        if draws {
            pass.bind_pipeline(pipeline.handle());
            pass.bind_descriptor_sets(pipeline.layout(), 0, &[self.descriptors.blur_set()]);
            pass.draw(3);
        }
        Ok(())
    }

    fn record_lighting(
        &self,
        recorder: &mut CommandRecorder,
        token: FrameToken,
        input: &FrameInput<'_>,
    ) -> VulkanResult<()> {
        let extent = self.swapchain.extent();
        let framebuffer = self.swapchain.framebuffer(token.image_index)?;
        let clear_values = self.swapchain.presentation_clear_values();
        let view_projection = input.camera.view_projection();
        let light = &input.scene.light;
        let screen_size = Vec2::new(extent.width as f32, extent.height as f32);

        let mut pass = recorder.begin_render_pass(self.swapchain.presentation_pass(), framebuffer, extent, &clear_values);

        let lighting = &self.pipelines.lighting;
        pass.bind_pipeline(lighting.handle());
        pass.bind_descriptor_sets(
            lighting.layout(),
            0,
            &[self.descriptors.bindless_set(), self.descriptors.lighting_set()],
        );
        for object in input.scene.objects() {
            let mesh = self.mesh(object.mesh)?;
            let push = LightingPush::new(&LightingDraw {
                view_projection: &view_projection,
                model: &object.transform,
                light_position: light.position,
                light_color: light.color_intensity(),
                screen_size,
                texture_index: object.texture,
                debug_mode: input.toggles.debug_view.shader_value(),
            });
            pass.push_constants(lighting.layout(), lighting.push_stages(), &push);
            pass.bind_vertex_buffer(mesh.vertices.handle());
            pass.bind_index_buffer(mesh.indices.handle());
            pass.draw_indexed(mesh.index_count);
        }

        let particles = &self.pipelines.particles;
        pass.bind_pipeline(particles.handle());
        pass.push_constants(
            particles.layout(),
            particles.push_stages(),
            &ParticlePush::new(&view_projection),
        );
        self.particles.draw(&mut pass, token.slot)
    }

    /// Submit compute then graphics work for `token` and present
    ///
    /// The slot rotates as soon as the graphics submit succeeds, whatever the present
    /// status; a stale present is recovered at the next `begin_frame`.
    pub fn end_frame(&mut self, token: FrameToken, delta_time: f32) -> VulkanResult<SurfaceStatus> {
        self.cycle.submit()?;

        let mut ran = vec![Stage::ImageAcquire];
        self.submit_compute(token.slot, delta_time)?;
        ran.push(Stage::ParticleCompute);

        let signals = self.swapchain.signals();
        let semaphore = |signal: Signal| match signal {
            Signal::ImageAcquired => signals.image_available.handle(),
            Signal::ComputeFinished => signals.compute_finished.handle(),
            Signal::GraphicsFinished => signals.render_finished.handle(),
        };
        let (wait_semaphores, wait_stages): (Vec<vk::Semaphore>, Vec<vk::PipelineStageFlags>) = self
            .dependencies
            .waits_for(Stage::GraphicsPasses, &ran)
            .into_iter()
            .map(|(signal, stage)| (semaphore(signal), stage))
            .unzip();
        let signal_semaphores: Vec<vk::Semaphore> = self
            .dependencies
            .signals_of(Stage::GraphicsPasses)
            .into_iter()
            .map(semaphore)
            .collect();
        let present_wait = semaphore(Signal::GraphicsFinished);

        let command_buffers = [self.slot_buffer(&self.graphics_commands, token.slot)?];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        self.swapchain.prepare_submit()?;
        unsafe {
            self.device
                .queue_submit(
                    self.context.graphics_queue(),
                    &[submit.build()],
                    self.swapchain.in_flight_fence(),
                )
                .map_err(VulkanError::Api)?;
        }

        let status = self.swapchain.present(&mut self.cycle, token.image_index, present_wait)?;
        if status.needs_recreate() {
            self.needs_recreate = true;
        }
        Ok(status)
    }

    fn submit_compute(&self, slot: usize, delta_time: f32) -> VulkanResult<()> {
        self.particles.update_uniform(slot, delta_time)?;

        let command_buffer = self.slot_buffer(&self.compute_commands, slot)?;
        let mut recorder = CommandRecorder::begin(self.device.clone(), command_buffer, true)?;
        self.particles
            .dispatch(&mut recorder, slot, &self.pipelines.particle_update, &self.descriptors)?;
        let command_buffers = [recorder.end()?];

        let signal = [self.swapchain.signals().compute_finished.handle()];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);
        unsafe {
            self.device
                .queue_submit(self.context.compute_queue(), &[submit.build()], vk::Fence::null())
                .map_err(VulkanError::Api)
        }
    }

    fn slot_buffer(&self, buffers: &[vk::CommandBuffer], slot: usize) -> VulkanResult<vk::CommandBuffer> {
        buffers.get(slot).copied().ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("no command buffer for frame slot {}", slot),
        })
    }

    fn mesh(&self, handle: MeshHandle) -> VulkanResult<&MeshBuffers> {
        self.meshes.get(handle.0).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("unknown mesh handle {}", handle.0),
        })
    }

    /// Current presentation extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Whether the window asked to close since the last frame
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// How many times the offscreen attachments were reallocated
    pub fn attachment_rebuilds(&self) -> u64 {
        self.attachments.rebuilds()
    }

    /// Device context the renderer was built on
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }
}

impl Drop for DeferredRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("[FRAME] Device wait on shutdown failed: {}", e);
        }
        log::debug!("[FRAME] Renderer shutting down");
    }
}
