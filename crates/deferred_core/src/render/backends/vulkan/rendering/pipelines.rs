//! Graphics and compute pipelines
//!
//! Each pass is described by a [`PipelineDesc`] and compiled once. Render passes are
//! rebuilt on resize with identical formats, so the pipelines stay valid across rebuilds.

use ash::{vk, Device};

use crate::core::{ShaderConfig, ShaderStage};
use crate::render::backends::vulkan::initialization::context::creation;
use crate::render::backends::vulkan::rendering::shader::{ShaderModule, ENTRY_POINT};
use crate::render::backends::vulkan::resources::ResourceDescriptorTable;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::particles;
use crate::render::push_constants::{push_size, GeometryPush, LightingPush, OcclusionPush, ParticlePush};
use crate::scene::mesh::Vertex;

/// Where a pipeline's vertices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInput {
    /// Generated in the vertex shader from the vertex index
    None,
    /// Interleaved [`Vertex`] stream
    Mesh,
    /// Particle storage buffer read as a vertex stream
    Particles,
}

impl VertexInput {
    fn descriptions(
        self,
    ) -> (
        Vec<vk::VertexInputBindingDescription>,
        Vec<vk::VertexInputAttributeDescription>,
    ) {
        match self {
            Self::None => (Vec::new(), Vec::new()),
            Self::Mesh => (vec![Vertex::binding()], Vertex::attributes().to_vec()),
            Self::Particles => (vec![particles::vertex_binding()], particles::vertex_attributes().to_vec()),
        }
    }
}

/// Descriptor set layouts a pipeline binds, in set order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetLayout {
    Bindless,
    OcclusionInputs,
    BlurInput,
    LightingOcclusion,
    Compute,
}

impl SetLayout {
    fn resolve(self, table: &ResourceDescriptorTable) -> vk::DescriptorSetLayout {
        match self {
            Self::Bindless => table.bindless_layout(),
            Self::OcclusionInputs => table.occlusion_layout(),
            Self::BlurInput => table.blur_layout(),
            Self::LightingOcclusion => table.lighting_layout(),
            Self::Compute => table.compute_layout(),
        }
    }
}

/// Render pass a pipeline is compatible with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    Geometry,
    Occlusion,
    Blur,
    Presentation,
}

/// Fixed-function and layout state of one graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub name: &'static str,
    pub vertex: ShaderStage,
    pub fragment: ShaderStage,
    pub target: PassTarget,
    pub vertex_input: VertexInput,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    pub color_attachments: u32,
    pub blend: bool,
    pub set_layouts: Vec<SetLayout>,
    pub push_range: Option<vk::PushConstantRange>,
}

fn push_range(stages: vk::ShaderStageFlags, size: u32) -> Option<vk::PushConstantRange> {
    Some(vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size,
    })
}

impl PipelineDesc {
    /// Writes view-space position and normal into the G-buffer
    pub fn geometry() -> Self {
        Self {
            name: "geometry",
            vertex: ShaderStage::GeometryVertex,
            fragment: ShaderStage::GeometryFragment,
            target: PassTarget::Geometry,
            vertex_input: VertexInput::Mesh,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            depth_test: true,
            depth_write: true,
            color_attachments: 2,
            blend: false,
            set_layouts: Vec::new(),
            push_range: push_range(vk::ShaderStageFlags::VERTEX, push_size::<GeometryPush>()),
        }
    }

    fn fullscreen(
        name: &'static str,
        fragment: ShaderStage,
        target: PassTarget,
        set: SetLayout,
        push: Option<vk::PushConstantRange>,
    ) -> Self {
        Self {
            name,
            vertex: ShaderStage::FullscreenVertex,
            fragment,
            target,
            vertex_input: VertexInput::None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: false,
            depth_write: false,
            color_attachments: 1,
            blend: false,
            set_layouts: vec![set],
            push_range: push,
        }
    }

    pub fn occlusion() -> Self {
        Self::fullscreen(
            "occlusion",
            ShaderStage::OcclusionFragment,
            PassTarget::Occlusion,
            SetLayout::OcclusionInputs,
            push_range(vk::ShaderStageFlags::FRAGMENT, push_size::<OcclusionPush>()),
        )
    }

    pub fn blur() -> Self {
        Self::fullscreen(
            "blur",
            ShaderStage::BlurFragment,
            PassTarget::Blur,
            SetLayout::BlurInput,
            None,
        )
    }

    /// Forward-shaded scene draw into the swap image, modulated by blurred occlusion
    pub fn lighting() -> Self {
        Self {
            name: "lighting",
            vertex: ShaderStage::LightingVertex,
            fragment: ShaderStage::LightingFragment,
            target: PassTarget::Presentation,
            vertex_input: VertexInput::Mesh,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            depth_test: true,
            depth_write: true,
            color_attachments: 1,
            blend: false,
            set_layouts: vec![SetLayout::Bindless, SetLayout::LightingOcclusion],
            push_range: push_range(
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                push_size::<LightingPush>(),
            ),
        }
    }

    /// Additive point sprites drawn after the scene in the presentation pass
    pub fn particles() -> Self {
        Self {
            name: "particles",
            vertex: ShaderStage::ParticleVertex,
            fragment: ShaderStage::ParticleFragment,
            target: PassTarget::Presentation,
            vertex_input: VertexInput::Particles,
            topology: vk::PrimitiveTopology::POINT_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: true,
            depth_write: false,
            color_attachments: 1,
            blend: true,
            set_layouts: Vec::new(),
            push_range: push_range(vk::ShaderStageFlags::VERTEX, push_size::<ParticlePush>()),
        }
    }
}

fn pipeline_layout(
    device: &Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_range: Option<vk::PushConstantRange>,
) -> VulkanResult<vk::PipelineLayout> {
    let ranges: Vec<vk::PushConstantRange> = push_range.into_iter().collect();
    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(&ranges);
    unsafe {
        device
            .create_pipeline_layout(&layout_info, None)
            .map_err(creation("create pipeline layout"))
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    push_stages: vk::ShaderStageFlags,
}

impl GraphicsPipeline {
    pub fn new(
        device: &Device,
        desc: &PipelineDesc,
        shaders: &ShaderConfig,
        render_pass: vk::RenderPass,
        table: &ResourceDescriptorTable,
    ) -> VulkanResult<Self> {
        let vertex = ShaderModule::from_file(device, shaders.path(desc.vertex))?;
        let fragment = ShaderModule::from_file(device, shaders.path(desc.fragment))?;
        let stages = [
            vertex.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let (bindings, attributes) = desc.vertex_input.descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // Projection flips Y, so counter-clockwise meshes stay front facing
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let blend_attachment = if desc.blend {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        };
        let blend_attachments = vec![blend_attachment; desc.color_attachments as usize];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let set_layouts: Vec<vk::DescriptorSetLayout> =
            desc.set_layouts.iter().map(|set| set.resolve(table)).collect();
        let layout = pipeline_layout(device, &set_layouts, desc.push_range)?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, result)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::ResourceCreation {
                    operation: "create graphics pipeline",
                    result,
                });
            }
        };

        log::debug!("Created '{}' pipeline", desc.name);
        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
            push_stages: desc.push_range.map(|r| r.stage_flags).unwrap_or_default(),
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn push_stages(&self) -> vk::ShaderStageFlags {
        self.push_stages
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Compute pipeline for the particle update
pub struct ComputePipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputePipeline {
    pub fn new(
        device: &Device,
        shaders: &ShaderConfig,
        stage: ShaderStage,
        set_layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<Self> {
        let module = ShaderModule::from_file(device, shaders.path(stage))?;
        let layout = pipeline_layout(device, &[set_layout], None)?;

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(module.handle())
                    .name(ENTRY_POINT)
                    .build(),
            )
            .layout(layout);

        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, result)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::ResourceCreation {
                    operation: "create compute pipeline",
                    result,
                });
            }
        };

        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Render pass handles the graphics pipelines are built against
#[derive(Debug, Clone, Copy)]
pub struct PassHandles {
    pub geometry: vk::RenderPass,
    pub occlusion: vk::RenderPass,
    pub blur: vk::RenderPass,
    pub presentation: vk::RenderPass,
}

impl PassHandles {
    fn get(&self, target: PassTarget) -> vk::RenderPass {
        match target {
            PassTarget::Geometry => self.geometry,
            PassTarget::Occlusion => self.occlusion,
            PassTarget::Blur => self.blur,
            PassTarget::Presentation => self.presentation,
        }
    }
}

/// One pipeline per pass plus the particle compute pipeline
pub struct GraphicsPipelineSet {
    pub geometry: GraphicsPipeline,
    pub occlusion: GraphicsPipeline,
    pub blur: GraphicsPipeline,
    pub lighting: GraphicsPipeline,
    pub particles: GraphicsPipeline,
    pub particle_update: ComputePipeline,
}

impl GraphicsPipelineSet {
    pub fn new(
        device: &Device,
        shaders: &ShaderConfig,
        passes: &PassHandles,
        table: &ResourceDescriptorTable,
    ) -> VulkanResult<Self> {
        let build = |desc: PipelineDesc| GraphicsPipeline::new(device, &desc, shaders, passes.get(desc.target), table);
        let set = Self {
            geometry: build(PipelineDesc::geometry())?,
            occlusion: build(PipelineDesc::occlusion())?,
            blur: build(PipelineDesc::blur())?,
            lighting: build(PipelineDesc::lighting())?,
            particles: build(PipelineDesc::particles())?,
            particle_update: ComputePipeline::new(
                device,
                shaders,
                ShaderStage::ParticleCompute,
                table.compute_layout(),
            )?,
        };
        log::info!("Pipeline set ready (5 graphics, 1 compute)");
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullscreen_passes_have_no_vertex_or_depth_state() {
        for desc in [PipelineDesc::occlusion(), PipelineDesc::blur()] {
            assert_eq!(desc.vertex_input, VertexInput::None);
            assert_eq!(desc.vertex, ShaderStage::FullscreenVertex);
            assert!(!desc.depth_test);
            assert_eq!(desc.cull_mode, vk::CullModeFlags::NONE);
            assert_eq!(desc.color_attachments, 1);
        }
    }

    #[test]
    fn test_geometry_writes_two_targets() {
        let desc = PipelineDesc::geometry();
        assert_eq!(desc.color_attachments, 2);
        assert_eq!(desc.target, PassTarget::Geometry);
        assert_eq!(desc.push_range.map(|r| r.size), Some(192));
    }

    #[test]
    fn test_lighting_layout_and_push_block() {
        let desc = PipelineDesc::lighting();
        assert_eq!(desc.set_layouts, vec![SetLayout::Bindless, SetLayout::LightingOcclusion]);
        let range = desc.push_range.unwrap();
        assert_eq!(range.size, 240);
        assert!(range.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_particles_draw_points_from_storage() {
        let desc = PipelineDesc::particles();
        assert_eq!(desc.topology, vk::PrimitiveTopology::POINT_LIST);
        assert_eq!(desc.vertex_input, VertexInput::Particles);
        assert!(desc.blend);
        assert!(!desc.depth_write);
        let (bindings, attributes) = desc.vertex_input.descriptions();
        assert_eq!(bindings[0].stride, 64);
        assert_eq!(attributes.len(), 2);
    }

    #[test]
    fn test_occlusion_push_fits_block() {
        assert_eq!(PipelineDesc::occlusion().push_range.map(|r| r.size), Some(84));
        assert!(PipelineDesc::blur().push_range.is_none());
    }
}
