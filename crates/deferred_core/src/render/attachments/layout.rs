//! Render pass descriptions
//!
//! Each pass is described once as plain data (attachments, load/store behaviour, final
//! layouts and subpass dependencies). The Vulkan layer turns a [`PassLayout`] into a
//! render pass; tests inspect the same description.

use ash::vk;

use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::frame::PassKind;

/// Position and normal targets
pub const GBUFFER_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Raw and blurred occlusion targets
pub const OCCLUSION_FORMAT: vk::Format = vk::Format::R8_UNORM;

/// Depth formats in preference order
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate the device supports as an optimal-tiled depth attachment
pub fn select_depth_format(mut supported: impl FnMut(vk::Format) -> bool) -> VulkanResult<vk::Format> {
    DEPTH_CANDIDATES
        .iter()
        .copied()
        .find(|&format| supported(format))
        .ok_or(VulkanError::NoSuitableDepthFormat)
}

/// Whether a depth format carries a stencil aspect
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Bytes per texel of the formats the renderer allocates
pub fn texel_size(format: vk::Format) -> u64 {
    match format {
        vk::Format::R8_UNORM => 1,
        vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::R8G8B8A8_UNORM => 4,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

/// Initial contents of an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearKind {
    Color([f32; 4]),
    Depth(f32),
}

impl ClearKind {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearKind::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearKind::Depth(depth) => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        }
    }
}

/// One attachment of a pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentDesc {
    pub name: &'static str,
    pub format: vk::Format,
    pub depth: bool,
    pub store_op: vk::AttachmentStoreOp,
    pub final_layout: vk::ImageLayout,
    pub clear: ClearKind,
}

impl AttachmentDesc {
    fn color(name: &'static str, format: vk::Format, clear: f32, final_layout: vk::ImageLayout) -> Self {
        Self {
            name,
            format,
            depth: false,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout,
            clear: ClearKind::Color([clear, clear, clear, clear]),
        }
    }

    fn depth(format: vk::Format, store_op: vk::AttachmentStoreOp, final_layout: vk::ImageLayout) -> Self {
        Self {
            name: "depth",
            format,
            depth: true,
            store_op,
            final_layout,
            clear: ClearKind::Depth(1.0),
        }
    }

    /// Every attachment is cleared on load and starts from an undefined layout
    pub fn to_vk(&self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::builder()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(self.store_op)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(self.final_layout)
            .build()
    }
}

/// Subpass dependency between the pass and the work around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassEdge {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub by_region: bool,
}

impl PassEdge {
    pub fn to_vk(&self) -> vk::SubpassDependency {
        let flags = if self.by_region {
            vk::DependencyFlags::BY_REGION
        } else {
            vk::DependencyFlags::empty()
        };
        vk::SubpassDependency::builder()
            .src_subpass(self.src_subpass)
            .dst_subpass(self.dst_subpass)
            .src_stage_mask(self.src_stage)
            .dst_stage_mask(self.dst_stage)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .dependency_flags(flags)
            .build()
    }
}

/// Attachments and dependencies of a single-subpass render pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassLayout {
    pub name: &'static str,
    pub attachments: Vec<AttachmentDesc>,
    pub edges: Vec<PassEdge>,
}

impl PassLayout {
    /// Position + normal + depth, left shader-readable for the occlusion pass
    pub fn geometry(depth_format: vk::Format) -> Self {
        let read_only = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        let clear = PassKind::Geometry.clear_value();
        Self {
            name: "geometry",
            attachments: vec![
                AttachmentDesc::color("position", GBUFFER_COLOR_FORMAT, clear, read_only),
                AttachmentDesc::color("normal", GBUFFER_COLOR_FORMAT, clear, read_only),
                AttachmentDesc::depth(
                    depth_format,
                    vk::AttachmentStoreOp::STORE,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                ),
            ],
            edges: vec![
                PassEdge {
                    src_subpass: vk::SUBPASS_EXTERNAL,
                    dst_subpass: 0,
                    src_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                    src_access: vk::AccessFlags::MEMORY_READ,
                    dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    by_region: true,
                },
                PassEdge {
                    src_subpass: 0,
                    dst_subpass: vk::SUBPASS_EXTERNAL,
                    src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    by_region: true,
                },
            ],
        }
    }

    /// Single `R8_UNORM` target for the occlusion or blur pass
    ///
    /// The incoming edge orders this pass's writes after the previous frame's sampling
    /// of the same target; the outgoing edge makes the writes visible to the next
    /// pass's fragment shader.
    pub fn occlusion(kind: PassKind) -> Self {
        let name = kind.name();
        Self {
            name,
            attachments: vec![AttachmentDesc::color(
                name,
                OCCLUSION_FORMAT,
                kind.clear_value(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )],
            edges: vec![
                PassEdge {
                    src_subpass: vk::SUBPASS_EXTERNAL,
                    dst_subpass: 0,
                    src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    src_access: vk::AccessFlags::SHADER_READ,
                    dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    by_region: true,
                },
                PassEdge {
                    src_subpass: 0,
                    dst_subpass: vk::SUBPASS_EXTERNAL,
                    src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    by_region: true,
                },
            ],
        }
    }

    /// Swap image + depth for the lighting and particle draws
    pub fn presentation(color_format: vk::Format, depth_format: vk::Format) -> Self {
        Self {
            name: "presentation",
            attachments: vec![
                AttachmentDesc::color("swapchain", color_format, 0.0, vk::ImageLayout::PRESENT_SRC_KHR),
                AttachmentDesc::depth(
                    depth_format,
                    vk::AttachmentStoreOp::DONT_CARE,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ),
            ],
            edges: vec![PassEdge {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                by_region: false,
            }],
        }
    }

    pub fn color_attachments(&self) -> impl Iterator<Item = &AttachmentDesc> {
        self.attachments.iter().filter(|a| !a.depth)
    }

    pub fn color_count(&self) -> usize {
        self.color_attachments().count()
    }

    pub fn depth_index(&self) -> Option<usize> {
        self.attachments.iter().position(|a| a.depth)
    }

    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.attachments.iter().map(|a| a.clear.to_vk()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_preference_order() {
        assert_eq!(select_depth_format(|_| true).unwrap(), vk::Format::D32_SFLOAT);
        let only_packed = |f: vk::Format| f == vk::Format::D24_UNORM_S8_UINT;
        assert_eq!(select_depth_format(only_packed).unwrap(), vk::Format::D24_UNORM_S8_UINT);
        let no_plain = |f: vk::Format| f != vk::Format::D32_SFLOAT;
        assert_eq!(select_depth_format(no_plain).unwrap(), vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn test_no_depth_format_is_fatal() {
        assert!(matches!(select_depth_format(|_| false), Err(VulkanError::NoSuitableDepthFormat)));
    }

    #[test]
    fn test_geometry_edges_are_by_region_around_the_pass() {
        let layout = PassLayout::geometry(vk::Format::D32_SFLOAT);
        assert_eq!(layout.color_count(), 2);
        assert_eq!(layout.depth_index(), Some(2));
        assert_eq!(layout.edges.len(), 2);
        assert!(layout.edges.iter().all(|e| e.by_region));

        let before = &layout.edges[0];
        assert_eq!(before.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(before.dst_access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));

        let after = &layout.edges[1];
        assert_eq!(after.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(after.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(after.dst_access, vk::AccessFlags::SHADER_READ);
        assert!(layout
            .color_attachments()
            .all(|a| a.final_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }

    #[test]
    fn test_occlusion_edges_scoped_to_fragment_stage() {
        for kind in [PassKind::Occlusion, PassKind::Blur] {
            let layout = PassLayout::occlusion(kind);
            assert_eq!(layout.attachments.len(), 1);
            assert_eq!(layout.attachments[0].format, OCCLUSION_FORMAT);
            assert_eq!(layout.attachments[0].clear, ClearKind::Color([1.0; 4]));
            for edge in &layout.edges {
                let stages = edge.src_stage | edge.dst_stage;
                assert!(stages.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
                assert!(!stages.contains(vk::PipelineStageFlags::ALL_COMMANDS));
            }
            // Read-after-write out, write-after-read in
            assert_eq!(layout.edges[0].src_access, vk::AccessFlags::SHADER_READ);
            assert_eq!(layout.edges[1].dst_access, vk::AccessFlags::SHADER_READ);
        }
    }

    #[test]
    fn test_presentation_layout() {
        let layout = PassLayout::presentation(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        assert_eq!(layout.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(layout.clear_values().len(), 2);
    }

    #[test]
    fn test_texel_sizes() {
        assert_eq!(texel_size(OCCLUSION_FORMAT), 1);
        assert_eq!(texel_size(GBUFFER_COLOR_FORMAT), 8);
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }
}
