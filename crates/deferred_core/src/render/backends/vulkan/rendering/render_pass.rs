//! Render passes built from [`PassLayout`] descriptions, and framebuffers

use ash::{vk, Device};

use crate::render::attachments::PassLayout;
use crate::render::backends::vulkan::initialization::context::creation;
use crate::render::backends::vulkan::VulkanResult;

/// Colour references in declaration order plus the optional depth reference
pub fn subpass_references(layout: &PassLayout) -> (Vec<vk::AttachmentReference>, Option<vk::AttachmentReference>) {
    let mut colors = Vec::new();
    let mut depth = None;
    for (index, attachment) in layout.attachments.iter().enumerate() {
        let index = index as u32;
        if attachment.depth {
            depth = Some(vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
        } else {
            colors.push(vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }
    }
    (colors, depth)
}

/// Single-subpass render pass with RAII cleanup
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
    name: &'static str,
}

impl RenderPass {
    pub fn from_layout(device: &Device, layout: &PassLayout) -> VulkanResult<Self> {
        let attachments: Vec<vk::AttachmentDescription> = layout.attachments.iter().map(|a| a.to_vk()).collect();
        let dependencies: Vec<vk::SubpassDependency> = layout.edges.iter().map(|e| e.to_vk()).collect();
        let (color_refs, depth_ref) = subpass_references(layout);

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass.build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe {
            device
                .create_render_pass(&create_info, None)
                .map_err(creation("create render pass"))?
        };
        log::debug!(
            "[ATTACHMENTS] Render pass '{}' with {} attachments, {} edges",
            layout.name,
            attachments.len(),
            dependencies.len()
        );

        Ok(Self {
            device: device.clone(),
            render_pass,
            name: layout.name,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Framebuffer with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&create_info, None)
                .map_err(creation("create framebuffer"))?
        };

        Ok(Self {
            device: device.clone(),
            framebuffer,
            extent,
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::PassKind;

    #[test]
    fn test_geometry_references() {
        let layout = PassLayout::geometry(vk::Format::D32_SFLOAT);
        let (colors, depth) = subpass_references(&layout);
        assert_eq!(colors.iter().map(|r| r.attachment).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(depth.map(|r| r.attachment), Some(2));
        assert_eq!(
            depth.map(|r| r.layout),
            Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        );
    }

    #[test]
    fn test_occlusion_has_no_depth_reference() {
        let (colors, depth) = subpass_references(&PassLayout::occlusion(PassKind::Blur));
        assert_eq!(colors.len(), 1);
        assert!(depth.is_none());
    }
}
