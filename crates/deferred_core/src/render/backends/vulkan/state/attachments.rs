//! Vulkan implementation of the offscreen attachment factory

use ash::vk;

use crate::render::attachments::{AttachmentAllocator, AttachmentDesc, OffscreenAttachmentSet, PassLayout};
use crate::render::backends::vulkan::rendering::{Framebuffer, RenderPass};
use crate::render::backends::vulkan::resources::{AttachmentInputs, Image, ImageAllocator};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::frame::PassKind;

pub struct VulkanAttachmentAllocator {
    images: ImageAllocator,
}

impl VulkanAttachmentAllocator {
    pub fn new(images: ImageAllocator) -> Self {
        Self { images }
    }
}

impl AttachmentAllocator for VulkanAttachmentAllocator {
    type Image = Image;
    type Pass = RenderPass;
    type Target = Framebuffer;

    fn create_image(&mut self, desc: &AttachmentDesc, extent: vk::Extent2D) -> VulkanResult<Image> {
        self.images.attachment(desc, extent)
    }

    fn create_pass(&mut self, layout: &PassLayout) -> VulkanResult<RenderPass> {
        RenderPass::from_layout(self.images.device(), layout)
    }

    fn create_target(&mut self, pass: &RenderPass, images: &[Image], extent: vk::Extent2D) -> VulkanResult<Framebuffer> {
        let views: Vec<vk::ImageView> = images.iter().map(Image::view).collect();
        Framebuffer::new(self.images.device(), pass.handle(), &views, extent)
    }
}

pub type OffscreenAttachments = OffscreenAttachmentSet<VulkanAttachmentAllocator>;

/// Render pass, framebuffer and clear values for beginning `kind`
pub struct PassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: Vec<vk::ClearValue>,
}

pub fn pass_begin(attachments: &OffscreenAttachments, kind: PassKind) -> VulkanResult<PassBegin> {
    let extent = attachments.current()?.extent();
    let targets = attachments.targets(kind)?;
    Ok(PassBegin {
        render_pass: targets.pass.handle(),
        framebuffer: targets.target.handle(),
        extent,
        clear_values: targets.layout.clear_values(),
    })
}

/// Views of the current generation for the attachment-bound descriptor sets
pub fn attachment_inputs(
    attachments: &OffscreenAttachments,
    gbuffer_sampler: vk::Sampler,
    occlusion_sampler: vk::Sampler,
) -> VulkanResult<AttachmentInputs> {
    let generation = attachments.current()?;
    Ok(AttachmentInputs {
        position: view_at(&generation.geometry.images, 0, "position", Image::view)?,
        normal: view_at(&generation.geometry.images, 1, "normal", Image::view)?,
        raw_occlusion: view_at(&generation.occlusion.images, 0, "raw occlusion", Image::view)?,
        blurred_occlusion: view_at(&generation.blur.images, 0, "blurred occlusion", Image::view)?,
        gbuffer_sampler,
        occlusion_sampler,
    })
}

fn view_at<T>(
    images: &[T],
    index: usize,
    role: &str,
    view: impl Fn(&T) -> vk::ImageView,
) -> VulkanResult<vk::ImageView> {
    images.get(index).map(view).ok_or_else(|| VulkanError::InvalidOperation {
        reason: format!("{} attachment missing: pass allocated {} images", role, images.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_missing_attachment_is_an_error_not_a_null_view() {
        let views = [vk::ImageView::from_raw(7)];
        assert_eq!(view_at(&views, 0, "position", |v| *v).unwrap().as_raw(), 7);
        assert!(matches!(
            view_at(&views, 1, "normal", |v| *v),
            Err(VulkanError::InvalidOperation { .. })
        ));
        let empty: [vk::ImageView; 0] = [];
        assert!(view_at(&empty, 0, "blurred occlusion", |v| *v).is_err());
    }
}
