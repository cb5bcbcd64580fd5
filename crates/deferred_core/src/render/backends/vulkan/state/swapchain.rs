//! Presentable image chain

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::context::creation;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};
use crate::render::surface::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, recreation_extent,
};

pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Extent a chain built now would get, `None` while the surface has no area
    pub fn usable_extent(context: &VulkanContext, framebuffer: vk::Extent2D) -> VulkanResult<Option<vk::Extent2D>> {
        let caps = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical(), context.surface)
                .map_err(VulkanError::Api)?
        };
        Ok(recreation_extent(&caps, framebuffer))
    }

    /// Build a chain for the surface's current capabilities
    ///
    /// `old` is handed to the driver for reuse and must be dropped by the caller
    /// afterwards.
    pub fn new(context: &VulkanContext, framebuffer: vk::Extent2D, old: vk::SwapchainKHR) -> VulkanResult<Self> {
        let physical = context.physical();
        let surface = context.surface;
        let (caps, formats, present_modes) = unsafe {
            (
                context
                    .surface_loader
                    .get_physical_device_surface_capabilities(physical, surface)
                    .map_err(VulkanError::Api)?,
                context
                    .surface_loader
                    .get_physical_device_surface_formats(physical, surface)
                    .map_err(VulkanError::Api)?,
                context
                    .surface_loader
                    .get_physical_device_surface_present_modes(physical, surface)
                    .map_err(VulkanError::Api)?,
            )
        };

        let format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&caps, framebuffer);
        let image_count = choose_image_count(&caps);

        let families = context.families();
        let family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);
        create_info = if families.graphics != families.present {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = context.swapchain_loader().clone();
        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(creation("create swapchain"))?
        };

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(result));
            }
        };

        let device = context.raw_device();
        let mut result = Self {
            device,
            loader,
            swapchain,
            images,
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
        };
        // Views are pushed one at a time so Drop cleans up a partial set
        for index in 0..result.images.len() {
            let view = result.create_view(result.images[index])?;
            result.image_views.push(view);
        }

        log::info!(
            "[SWAPCHAIN] {} images {}x{} {:?} {:?}",
            result.images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode
        );
        Ok(result)
    }

    fn create_view(&self, image: vk::Image) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe {
            self.device
                .create_image_view(&create_info, None)
                .map_err(creation("create swapchain image view"))
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn loader(&self) -> &SwapchainLoader {
        &self.loader
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
