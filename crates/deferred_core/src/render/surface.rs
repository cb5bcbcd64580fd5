//! Presentation surface selection and cross-generation format checks

use ash::vk;

use crate::render::attachments::select_depth_format;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Prefer 8-bit BGRA sRGB, otherwise take what the surface lists first
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| VulkanError::NoSuitableDevice("surface reports no formats".to_string()))
}

/// Mailbox when available, FIFO otherwise (always supported)
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    available
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface's current extent, or the framebuffer size clamped to the surface limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Extent a rebuilt chain would get, or `None` while either side is zero
///
/// Minimised windows report a zero current extent even when the last resize
/// event carried a real size.
pub fn recreation_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> Option<vk::Extent2D> {
    let extent = choose_extent(caps, framebuffer);
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

/// One more than the minimum, capped by the maximum when the surface reports one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Formats pipelines were built against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

/// Remembers the first generation's formats and rejects any later change
///
/// Pipelines are compiled against the original colour and depth formats, so a
/// recreated surface that reports different ones cannot continue.
#[derive(Debug, Clone)]
pub struct FormatGuard {
    expected: SurfaceFormats,
}

impl FormatGuard {
    pub fn new(initial: SurfaceFormats) -> Self {
        Self { expected: initial }
    }

    pub fn expected(&self) -> SurfaceFormats {
        self.expected
    }

    pub fn accept(&self, recreated: SurfaceFormats) -> VulkanResult<()> {
        if recreated.color != self.expected.color {
            return Err(VulkanError::FormatChanged {
                attachment: "swapchain color",
                previous: self.expected.color,
                current: recreated.color,
            });
        }
        if recreated.depth != self.expected.depth {
            return Err(VulkanError::FormatChanged {
                attachment: "depth",
                previous: self.expected.depth,
                current: recreated.depth,
            });
        }
        Ok(())
    }
}

/// Formats of a rebuilt chain: the new colour format plus a freshly selected depth format
///
/// `supported` answers whether the device can still use a depth format as an attachment.
pub fn recreation_formats(
    guard: &FormatGuard,
    color: vk::Format,
    supported: impl FnMut(vk::Format) -> bool,
) -> VulkanResult<SurfaceFormats> {
    let formats = SurfaceFormats {
        color,
        depth: select_depth_format(supported)?,
    };
    guard.accept(formats)?;
    Ok(formats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: current, height: current },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 1024, height: 768 },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn test_prefers_bgra_srgb() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&available).unwrap().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choose_surface_format(&available[..1]).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_present_mode_fallback() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&both), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_selection() {
        let framebuffer = vk::Extent2D { width: 4000, height: 300 };
        assert_eq!(choose_extent(&caps(500), framebuffer), vk::Extent2D { width: 500, height: 500 });
        assert_eq!(
            choose_extent(&caps(u32::MAX), framebuffer),
            vk::Extent2D { width: 1024, height: 300 }
        );
    }

    #[test]
    fn test_recreation_extent_defers_on_zero_surface() {
        let framebuffer = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(recreation_extent(&caps(0), framebuffer), None);

        let minimised = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 640, height: 0 },
            ..caps(0)
        };
        assert_eq!(recreation_extent(&minimised, framebuffer), None);

        let zero_limits = vk::SurfaceCapabilitiesKHR {
            min_image_extent: vk::Extent2D { width: 0, height: 0 },
            ..caps(u32::MAX)
        };
        assert_eq!(recreation_extent(&zero_limits, vk::Extent2D { width: 0, height: 600 }), None);

        assert_eq!(
            recreation_extent(&caps(u32::MAX), framebuffer),
            Some(vk::Extent2D { width: 800, height: 600 })
        );
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps(1)), 3);
        let unbounded = vk::SurfaceCapabilitiesKHR { min_image_count: 3, max_image_count: 0, ..Default::default() };
        assert_eq!(choose_image_count(&unbounded), 4);
        let tight = vk::SurfaceCapabilitiesKHR { min_image_count: 2, max_image_count: 2, ..Default::default() };
        assert_eq!(choose_image_count(&tight), 2);
    }

    #[test]
    fn test_depth_format_change_is_fatal() {
        let guard = FormatGuard::new(SurfaceFormats {
            color: vk::Format::B8G8R8A8_SRGB,
            depth: vk::Format::D32_SFLOAT,
        });
        assert!(guard.accept(guard.expected()).is_ok());

        let result = guard.accept(SurfaceFormats {
            color: vk::Format::B8G8R8A8_SRGB,
            depth: vk::Format::D24_UNORM_S8_UINT,
        });
        match result {
            Err(VulkanError::FormatChanged { attachment, previous, current }) => {
                assert_eq!(attachment, "depth");
                assert_eq!(previous, vk::Format::D32_SFLOAT);
                assert_eq!(current, vk::Format::D24_UNORM_S8_UINT);
            }
            other => panic!("expected a format change error, got {:?}", other),
        }
    }

    #[test]
    fn test_color_format_change_is_fatal() {
        let guard = FormatGuard::new(SurfaceFormats {
            color: vk::Format::B8G8R8A8_SRGB,
            depth: vk::Format::D32_SFLOAT,
        });
        let changed = SurfaceFormats { color: vk::Format::R8G8B8A8_UNORM, depth: vk::Format::D32_SFLOAT };
        assert!(matches!(guard.accept(changed), Err(VulkanError::FormatChanged { .. })));
    }

    #[test]
    fn test_recreation_reselects_depth_format() {
        let guard = FormatGuard::new(SurfaceFormats {
            color: vk::Format::B8G8R8A8_SRGB,
            depth: vk::Format::D32_SFLOAT,
        });
        let formats = recreation_formats(&guard, vk::Format::B8G8R8A8_SRGB, |_| true).unwrap();
        assert_eq!(formats, guard.expected());

        // Device lost plain D32 support between generations
        let result = recreation_formats(&guard, vk::Format::B8G8R8A8_SRGB, |f| f != vk::Format::D32_SFLOAT);
        assert!(matches!(
            result,
            Err(VulkanError::FormatChanged { attachment: "depth", current: vk::Format::D32_SFLOAT_S8_UINT, .. })
        ));

        assert!(matches!(
            recreation_formats(&guard, vk::Format::B8G8R8A8_SRGB, |_| false),
            Err(VulkanError::NoSuitableDepthFormat)
        ));
        assert!(matches!(
            recreation_formats(&guard, vk::Format::R8G8B8A8_UNORM, |_| true),
            Err(VulkanError::FormatChanged { attachment: "swapchain color", .. })
        ));
    }
}
