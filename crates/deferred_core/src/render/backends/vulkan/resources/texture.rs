//! Sampled textures for the bindless pool

use ash::vk;

use crate::render::backends::vulkan::rendering::commands::CommandPool;
use crate::render::backends::vulkan::resources::image::Image;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// RGBA8 checkerboard with `cells` squares per side
pub fn checker_pixels(size: u32, cells: u32, light: [u8; 4], dark: [u8; 4]) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let texel = if ((x / cell) + (y / cell)) % 2 == 0 { light } else { dark };
            pixels.extend_from_slice(&texel);
        }
    }
    pixels
}

/// sRGB colour texture uploaded once
pub struct Texture {
    image: Image,
}

impl Texture {
    pub fn from_rgba8(
        context: &VulkanContext,
        pool: &CommandPool,
        queue: vk::Queue,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> VulkanResult<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "texture {}x{} needs {} bytes, got {}",
                    width,
                    height,
                    expected,
                    pixels.len()
                ),
            });
        }
        let image = Image::sampled_from_pixels(
            context,
            pool,
            queue,
            vk::Extent2D { width, height },
            vk::Format::R8G8B8A8_SRGB,
            pixels,
        )?;
        log::debug!("Uploaded {}x{} texture", width, height);
        Ok(Self { image })
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checker_alternates_cells() {
        let light = [255, 255, 255, 255];
        let dark = [0, 0, 0, 255];
        let pixels = checker_pixels(4, 2, light, dark);
        assert_eq!(pixels.len(), 4 * 4 * 4);

        let texel = |x: usize, y: usize| &pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(0, 0), &light);
        assert_eq!(texel(1, 1), &light);
        assert_eq!(texel(2, 0), &dark);
        assert_eq!(texel(0, 2), &dark);
        assert_eq!(texel(3, 3), &light);
    }
}
