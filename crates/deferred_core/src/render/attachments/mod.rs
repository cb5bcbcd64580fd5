//! Offscreen attachments for the geometry, occlusion and blur passes
//!
//! The set owns one generation of images, render passes and render targets at a time.
//! `resize` drops the whole generation before building the next one, so two
//! generations never coexist. Allocation goes through [`AttachmentAllocator`]; the
//! Vulkan backend supplies the real implementation and tests supply a counting one.

pub mod layout;

pub use layout::{
    has_stencil, select_depth_format, texel_size, AttachmentDesc, ClearKind, PassEdge, PassLayout,
    DEPTH_CANDIDATES, GBUFFER_COLOR_FORMAT, OCCLUSION_FORMAT,
};

use ash::vk;

use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::frame::PassKind;

/// Factory for attachment resources
///
/// Returned objects release their GPU resources when dropped.
pub trait AttachmentAllocator {
    type Image;
    type Pass;
    type Target;

    fn create_image(&mut self, desc: &AttachmentDesc, extent: vk::Extent2D) -> VulkanResult<Self::Image>;

    fn create_pass(&mut self, layout: &PassLayout) -> VulkanResult<Self::Pass>;

    fn create_target(
        &mut self,
        pass: &Self::Pass,
        images: &[Self::Image],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self::Target>;
}

/// Render pass, its images and the target grouping them
///
/// Field order is drop order: target first, then the pass, then the images.
pub struct PassTargets<A: AttachmentAllocator> {
    pub target: A::Target,
    pub pass: A::Pass,
    pub images: Vec<A::Image>,
    pub layout: PassLayout,
}

impl<A: AttachmentAllocator> PassTargets<A> {
    fn build(allocator: &mut A, layout: PassLayout, extent: vk::Extent2D) -> VulkanResult<Self> {
        let images = layout
            .attachments
            .iter()
            .map(|desc| allocator.create_image(desc, extent))
            .collect::<VulkanResult<Vec<_>>>()?;
        let pass = allocator.create_pass(&layout)?;
        let target = allocator.create_target(&pass, &images, extent)?;
        Ok(Self {
            target,
            pass,
            images,
            layout,
        })
    }

    fn byte_size(&self, extent: vk::Extent2D) -> u64 {
        let texels = u64::from(extent.width) * u64::from(extent.height);
        self.layout
            .attachments
            .iter()
            .map(|desc| texels * texel_size(desc.format))
            .sum()
    }
}

/// All offscreen targets at one extent
pub struct AttachmentGeneration<A: AttachmentAllocator> {
    pub geometry: PassTargets<A>,
    pub occlusion: PassTargets<A>,
    pub blur: PassTargets<A>,
    extent: vk::Extent2D,
}

impl<A: AttachmentAllocator> AttachmentGeneration<A> {
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Total image memory, ignoring alignment and padding
    pub fn byte_size(&self) -> u64 {
        [&self.geometry, &self.occlusion, &self.blur]
            .iter()
            .map(|targets| targets.byte_size(self.extent))
            .sum()
    }

    pub fn formats(&self) -> Vec<vk::Format> {
        [&self.geometry, &self.occlusion, &self.blur]
            .iter()
            .flat_map(|targets| targets.layout.attachments.iter().map(|a| a.format))
            .collect()
    }
}

/// Owner of the current attachment generation
pub struct OffscreenAttachmentSet<A: AttachmentAllocator> {
    // Declared before the allocator so it is released first
    generation: Option<AttachmentGeneration<A>>,
    allocator: A,
    depth_format: vk::Format,
    rebuilds: u64,
}

impl<A: AttachmentAllocator> OffscreenAttachmentSet<A> {
    pub fn new(allocator: A, depth_format: vk::Format, extent: vk::Extent2D) -> VulkanResult<Self> {
        let mut set = Self {
            generation: None,
            allocator,
            depth_format,
            rebuilds: 0,
        };
        set.resize(extent)?;
        Ok(set)
    }

    /// Tear down every attachment, then rebuild all of them at `extent`
    pub fn resize(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("cannot size attachments to {}x{}", extent.width, extent.height),
            });
        }

        log::debug!("[ATTACHMENTS] Rebuilding offscreen targets at {}x{}", extent.width, extent.height);
        self.generation = None;

        let allocator = &mut self.allocator;
        let geometry = PassTargets::build(allocator, PassLayout::geometry(self.depth_format), extent)?;
        let occlusion = PassTargets::build(allocator, PassLayout::occlusion(PassKind::Occlusion), extent)?;
        let blur = PassTargets::build(allocator, PassLayout::occlusion(PassKind::Blur), extent)?;

        self.generation = Some(AttachmentGeneration {
            geometry,
            occlusion,
            blur,
            extent,
        });
        self.rebuilds += 1;
        Ok(())
    }

    pub fn current(&self) -> VulkanResult<&AttachmentGeneration<A>> {
        self.generation.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "offscreen attachments are not built".to_string(),
        })
    }

    /// Targets written by `kind`; lighting renders onscreen and has none
    pub fn targets(&self, kind: PassKind) -> VulkanResult<&PassTargets<A>> {
        let generation = self.current()?;
        match kind {
            PassKind::Geometry => Ok(&generation.geometry),
            PassKind::Occlusion => Ok(&generation.occlusion),
            PassKind::Blur => Ok(&generation.blur),
            PassKind::Lighting => Err(VulkanError::InvalidOperation {
                reason: "lighting has no offscreen targets".to_string(),
            }),
        }
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Number of generations built so far
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counters {
        created: Cell<usize>,
        destroyed: Cell<usize>,
        live_bytes: Cell<u64>,
    }

    /// Resource that reports its own destruction
    struct Tracked {
        counters: Rc<Counters>,
        bytes: u64,
    }

    impl Tracked {
        fn new(counters: &Rc<Counters>, bytes: u64) -> Self {
            counters.created.set(counters.created.get() + 1);
            counters.live_bytes.set(counters.live_bytes.get() + bytes);
            Self {
                counters: Rc::clone(counters),
                bytes,
            }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.counters.destroyed.set(self.counters.destroyed.get() + 1);
            self.counters.live_bytes.set(self.counters.live_bytes.get() - self.bytes);
        }
    }

    #[derive(Default)]
    struct CountingAllocator {
        counters: Rc<Counters>,
        fail_images_after: Option<usize>,
    }

    impl CountingAllocator {
        fn live(&self) -> usize {
            self.counters.created.get() - self.counters.destroyed.get()
        }
    }

    impl AttachmentAllocator for CountingAllocator {
        type Image = Tracked;
        type Pass = Tracked;
        type Target = Tracked;

        fn create_image(&mut self, desc: &AttachmentDesc, extent: vk::Extent2D) -> VulkanResult<Tracked> {
            if let Some(limit) = self.fail_images_after {
                if self.counters.created.get() >= limit {
                    return Err(VulkanError::ResourceCreation {
                        operation: "create attachment image",
                        result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                    });
                }
            }
            let bytes = u64::from(extent.width) * u64::from(extent.height) * texel_size(desc.format);
            Ok(Tracked::new(&self.counters, bytes))
        }

        fn create_pass(&mut self, _layout: &PassLayout) -> VulkanResult<Tracked> {
            Ok(Tracked::new(&self.counters, 0))
        }

        fn create_target(&mut self, _pass: &Tracked, images: &[Tracked], _extent: vk::Extent2D) -> VulkanResult<Tracked> {
            assert!(!images.is_empty());
            Ok(Tracked::new(&self.counters, 0))
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_resize_round_trip_keeps_size_and_balance() {
        let mut set =
            OffscreenAttachmentSet::new(CountingAllocator::default(), vk::Format::D32_SFLOAT, extent(640, 480)).unwrap();
        // 5 images, 3 passes, 3 targets
        assert_eq!(set.allocator().live(), 11);

        set.resize(extent(800, 600)).unwrap();
        let bytes = set.current().unwrap().byte_size();
        let formats = set.current().unwrap().formats();
        let live = set.allocator().live();

        set.resize(extent(800, 600)).unwrap();
        assert_eq!(set.current().unwrap().byte_size(), bytes);
        assert_eq!(set.current().unwrap().formats(), formats);
        assert_eq!(set.allocator().live(), live);
        assert_eq!(set.allocator().counters.live_bytes.get(), bytes);
        assert_eq!(set.rebuilds(), 3);
    }

    #[test]
    fn test_expected_byte_size() {
        let set = OffscreenAttachmentSet::new(CountingAllocator::default(), vk::Format::D32_SFLOAT, extent(4, 2))
            .unwrap();
        // position 8 + normal 8 + depth 4 + occlusion 1 + blur 1 bytes per texel
        assert_eq!(set.current().unwrap().byte_size(), 8 * 22);
    }

    #[test]
    fn test_drop_releases_everything() {
        let counters = {
            let set = OffscreenAttachmentSet::new(CountingAllocator::default(), vk::Format::D32_SFLOAT, extent(16, 16))
                .unwrap();
            Rc::clone(&set.allocator().counters)
        };
        assert_eq!(counters.created.get(), counters.destroyed.get());
        assert_eq!(counters.live_bytes.get(), 0);
    }

    #[test]
    fn test_failed_rebuild_leaves_no_partial_generation() {
        let mut set =
            OffscreenAttachmentSet::new(CountingAllocator::default(), vk::Format::D32_SFLOAT, extent(32, 32)).unwrap();
        set.allocator.fail_images_after = Some(set.allocator.counters.created.get() + 3);

        assert!(matches!(set.resize(extent(64, 64)), Err(VulkanError::ResourceCreation { .. })));
        assert!(set.current().is_err());
        assert_eq!(set.allocator().live(), 0);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let mut set =
            OffscreenAttachmentSet::new(CountingAllocator::default(), vk::Format::D32_SFLOAT, extent(32, 32)).unwrap();
        assert!(set.resize(extent(0, 32)).is_err());
        // The previous generation is kept when the request is rejected up front
        assert!(set.current().is_ok());
    }

    #[test]
    fn test_lighting_has_no_offscreen_targets() {
        let set = OffscreenAttachmentSet::new(CountingAllocator::default(), vk::Format::D32_SFLOAT, extent(8, 8))
            .unwrap();
        assert!(set.targets(PassKind::Lighting).is_err());
        assert_eq!(set.targets(PassKind::Blur).unwrap().layout.attachments.len(), 1);
    }
}
