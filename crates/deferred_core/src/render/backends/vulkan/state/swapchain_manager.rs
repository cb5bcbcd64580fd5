//! Swapchain, onscreen targets and frame pacing
//!
//! The manager owns the presentable images, one depth image and framebuffer per
//! image, the per-slot signals and the frame pacer. Surface staleness is reported as a
//! status rather than an error; the caller decides when to call [`SwapchainManager::recreate`].

use ash::vk;

use crate::render::attachments::PassLayout;
use crate::render::backends::vulkan::rendering::{Framebuffer, RenderPass};
use crate::render::backends::vulkan::resources::{Image, ImageAllocator};
use crate::render::backends::vulkan::state::swapchain::Swapchain;
use crate::render::backends::vulkan::state::sync::{Fence, SlotSignals};
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};
use crate::render::frame::{FrameCycle, FrameFence, FramePacer, FRAME_SLOT_COUNT};
use crate::render::surface::{recreation_formats, FormatGuard, SurfaceFormats};

/// Image handed out by a successful acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// Usable this frame, but the chain should be rebuilt after presenting
    pub suboptimal: bool,
}

/// Classified result of acquiring a presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Ready(AcquiredImage),
    /// Surface no longer matches the window; nothing was acquired
    Stale,
}

/// Outcome of [`SwapchainManager::present`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Optimal,
    Suboptimal,
    Stale,
}

impl SurfaceStatus {
    /// Whether the chain should be rebuilt before the next acquire
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

/// Map a present result onto a status; other errors stay fatal
pub fn classify_present(result: Result<bool, vk::Result>) -> VulkanResult<SurfaceStatus> {
    match result {
        Ok(false) => Ok(SurfaceStatus::Optimal),
        Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(SurfaceStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::Stale),
        Err(result) => Err(VulkanError::Api(result)),
    }
}

/// Map an acquire result onto [`AcquireResult`]; other errors stay fatal
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> VulkanResult<AcquireResult> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireResult::Ready(AcquiredImage { index, suboptimal })),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::Stale),
        Err(result) => Err(VulkanError::Api(result)),
    }
}

/// Depth image and framebuffer for one presentable image
///
/// Field order is drop order: the framebuffer goes before the depth image it references.
struct OnscreenTarget {
    framebuffer: Framebuffer,
    _depth: Image,
}

pub struct SwapchainManager {
    targets: Vec<OnscreenTarget>,
    swapchain: Swapchain,
    presentation_pass: RenderPass,
    pacer: FramePacer<Fence>,
    signals: Vec<SlotSignals>,
    images: ImageAllocator,
    guard: FormatGuard,
    present_queue: vk::Queue,
}

impl SwapchainManager {
    pub fn new(context: &VulkanContext, framebuffer: vk::Extent2D, depth_format: vk::Format) -> VulkanResult<Self> {
        let device = context.raw_device();
        let swapchain = Swapchain::new(context, framebuffer, vk::SwapchainKHR::null())?;
        let presentation_pass =
            RenderPass::from_layout(&device, &PassLayout::presentation(swapchain.format(), depth_format))?;

        let fences = (0..FRAME_SLOT_COUNT)
            .map(|_| Fence::new(device.clone(), true))
            .collect::<VulkanResult<Vec<_>>>()?;
        let signals = (0..FRAME_SLOT_COUNT)
            .map(|_| SlotSignals::new(&device))
            .collect::<VulkanResult<Vec<_>>>()?;

        let images = ImageAllocator::new(context);
        let targets = build_targets(&images, &swapchain, &presentation_pass, depth_format)?;
        let pacer = FramePacer::new(fences, swapchain.image_count());

        Ok(Self {
            targets,
            guard: FormatGuard::new(SurfaceFormats {
                color: swapchain.format(),
                depth: depth_format,
            }),
            swapchain,
            presentation_pass,
            pacer,
            signals,
            images,
            present_queue: context.present_queue(),
        })
    }

    /// Wait for the current slot, then acquire the next presentable image
    ///
    /// Also waits on whichever slot last rendered into the returned image. Blocks
    /// without timeout. `None` means the surface was stale and `cycle` is idle again.
    pub fn acquire(&mut self, cycle: &mut FrameCycle) -> VulkanResult<Option<AcquiredImage>> {
        self.pacer.wait_for_slot()?;

        let semaphore = self.signals[self.pacer.current_slot()].image_available.handle();
        let result = unsafe {
            self.swapchain
                .loader()
                .acquire_next_image(self.swapchain.handle(), u64::MAX, semaphore, vk::Fence::null())
        };
        let acquired = classify_acquire(result)?;
        match acquired {
            AcquireResult::Ready(image) if image.suboptimal => {
                log::debug!("[SWAPCHAIN] Acquired image {} is suboptimal", image.index);
            }
            AcquireResult::Ready(_) => {}
            AcquireResult::Stale => log::info!("[SWAPCHAIN] Surface out of date on acquire"),
        }
        settle_acquire(&mut self.pacer, cycle, acquired)
    }

    /// Rotate to the next slot, queue `image_index` for display once `wait` is
    /// signaled, and close `cycle`
    pub fn present(&mut self, cycle: &mut FrameCycle, image_index: u32, wait: vk::Semaphore) -> VulkanResult<SurfaceStatus> {
        let swapchain = &self.swapchain;
        let queue = self.present_queue;
        let status = complete_frame(&mut self.pacer, cycle, || present_image(swapchain, queue, image_index, wait))?;
        if status.needs_recreate() {
            log::info!("[SWAPCHAIN] Present reported {:?}", status);
        }
        Ok(status)
    }

    /// Rebuild the chain and onscreen targets at `framebuffer`
    ///
    /// Returns `false` without touching anything while the surface reports a zero
    /// extent. Otherwise waits for the device to go idle first. A colour or depth
    /// format different from the first generation is fatal.
    pub fn recreate(&mut self, context: &VulkanContext, framebuffer: vk::Extent2D) -> VulkanResult<bool> {
        if Swapchain::usable_extent(context, framebuffer)?.is_none() {
            log::debug!("[SWAPCHAIN] Surface has zero extent, deferring recreation");
            return Ok(false);
        }
        context.wait_idle()?;

        self.targets.clear();
        let swapchain = Swapchain::new(context, framebuffer, self.swapchain.handle())?;
        let formats = recreation_formats(&self.guard, swapchain.format(), |format| {
            context.supports_depth_attachment(format)
        })?;
        self.swapchain = swapchain;
        self.targets = build_targets(&self.images, &self.swapchain, &self.presentation_pass, formats.depth)?;
        self.pacer.reset_images(self.swapchain.image_count());

        log::info!(
            "[SWAPCHAIN] Recreated at {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(true)
    }

    /// Reset the current slot's fence; call right before the submit that signals it
    pub fn prepare_submit(&self) -> VulkanResult<()> {
        self.pacer.prepare_submit()
    }

    /// Frame slot the next acquire and submit use
    pub fn current_slot(&self) -> usize {
        self.pacer.current_slot()
    }

    /// Fence the current slot's graphics submit signals
    pub fn in_flight_fence(&self) -> vk::Fence {
        self.pacer.current_fence().handle()
    }

    /// Semaphores owned by the current slot
    pub fn signals(&self) -> &SlotSignals {
        &self.signals[self.pacer.current_slot()]
    }

    /// Onscreen framebuffer for a presentable image
    pub fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.targets
            .get(image_index as usize)
            .map(|target| target.framebuffer.handle())
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no framebuffer for swap image {}", image_index),
            })
    }

    /// Render pass the lighting pass draws the final image with
    pub fn presentation_pass(&self) -> vk::RenderPass {
        self.presentation_pass.handle()
    }

    /// Clear values matching [`Self::presentation_pass`] attachments
    pub fn presentation_clear_values(&self) -> Vec<vk::ClearValue> {
        let formats = self.guard.expected();
        PassLayout::presentation(formats.color, formats.depth).clear_values()
    }

    /// Extent of the current chain
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }
}

/// Resolve an acquire against the pacer and the frame cycle
///
/// A ready image is claimed for the current slot and the cycle moves to recording.
/// A stale surface abandons the frame: the cycle returns to idle and the slot's fence
/// keeps its signaled state, since only [`FramePacer::prepare_submit`] resets it.
pub fn settle_acquire<F: FrameFence>(
    pacer: &mut FramePacer<F>,
    cycle: &mut FrameCycle,
    acquired: AcquireResult,
) -> VulkanResult<Option<AcquiredImage>> {
    match acquired {
        AcquireResult::Ready(image) => {
            pacer.claim_image(image.index as usize)?;
            cycle.acquired()?;
            Ok(Some(image))
        }
        AcquireResult::Stale => {
            cycle.abandon()?;
            Ok(None)
        }
    }
}

/// Advance to the next slot, present, then return the cycle to idle
///
/// The slot rotates before `present` runs, whatever it reports. A stale or suboptimal
/// status only tells the caller to rebuild the chain.
pub fn complete_frame<F: FrameFence>(
    pacer: &mut FramePacer<F>,
    cycle: &mut FrameCycle,
    present: impl FnOnce() -> VulkanResult<SurfaceStatus>,
) -> VulkanResult<SurfaceStatus> {
    pacer.advance();
    let status = present()?;
    cycle.presented()?;
    Ok(status)
}

fn present_image(
    swapchain: &Swapchain,
    queue: vk::Queue,
    image_index: u32,
    wait: vk::Semaphore,
) -> VulkanResult<SurfaceStatus> {
    let wait_semaphores = [wait];
    let swapchains = [swapchain.handle()];
    let indices = [image_index];
    let present_info = vk::PresentInfoKHR::builder()
        .wait_semaphores(&wait_semaphores)
        .swapchains(&swapchains)
        .image_indices(&indices);

    classify_present(unsafe { swapchain.loader().queue_present(queue, &present_info) })
}

fn build_targets(
    images: &ImageAllocator,
    swapchain: &Swapchain,
    pass: &RenderPass,
    depth_format: vk::Format,
) -> VulkanResult<Vec<OnscreenTarget>> {
    let extent = swapchain.extent();
    swapchain
        .image_views()
        .iter()
        .map(|&color| {
            let depth = images.depth(depth_format, extent, vk::ImageUsageFlags::empty())?;
            let framebuffer = Framebuffer::new(images.device(), pass.handle(), &[color, depth.view()], extent)?;
            Ok(OnscreenTarget {
                framebuffer,
                _depth: depth,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::FramePhase;

    #[test]
    fn test_out_of_date_acquire_is_stale_not_error() {
        let result = classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert_eq!(result.ok(), Some(AcquireResult::Stale));
    }

    #[test]
    fn test_suboptimal_acquire_still_yields_image() {
        let result = classify_acquire(Ok((2, true)));
        assert_eq!(
            result.ok(),
            Some(AcquireResult::Ready(AcquiredImage { index: 2, suboptimal: true }))
        );
    }

    #[test]
    fn test_device_lost_is_fatal() {
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn test_present_status_mapping() {
        assert_eq!(classify_present(Ok(false)).ok(), Some(SurfaceStatus::Optimal));
        assert_eq!(classify_present(Ok(true)).ok(), Some(SurfaceStatus::Suboptimal));
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).ok(),
            Some(SurfaceStatus::Stale)
        );
        assert!(!SurfaceStatus::Optimal.needs_recreate());
        assert!(SurfaceStatus::Stale.needs_recreate());
    }

    /// Fence that never blocks and counts resets
    #[derive(Default)]
    struct CountingFence {
        resets: std::cell::Cell<u32>,
    }

    impl FrameFence for CountingFence {
        fn wait(&self) -> VulkanResult<()> {
            Ok(())
        }

        fn reset(&self) -> VulkanResult<()> {
            self.resets.set(self.resets.get() + 1);
            Ok(())
        }
    }

    fn pacer() -> FramePacer<CountingFence> {
        FramePacer::new((0..FRAME_SLOT_COUNT).map(|_| CountingFence::default()).collect(), 3)
    }

    fn record_and_submit(pacer: &mut FramePacer<CountingFence>, cycle: &mut FrameCycle, image: u32) {
        cycle.start_acquire().unwrap();
        let ready = AcquireResult::Ready(AcquiredImage { index: image, suboptimal: false });
        assert!(settle_acquire(pacer, cycle, ready).unwrap().is_some());
        for step in crate::render::frame::PassPlan::for_frame(true).steps() {
            cycle.begin_pass(step.kind).unwrap();
            cycle.end_pass().unwrap();
        }
        cycle.submit().unwrap();
        pacer.prepare_submit().unwrap();
    }

    #[test]
    fn test_slot_rotates_whatever_present_reports() {
        let mut pacer = pacer();
        let mut cycle = FrameCycle::new();

        for (frame, reported) in [SurfaceStatus::Optimal, SurfaceStatus::Stale, SurfaceStatus::Suboptimal]
            .into_iter()
            .enumerate()
        {
            let slot = pacer.current_slot();
            record_and_submit(&mut pacer, &mut cycle, frame as u32);
            let status = complete_frame(&mut pacer, &mut cycle, || Ok(reported)).unwrap();

            assert_eq!(status, reported);
            assert_eq!(pacer.current_slot(), (slot + 1) % FRAME_SLOT_COUNT);
            assert_eq!(cycle.phase(), FramePhase::Idle);
            assert_eq!(status.needs_recreate(), reported != SurfaceStatus::Optimal);
        }
    }

    #[test]
    fn test_failed_present_still_rotates_slot() {
        let mut pacer = pacer();
        let mut cycle = FrameCycle::new();
        record_and_submit(&mut pacer, &mut cycle, 0);

        let result = complete_frame(&mut pacer, &mut cycle, || {
            Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR))
        });
        assert!(result.is_err());
        assert_eq!(pacer.current_slot(), 1);
    }

    #[test]
    fn test_stale_acquire_abandons_frame() {
        let mut pacer = pacer();
        let mut cycle = FrameCycle::new();

        cycle.start_acquire().unwrap();
        pacer.wait_for_slot().unwrap();
        let image = settle_acquire(&mut pacer, &mut cycle, AcquireResult::Stale).unwrap();

        assert_eq!(image, None);
        assert_eq!(cycle.phase(), FramePhase::Idle);
        assert_eq!(pacer.current_fence().resets.get(), 0);
        assert_eq!(pacer.current_slot(), 0);
        assert_eq!(pacer.image_owner(0), None);

        // The next frame starts cleanly on the same slot
        record_and_submit(&mut pacer, &mut cycle, 0);
        assert_eq!(pacer.current_fence().resets.get(), 1);
        assert_eq!(pacer.image_owner(0), Some(0));
    }
}
