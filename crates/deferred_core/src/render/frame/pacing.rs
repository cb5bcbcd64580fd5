//! Frame slot rotation and presentable-image tracking
//!
//! Each frame slot owns a completion fence. Before the CPU records into a slot it waits
//! on that slot's fence, which bounds how far the CPU can run ahead of the GPU to
//! [`FRAME_SLOT_COUNT`] frames. Each presentable image also remembers which slot last
//! rendered into it, so an image returned early by the platform is not reused while
//! another slot's work on it is still pending.

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Number of frame slots cycled by the renderer
pub const FRAME_SLOT_COUNT: usize = 2;

/// CPU-waitable completion signal for one frame slot
pub trait FrameFence {
    /// Block until the fence is signaled
    fn wait(&self) -> VulkanResult<()>;

    /// Return the fence to the unsignaled state
    fn reset(&self) -> VulkanResult<()>;
}

/// Slot rotation plus per-image fence bookkeeping
pub struct FramePacer<F> {
    fences: Vec<F>,
    current: usize,
    images_in_flight: Vec<Option<usize>>,
}

impl<F: FrameFence> FramePacer<F> {
    /// One fence per slot; fences start signaled so the first wait returns immediately
    pub fn new(fences: Vec<F>, image_count: usize) -> Self {
        Self {
            fences,
            current: 0,
            images_in_flight: vec![None; image_count],
        }
    }

    /// Number of frame slots being cycled
    pub fn slot_count(&self) -> usize {
        self.fences.len()
    }

    /// Slot the next frame records into
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Completion fence of `slot`
    pub fn fence(&self, slot: usize) -> &F {
        &self.fences[slot]
    }

    /// Completion fence of the current slot
    pub fn current_fence(&self) -> &F {
        &self.fences[self.current]
    }

    /// Wait until the GPU has finished the last frame recorded in the current slot
    pub fn wait_for_slot(&self) -> VulkanResult<()> {
        self.fences[self.current].wait()
    }

    /// Mark `image` as used by the current slot
    ///
    /// If a different slot still owns the image, its fence is waited on first.
    pub fn claim_image(&mut self, image: usize) -> VulkanResult<()> {
        let owner = self
            .images_in_flight
            .get(image)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!(
                    "image index {} outside {} tracked images",
                    image,
                    self.images_in_flight.len()
                ),
            })?;

        if let Some(slot) = owner {
            if slot != self.current {
                log::trace!("[FRAME] Image {} still owned by slot {}, waiting", image, slot);
                self.fences[slot].wait()?;
            }
        }
        self.images_in_flight[image] = Some(self.current);
        Ok(())
    }

    /// Reset the current slot's fence just before submitting work that signals it
    ///
    /// Called only after a successful acquire so a stale acquire leaves the fence
    /// signaled and the next wait on this slot cannot deadlock.
    pub fn prepare_submit(&self) -> VulkanResult<()> {
        self.fences[self.current].reset()
    }

    /// Rotate to the next slot
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.fences.len();
    }

    /// Forget image ownership after the presentable image set was rebuilt
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
    }

    /// Slot that last rendered into `image`
    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Condvar, Mutex};
    use std::thread;
    use std::time::Duration;

    /// Fence signaled from another thread, standing in for the GPU
    #[derive(Clone, Default)]
    struct SimFence {
        state: Arc<(Mutex<bool>, Condvar)>,
    }

    impl SimFence {
        fn signaled() -> Self {
            let fence = Self::default();
            fence.signal();
            fence
        }

        fn signal(&self) {
            let (lock, cvar) = &*self.state;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }

        fn is_signaled(&self) -> bool {
            *self.state.0.lock().unwrap()
        }
    }

    impl FrameFence for SimFence {
        fn wait(&self) -> VulkanResult<()> {
            let (lock, cvar) = &*self.state;
            let mut signaled = lock.lock().unwrap();
            while !*signaled {
                signaled = cvar.wait(signaled).unwrap();
            }
            Ok(())
        }

        fn reset(&self) -> VulkanResult<()> {
            *self.state.0.lock().unwrap() = false;
            Ok(())
        }
    }

    fn pacer() -> FramePacer<SimFence> {
        FramePacer::new(vec![SimFence::signaled(), SimFence::signaled()], 3)
    }

    #[test]
    fn test_slot_reuse_blocks_until_fence_signaled() {
        let mut pacer = pacer();
        let gpu_fences: Vec<SimFence> = (0..FRAME_SLOT_COUNT).map(|s| pacer.fence(s).clone()).collect();

        // Two frames queued on the GPU, neither finished
        for image in 0..FRAME_SLOT_COUNT {
            pacer.wait_for_slot().unwrap();
            pacer.claim_image(image).unwrap();
            pacer.prepare_submit().unwrap();
            pacer.advance();
        }
        assert_eq!(pacer.current_slot(), 0);

        let finished_first = Arc::new(Mutex::new(false));
        let gpu = {
            let fence = gpu_fences[0].clone();
            let finished_first = Arc::clone(&finished_first);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                *finished_first.lock().unwrap() = true;
                fence.signal();
            })
        };

        // Third frame reuses slot 0 and must not proceed before frame one completes
        pacer.wait_for_slot().unwrap();
        assert!(*finished_first.lock().unwrap());
        gpu.join().unwrap();
        assert!(!gpu_fences[1].is_signaled());
    }

    #[test]
    fn test_claiming_image_waits_on_previous_owner() {
        let mut pacer = pacer();
        pacer.claim_image(2).unwrap();
        pacer.prepare_submit().unwrap();
        pacer.advance();

        let owner_fence = pacer.fence(0).clone();
        let gpu = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            owner_fence.signal();
        });

        // Slot 1 receives image 2 while slot 0 may still be drawing into it
        pacer.claim_image(2).unwrap();
        assert!(pacer.fence(0).is_signaled());
        assert_eq!(pacer.image_owner(2), Some(1));
        gpu.join().unwrap();
    }

    #[test]
    fn test_fence_untouched_until_submit() {
        let pacer = pacer();
        pacer.wait_for_slot().unwrap();
        // A stale acquire returns here without submitting
        assert!(pacer.current_fence().is_signaled());
        pacer.prepare_submit().unwrap();
        assert!(!pacer.current_fence().is_signaled());
    }

    #[test]
    fn test_reset_images_and_bounds() {
        let mut pacer = pacer();
        pacer.claim_image(0).unwrap();
        assert!(pacer.claim_image(5).is_err());
        pacer.reset_images(2);
        assert_eq!(pacer.image_owner(0), None);
        assert!(pacer.claim_image(2).is_err());
    }

    #[test]
    fn test_slots_rotate() {
        let mut pacer = pacer();
        let order: Vec<usize> = (0..4)
            .map(|_| {
                let slot = pacer.current_slot();
                pacer.advance();
                slot
            })
            .collect();
        assert_eq!(order, vec![0, 1, 0, 1]);
        assert_eq!(pacer.slot_count(), FRAME_SLOT_COUNT);
    }
}
