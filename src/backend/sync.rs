// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// Each FrameSlot is one rotating set of sync objects plus the command buffer
// recorded under them; FrameScheduler is the CPU-side bookkeeping that
// decides which fence must be waited on before anything gets touched.

use ash::vk;
use std::sync::Arc;

use super::error::RenderResult;
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    /// Allocated from the renderer's pool, freed with it
    pub command_buffer: vk::CommandBuffer,
    device: Arc<VulkanDevice>,
}

impl FrameSlot {
    pub fn new(device: Arc<VulkanDevice>, command_buffer: vk::CommandBuffer) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        // Build one handle at a time so a failure drops what already exists
        let mut slot = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            command_buffer,
            device,
        };
        unsafe {
            slot.image_available = slot.device.device.create_semaphore(&semaphore_info, None)?;
            slot.render_finished = slot.device.device.create_semaphore(&semaphore_info, None)?;
            slot.in_flight_fence = slot.device.device.create_fence(&fence_info, None)?;
        }
        Ok(slot)
    }

    /// Block until the GPU finished this slot's previous submission
    pub fn wait(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)?;
        }
        Ok(())
    }

    /// Re-arm the fence; only right before the submission that signals it
    pub fn reset(&self) -> RenderResult<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence])? };
        Ok(())
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        // Destroying null handles is a no-op
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// CPU-side view of which slot's work may still be on the GPU.
///
/// A slot's command buffer and semaphores are only touched after its fence
/// was observed signaled; an image is only reused after the slot that last
/// rendered to it is known to be done.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    current: usize,
    states: Vec<SlotState>,
    /// Submissions per slot not yet confirmed complete (never above 1)
    outstanding: Vec<u32>,
    /// Slot that last submitted work targeting each swapchain image
    image_owners: Vec<Option<usize>>,
}

impl FrameScheduler {
    pub fn new(slot_count: usize, image_count: usize) -> Self {
        let slot_count = slot_count.max(1);
        Self {
            current: 0,
            states: vec![SlotState::Idle; slot_count],
            outstanding: vec![0; slot_count],
            image_owners: vec![None; image_count],
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn slot_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    pub fn outstanding(&self, slot: usize) -> u32 {
        self.outstanding[slot]
    }

    /// The slot's fence has been observed signaled
    pub fn retire(&mut self, slot: usize) {
        self.outstanding[slot] = 0;
        if slot == self.current {
            self.states[slot] = SlotState::Idle;
        }
    }

    /// Current slot's fence has signaled; start acquiring
    pub fn begin_acquire(&mut self) {
        let slot = self.current;
        self.retire(slot);
        self.states[slot] = SlotState::Acquiring;
    }

    /// Record that the current slot will render into `image_index`.
    ///
    /// Returns another slot whose fence must be waited on first, if that
    /// slot's last submission targeted the same image and is unconfirmed.
    pub fn claim_image(&mut self, image_index: usize) -> Option<usize> {
        if image_index >= self.image_owners.len() {
            self.image_owners.resize(image_index + 1, None);
        }

        let previous = self.image_owners[image_index].replace(self.current);
        previous.filter(|&owner| owner != self.current && self.outstanding[owner] > 0)
    }

    pub fn begin_recording(&mut self) {
        let slot = self.current;
        debug_assert_eq!(
            self.outstanding[slot], 0,
            "slot {slot} re-recorded before its fence signaled"
        );
        self.states[slot] = SlotState::Recording;
    }

    pub fn submitted(&mut self) {
        let slot = self.current;
        self.outstanding[slot] += 1;
        debug_assert!(self.outstanding[slot] <= 1, "slot {slot} submitted twice");
        self.states[slot] = SlotState::Submitted;
    }

    pub fn presenting(&mut self) {
        self.states[self.current] = SlotState::Presenting;
    }

    /// Frame abandoned before submit (stale swapchain); nothing is in flight
    pub fn abort_frame(&mut self) {
        self.states[self.current] = SlotState::Idle;
    }

    /// Move to the next slot, `(current + 1) mod N`
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slot_count();
    }

    /// Device went idle and the swapchain was rebuilt with `image_count` images
    pub fn reset_after_idle(&mut self, image_count: usize) {
        self.outstanding.iter_mut().for_each(|count| *count = 0);
        self.states.iter_mut().for_each(|state| *state = SlotState::Idle);
        self.image_owners = vec![None; image_count];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// GPU stand-in: tracks which slots have unfinished work
    struct FakeGpu {
        pending: Vec<bool>,
    }

    impl FakeGpu {
        fn new(slots: usize) -> Self {
            Self {
                pending: vec![false; slots],
            }
        }

        /// CPU fence wait: the GPU finishes the work, scheduler observes it
        fn wait(&mut self, scheduler: &mut FrameScheduler, slot: usize) {
            self.pending[slot] = false;
            scheduler.retire(slot);
        }
    }

    /// One frame of the render loop against the fake GPU
    fn run_frame(scheduler: &mut FrameScheduler, gpu: &mut FakeGpu, image_index: usize) {
        let slot = scheduler.current();

        // Step 1: wait on this slot's fence
        gpu.pending[slot] = false;
        scheduler.begin_acquire();
        assert_eq!(scheduler.state(slot), SlotState::Acquiring);

        // Step 3: wait on whichever slot still renders into this image
        if let Some(other) = scheduler.claim_image(image_index) {
            assert_ne!(other, slot);
            assert!(gpu.pending[other], "asked to wait on an idle slot");
            gpu.wait(scheduler, other);
        }

        // Step 4: the command buffer is only recorded with nothing in flight
        assert_eq!(scheduler.outstanding(slot), 0);
        assert!(!gpu.pending[slot]);
        scheduler.begin_recording();

        // Step 5-6
        scheduler.submitted();
        gpu.pending[slot] = true;
        scheduler.presenting();

        for s in 0..scheduler.slot_count() {
            assert!(scheduler.outstanding(s) <= 1);
        }

        // Step 7
        scheduler.advance();
    }

    #[test]
    fn test_slots_rotate_modulo_count() {
        let mut scheduler = FrameScheduler::new(2, 3);
        let mut gpu = FakeGpu::new(2);

        let mut seen = Vec::new();
        for frame in 0..6 {
            seen.push(scheduler.current());
            run_frame(&mut scheduler, &mut gpu, frame % 3);
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_zero_slots_clamped_to_one() {
        let mut scheduler = FrameScheduler::new(0, 2);
        assert_eq!(scheduler.slot_count(), 1);
        scheduler.advance();
        assert_eq!(scheduler.current(), 0);
    }

    #[test]
    fn test_outstanding_submissions_never_exceed_one() {
        // More images than slots and fewer images than slots, with
        // out-of-order acquisition as a mailbox presentation engine does
        for (slots, images) in [(2, 3), (3, 2), (2, 2), (1, 3), (3, 5)] {
            let mut scheduler = FrameScheduler::new(slots, images);
            let mut gpu = FakeGpu::new(slots);
            let mut image = 0usize;
            for frame in 0..200 {
                image = (image + 1 + frame % 2 + frame / 7) % images;
                run_frame(&mut scheduler, &mut gpu, image);
            }
        }
    }

    #[test]
    fn test_image_reuse_waits_on_owning_slot() {
        let mut scheduler = FrameScheduler::new(2, 3);

        // Slot 0 renders image 1 and submits
        scheduler.begin_acquire();
        assert_eq!(scheduler.claim_image(1), None);
        scheduler.begin_recording();
        scheduler.submitted();
        scheduler.presenting();
        scheduler.advance();

        // Slot 1 gets image 1 back while slot 0 is unconfirmed
        scheduler.begin_acquire();
        assert_eq!(scheduler.claim_image(1), Some(0));

        // Once slot 0 is observed done, the image is free
        scheduler.retire(0);
        assert_eq!(scheduler.outstanding(0), 0);
        assert_eq!(scheduler.claim_image(1), None);
    }

    #[test]
    fn test_same_slot_same_image_needs_no_extra_wait() {
        let mut scheduler = FrameScheduler::new(1, 2);
        for _ in 0..3 {
            scheduler.begin_acquire();
            assert_eq!(scheduler.claim_image(0), None);
            scheduler.begin_recording();
            scheduler.submitted();
            scheduler.presenting();
            scheduler.advance();
        }
    }

    #[test]
    fn test_aborted_frame_submits_nothing() {
        let mut scheduler = FrameScheduler::new(2, 2);
        scheduler.begin_acquire();
        scheduler.abort_frame();
        assert_eq!(scheduler.state(0), SlotState::Idle);
        assert_eq!(scheduler.outstanding(0), 0);

        // The retry reuses the same slot
        assert_eq!(scheduler.current(), 0);
    }

    #[test]
    fn test_reset_after_idle_forgets_images() {
        let mut scheduler = FrameScheduler::new(2, 2);
        scheduler.begin_acquire();
        scheduler.claim_image(1);
        scheduler.begin_recording();
        scheduler.submitted();
        scheduler.advance();

        scheduler.reset_after_idle(4);
        assert_eq!(scheduler.outstanding(0), 0);
        scheduler.begin_acquire();
        assert_eq!(scheduler.claim_image(1), None);
        assert_eq!(scheduler.claim_image(3), None);
    }

    #[test]
    fn test_claim_grows_for_unexpected_index() {
        let mut scheduler = FrameScheduler::new(2, 0);
        scheduler.begin_acquire();
        assert_eq!(scheduler.claim_image(5), None);
    }
}
